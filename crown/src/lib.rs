//! Compiled loaders and dumpers for record-like models.
//!
//! A model is described by an [`InputShape`] (how to build it) and an
//! [`OutputShape`] (how to read it back), and registered with a [`Retort`]
//! together with optional layout layers. The retort turns the shapes and
//! the merged layout into a name layout, generates a program from it,
//! links the program into a closure and caches the result:
//!
//! ```text
//! ModelEntry -> NameLayoutProvider -> fuser -> generate_loader/dumper
//!            -> ClosureCompiler -> Loader<M> / Dumper<M>
//! ```
//!
//! Failures while building a codec are [`CannotProvide`]. Failures while
//! running one are [`LoadError`] or [`DumpError`] carrying a trail into the
//! external data, as configured by [`DebugTrail`].

mod codecs;
mod config;
mod retort;

pub use codecs::{BuiltinCodecs, FieldCodecProvider, FieldRequest};
pub use config::{ExtraInPolicy, ExtraOutPolicy, RetortConfig};
pub use retort::{CodecError, Direction, ModelEntry, Retort, RetortBuilder};

pub use crown_interpreter::{CodeGenAccumulator, CodeGenHook, CodeGenHookData, Dumper, Loader};
pub use crown_ir::{
    AccessError, AccessErrorKind, Accessor, CannotProvide, ConstructorArgs, DebugTrail, DumpError,
    DumpErrorKind, FieldDefault, FieldDumper, FieldLoader, InputField, InputShape, ItemKey,
    LoadError, LoadErrorKind, Map, Metadata, OutputField, OutputShape, ParamKind, Record, Trail,
    TrailElement, TypeHint, Value, ValueKind, render_trail,
};
pub use crown_layout::{
    ExtraIn, ExtraOut, FieldInfo, FieldPredicate, LayoutConfig, MapKey, MapResult, NameStyle,
};
