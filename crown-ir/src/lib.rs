//! Shared vocabulary of the crown codec engine: values, shapes, crowns,
//! errors with debug trails, and the programs codecs are compiled from.

// --- values and trails ---
pub mod trail;
pub mod value;

// --- errors ---
pub mod error;

// --- model description ---
pub mod crown;
pub mod shape;

// --- compiled form ---
pub mod code_builder;
pub mod program;

pub use code_builder::CodeBuilder;
pub use crown::{
    CrownKey, CrownPath, DictExtraPolicy, Filler, InputCrown, InputDict, InputExtraMove,
    InputList, InputNameLayout, ListExtraPolicy, OutputCrown, OutputDict, OutputExtraMove,
    OutputList, OutputNameLayout, path_to_string, path_trail,
};
pub use error::{BoxError, CannotProvide, DumpError, DumpErrorKind, LoadError, LoadErrorKind};
pub use program::{
    ArgBinding, BuildEntry, BuildNode, Capture, ConstructExtra, DataReg, DumpInstr, DumpProgram,
    EntryGuard, ExtraReg, FieldReg, FieldTarget, LoadConstruction, LoadInstr, LoadProgram,
    Namespace, OnAbsent, PROGRAM_ABI_V1, PathId, Sym,
};
pub use shape::{
    AccessError, AccessErrorKind, Accessor, AccessorKind, Constructor, ConstructorArgs, Extractor,
    Factory, FieldDefault, FieldDumper, FieldLoader, Getter, InputField, InputShape,
    InputShapeBuilder, Metadata, Original, OutputField, OutputShape, Param, ParamKind, Saturator,
    SelfFactory, ShapeError, Sieve, TypeHint,
};
pub use trail::{DebugTrail, Trail, TrailElement, Trailed, append_path, extend_path, render_trail};
pub use value::{ItemKey, Map, Number, Record, Value, ValueKind};
