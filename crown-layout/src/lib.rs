//! Name layouts from declarative configuration.
//!
//! Every field gets a path into the external data: either the one a `map`
//! rule gives it, or a single generated key (the id after trimming and name
//! styling, or the field index for list layouts). The paths are folded into
//! a crown, extra-data policies and `omit_default` sieves are attached, and
//! the result is validated against the shape by the fuser.

pub mod builder;
pub mod config;
pub mod mapping;
pub mod name_style;
pub mod provider;

pub use builder::{LayoutError, build_input_layout, build_output_layout, default_sieve};
pub use config::{ExtraIn, ExtraOut, LayoutConfig, LayoutSchema};
pub use mapping::{FieldInfo, FieldPredicate, MapKey, MapResult, NameMapEntry};
pub use name_style::{NameStyle, NameStyleError, convert_snake_style, is_snake_style};
pub use provider::NameLayoutProvider;
