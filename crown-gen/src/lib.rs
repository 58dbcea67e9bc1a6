//! Program generation: validates a shape against its name layout and emits
//! the load or dump program plus the namespace of captures it refers to.

pub mod binder;
pub mod dumper;
pub mod fuser;
pub mod loader;

pub use binder::{Entity, VarBinder};
pub use dumper::{DumperProps, GeneratedDumper, generate_dumper, generate_fused_dumper};
pub use fuser::{
    FuseError, StrippedInputShape, StrippedOutputShape, check_paths, fuse_input, fuse_output,
};
pub use loader::{GeneratedLoader, LoaderProps, generate_fused_loader, generate_loader};
