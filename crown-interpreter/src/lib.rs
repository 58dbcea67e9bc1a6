//! Runs load and dump programs.
//!
//! [`ClosureCompiler`] links a program against its namespace, resolving every
//! symbol to a typed capture up front, and wraps the linked form into a
//! [`Loader`] or [`Dumper`] closure. Execution walks the instructions once,
//! keeping values in registers the way the program allocated them.

use std::fmt;
use std::sync::Arc;

use crown_ir::{DumpError, LoadError, Value};

mod compiler;
mod dump;
mod load;

pub use compiler::{ClosureCompiler, CodeGenAccumulator, CodeGenHook, CodeGenHookData};

type LoadFn<M> = dyn Fn(&Value) -> Result<M, LoadError> + Send + Sync;
type DumpFn<M> = dyn Fn(&M) -> Result<Value, DumpError> + Send + Sync;

/// Compiled loader: external data in, model instance out.
pub struct Loader<M> {
    name: Arc<str>,
    func: Arc<LoadFn<M>>,
}

impl<M> Loader<M> {
    pub fn new(
        name: impl Into<Arc<str>>,
        func: impl Fn(&Value) -> Result<M, LoadError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn load(&self, data: &Value) -> Result<M, LoadError> {
        (self.func)(data)
    }
}

impl<M> Clone for Loader<M> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            func: Arc::clone(&self.func),
        }
    }
}

impl<M> fmt::Debug for Loader<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Loader").field(&self.name).finish()
    }
}

/// Compiled dumper: model instance in, external data out.
pub struct Dumper<M> {
    name: Arc<str>,
    func: Arc<DumpFn<M>>,
}

impl<M> Dumper<M> {
    pub fn new(
        name: impl Into<Arc<str>>,
        func: impl Fn(&M) -> Result<Value, DumpError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dump(&self, model: &M) -> Result<Value, DumpError> {
        (self.func)(model)
    }
}

impl<M> Clone for Dumper<M> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            func: Arc::clone(&self.func),
        }
    }
}

impl<M> fmt::Debug for Dumper<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Dumper").field(&self.name).finish()
    }
}
