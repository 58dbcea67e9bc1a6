//! Model registry and codec cache.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::iter;
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use crown_gen::{DumperProps, LoaderProps, generate_fused_dumper, generate_fused_loader};
use crown_interpreter::{ClosureCompiler, CodeGenHook, Dumper, Loader};
use crown_ir::{
    CannotProvide, DumpError, FieldDumper, FieldLoader, InputShape, LoadError, Metadata,
    OutputShape, Record, TypeHint, Value,
};
use crown_layout::{LayoutConfig, NameLayoutProvider};
use parking_lot::{Mutex, RwLock};

use crate::codecs::{BuiltinCodecs, FieldCodecProvider, FieldRequest};
use crate::config::RetortConfig;

type Erased = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Load,
    Dump,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Load => "load",
            Direction::Dump => "dump",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    type_id: String,
    direction: Direction,
    fingerprint: u64,
}

/// A codec being compiled on one thread. Only that thread may see it again,
/// through a recursive field of the model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PendingKey {
    thread: ThreadId,
    key: CacheKey,
}

/// Everything a retort knows about one model type.
///
/// A model may have only one of the shapes; asking for the codec of the
/// missing direction fails with [`CannotProvide`].
pub struct ModelEntry<M> {
    input: Option<InputShape<M>>,
    output: Option<OutputShape<M>>,
    layers: Vec<LayoutConfig<M>>,
    field_loaders: HashMap<String, FieldLoader>,
    field_dumpers: HashMap<String, FieldDumper>,
}

impl<M> Default for ModelEntry<M> {
    fn default() -> Self {
        Self {
            input: None,
            output: None,
            layers: Vec::new(),
            field_loaders: HashMap::new(),
            field_dumpers: HashMap::new(),
        }
    }
}

impl<M> fmt::Debug for ModelEntry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelEntry")
            .field("input", &self.input.is_some())
            .field("output", &self.output.is_some())
            .field("layers", &self.layers)
            .finish_non_exhaustive()
    }
}

impl<M> ModelEntry<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, shape: InputShape<M>) -> Self {
        self.input = Some(shape);
        self
    }

    pub fn output(mut self, shape: OutputShape<M>) -> Self {
        self.output = Some(shape);
        self
    }

    /// Adds a layout layer on top of the retort-wide one and earlier layers.
    pub fn layout(mut self, layer: LayoutConfig<M>) -> Self {
        self.layers.push(layer);
        self
    }

    /// Uses `loader` for field `id` instead of asking the codec provider.
    pub fn field_loader(
        mut self,
        id: impl Into<String>,
        loader: impl Fn(&Value) -> Result<Value, LoadError> + Send + Sync + 'static,
    ) -> Self {
        self.field_loaders.insert(id.into(), Arc::new(loader));
        self
    }

    pub fn field_dumper(
        mut self,
        id: impl Into<String>,
        dumper: impl Fn(&Value) -> Result<Value, DumpError> + Send + Sync + 'static,
    ) -> Self {
        self.field_dumpers.insert(id.into(), Arc::new(dumper));
        self
    }
}

/// Builds a [`Retort`].
#[derive(Default)]
pub struct RetortBuilder {
    config: RetortConfig,
    hook: Option<CodeGenHook>,
    codecs: Option<Arc<dyn FieldCodecProvider>>,
}

impl RetortBuilder {
    pub fn config(mut self, config: RetortConfig) -> Self {
        self.config = config;
        self
    }

    /// Receives the generated source of every compiled codec.
    pub fn code_gen_hook(mut self, hook: CodeGenHook) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn field_codecs(mut self, codecs: impl FieldCodecProvider + 'static) -> Self {
        self.codecs = Some(Arc::new(codecs));
        self
    }

    pub fn build(self) -> Retort {
        let compiler = match self.hook {
            Some(hook) => ClosureCompiler::with_hook(hook),
            None => ClosureCompiler::new(),
        };
        Retort {
            fingerprint: self.config.fingerprint(),
            config: self.config,
            models: HashMap::new(),
            cache: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            compiler,
            codecs: self.codecs.unwrap_or_else(|| Arc::new(BuiltinCodecs)),
        }
    }
}

/// Registry of models and cache of their compiled codecs.
///
/// Codecs are compiled on first request and kept for the lifetime of the
/// retort. Compilation happens outside the cache lock, so two threads may
/// compile the same codec; the first one stored is returned to both.
///
/// A model whose fields refer back to itself gets a deferred codec for the
/// inner reference, filled in once the outer compilation finishes. Other
/// threads never receive a deferred codec.
pub struct Retort {
    config: RetortConfig,
    fingerprint: u64,
    models: HashMap<String, Erased>,
    cache: RwLock<HashMap<CacheKey, Erased>>,
    pending: Mutex<HashMap<PendingKey, Erased>>,
    compiler: ClosureCompiler,
    codecs: Arc<dyn FieldCodecProvider>,
}

impl Default for Retort {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Retort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retort")
            .field("config", &self.config)
            .field("models", &self.models.keys().collect::<Vec<_>>())
            .field("cached", &self.cache.read().len())
            .finish_non_exhaustive()
    }
}

impl Retort {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> RetortBuilder {
        RetortBuilder::default()
    }

    pub fn config(&self) -> &RetortConfig {
        &self.config
    }

    /// Registers `entry` under `type_id`, replacing an earlier registration.
    ///
    /// The cache is never invalidated: codecs compiled from the old entry
    /// keep being returned for `type_id`. Register before asking for codecs.
    pub fn register<M: Send + Sync + 'static>(
        &mut self,
        type_id: impl Into<String>,
        entry: ModelEntry<M>,
    ) -> &mut Self {
        self.models.insert(type_id.into(), Arc::new(entry));
        self
    }

    pub fn is_registered(&self, type_id: &str) -> bool {
        self.models.contains_key(type_id)
    }

    pub fn loader<M: Send + Sync + 'static>(
        &self,
        type_id: &str,
    ) -> Result<Loader<M>, CannotProvide> {
        self.resolve(
            type_id,
            Direction::Load,
            |entry: &ModelEntry<M>| self.compile_loader(type_id, entry),
            |slot: Arc<OnceLock<Loader<M>>>| {
                Loader::new(format!("{type_id}_deferred_loader"), move |data| match slot.get() {
                    Some(loader) => loader.load(data),
                    None => Err(LoadError::value(
                        "loader used before it was compiled",
                        data.clone(),
                    )),
                })
            },
        )
    }

    pub fn dumper<M: Record + Send + Sync + 'static>(
        &self,
        type_id: &str,
    ) -> Result<Dumper<M>, CannotProvide> {
        self.resolve(
            type_id,
            Direction::Dump,
            |entry: &ModelEntry<M>| self.compile_dumper(type_id, entry),
            |slot: Arc<OnceLock<Dumper<M>>>| {
                Dumper::new(format!("{type_id}_deferred_dumper"), move |model| match slot.get() {
                    Some(dumper) => dumper.dump(model),
                    None => Err(DumpError::msg("dumper used before it was compiled")),
                })
            },
        )
    }

    pub fn load<M: Send + Sync + 'static>(
        &self,
        type_id: &str,
        data: &Value,
    ) -> Result<M, CodecError> {
        Ok(self.loader::<M>(type_id)?.load(data)?)
    }

    pub fn dump<M: Record + Send + Sync + 'static>(
        &self,
        type_id: &str,
        model: &M,
    ) -> Result<Value, CodecError> {
        Ok(self.dumper::<M>(type_id)?.dump(model)?)
    }

    fn entry<M: Send + Sync + 'static>(
        &self,
        type_id: &str,
    ) -> Result<Arc<ModelEntry<M>>, CannotProvide> {
        let entry = self
            .models
            .get(type_id)
            .ok_or_else(|| CannotProvide::new(type_id, "model is not registered"))?;
        Arc::clone(entry)
            .downcast::<ModelEntry<M>>()
            .map_err(|_| mismatch(type_id))
    }

    fn resolve<M, C>(
        &self,
        type_id: &str,
        direction: Direction,
        compile: impl FnOnce(&ModelEntry<M>) -> Result<C, CannotProvide>,
        deferred: impl FnOnce(Arc<OnceLock<C>>) -> C,
    ) -> Result<C, CannotProvide>
    where
        M: Send + Sync + 'static,
        C: Clone + Send + Sync + 'static,
    {
        let key = CacheKey {
            type_id: type_id.to_owned(),
            direction,
            fingerprint: self.fingerprint,
        };
        if let Some(cached) = self.cache.read().get(&key) {
            tracing::trace!(model = type_id, %direction, "codec cache hit");
            return cached.downcast_ref::<C>().cloned().ok_or_else(|| mismatch(type_id));
        }

        let entry = self.entry::<M>(type_id)?;
        let pending_key = PendingKey {
            thread: thread::current().id(),
            key: key.clone(),
        };
        let slot = {
            let mut pending = self.pending.lock();
            if let Some(slot) = pending.get(&pending_key) {
                tracing::debug!(model = type_id, %direction, "recursive model, deferring codec");
                let slot = Arc::clone(slot)
                    .downcast::<OnceLock<C>>()
                    .map_err(|_| mismatch(type_id))?;
                return Ok(deferred(slot));
            }
            let slot: Arc<OnceLock<C>> = Arc::new(OnceLock::new());
            pending.insert(pending_key.clone(), Arc::clone(&slot) as Erased);
            slot
        };

        let compiled = compile(entry.as_ref());
        self.pending.lock().remove(&pending_key);
        let codec = compiled?;
        let _ = slot.set(codec.clone());

        let mut cache = self.cache.write();
        let stored = cache.entry(key).or_insert_with(|| Arc::new(codec));
        stored.downcast_ref::<C>().cloned().ok_or_else(|| mismatch(type_id))
    }

    fn layout_provider<M>(&self, entry: &ModelEntry<M>) -> NameLayoutProvider<M> {
        let global = self.config.layout_layer::<M>();
        NameLayoutProvider::new(iter::once(&global).chain(&entry.layers))
    }

    fn request<'a>(
        &self,
        model: &'a str,
        field_id: &'a str,
        type_hint: &'a TypeHint,
        metadata: &'a Metadata,
    ) -> FieldRequest<'a> {
        FieldRequest {
            model,
            field_id,
            type_hint,
            metadata,
            strict_coercion: self.config.strict_coercion,
            debug_trail: self.config.debug_trail,
        }
    }

    fn compile_loader<M: Send + Sync + 'static>(
        &self,
        type_id: &str,
        entry: &ModelEntry<M>,
    ) -> Result<Loader<M>, CannotProvide> {
        let shape = entry
            .input
            .as_ref()
            .ok_or_else(|| CannotProvide::new(type_id, "model has no input shape"))?;
        let (layout, used) = self.layout_provider(entry).fused_input_layout(type_id, shape)?;

        let mut field_loaders = HashMap::with_capacity(used.fields.len());
        for field in &used.fields {
            let loader = match entry.field_loaders.get(&field.id) {
                Some(loader) => loader.clone(),
                None => self.codecs.field_loader(
                    self,
                    &self.request(type_id, &field.id, &field.type_hint, &field.metadata),
                )?,
            };
            field_loaders.insert(field.id.clone(), loader);
        }

        let props = LoaderProps {
            debug_trail: self.config.debug_trail,
            strict_coercion: self.config.strict_coercion,
            use_default_for_omitted: self.config.use_default_for_omitted,
        };
        let generated =
            generate_fused_loader(type_id, shape, &layout, &used, &field_loaders, props)?;
        tracing::debug!(
            model = type_id,
            direction = %Direction::Load,
            instructions = generated.program.instructions.len(),
            "compiling codec"
        );
        self.compiler.compile_loader(generated.program, generated.namespace)
    }

    fn compile_dumper<M: Record + Send + Sync + 'static>(
        &self,
        type_id: &str,
        entry: &ModelEntry<M>,
    ) -> Result<Dumper<M>, CannotProvide> {
        let shape = entry
            .output
            .as_ref()
            .ok_or_else(|| CannotProvide::new(type_id, "model has no output shape"))?;
        let (layout, used) = self.layout_provider(entry).fused_output_layout(type_id, shape)?;

        let mut field_dumpers = HashMap::with_capacity(used.fields.len());
        for field in &used.fields {
            let dumper = match entry.field_dumpers.get(&field.id) {
                Some(dumper) => dumper.clone(),
                None => self.codecs.field_dumper(
                    self,
                    &self.request(type_id, &field.id, &field.type_hint, &field.metadata),
                )?,
            };
            field_dumpers.insert(field.id.clone(), dumper);
        }

        let props = DumperProps {
            debug_trail: self.config.debug_trail,
        };
        let generated =
            generate_fused_dumper(type_id, shape, &layout, &used, &field_dumpers, props)?;
        tracing::debug!(
            model = type_id,
            direction = %Direction::Dump,
            instructions = generated.program.instructions.len(),
            "compiling codec"
        );
        self.compiler.compile_dumper(generated.program, generated.namespace)
    }
}

fn mismatch(type_id: &str) -> CannotProvide {
    CannotProvide::new(type_id, "model is registered with a different record type")
}

/// Failure of a one-shot [`Retort::load`] or [`Retort::dump`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    CannotProvide(#[from] CannotProvide),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Dump(#[from] DumpError),
}
