//! Linking programs against their namespaces and handing out named closures.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crown_ir::{
    ArgBinding, BuildNode, CannotProvide, Capture, CodeBuilder, ConstructExtra, DumpInstr,
    DumpProgram, EntryGuard, FieldTarget, LoadInstr, LoadProgram, Namespace, OnAbsent,
    PROGRAM_ABI_V1, Record, Sym,
};
use parking_lot::Mutex;

use crate::dump::{
    LinkedDumpInstr, LinkedDumper, LinkedEntry, LinkedFiller, LinkedGuard, LinkedNode,
};
use crate::load::{
    LinkedAbsent, LinkedArg, LinkedExtra, LinkedLoadInstr, LinkedLoader, LinkedTarget,
};
use crate::{Dumper, Loader};

/// What a code-gen hook sees for every compiled codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeGenHookData {
    pub closure_name: String,
    pub source: String,
    pub namespace: Vec<String>,
}

pub type CodeGenHook = Arc<dyn Fn(&CodeGenHookData) + Send + Sync>;

/// Hook that keeps every generated source, in compilation order.
#[derive(Debug, Default, Clone)]
pub struct CodeGenAccumulator {
    list: Arc<Mutex<Vec<CodeGenHookData>>>,
}

impl CodeGenAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hook(&self) -> CodeGenHook {
        let list = Arc::clone(&self.list);
        Arc::new(move |data| list.lock().push(data.clone()))
    }

    pub fn list(&self) -> Vec<CodeGenHookData> {
        self.list.lock().clone()
    }

    /// Sources keyed by closure name.
    pub fn sources(&self) -> HashMap<String, String> {
        self.list
            .lock()
            .iter()
            .map(|data| (data.closure_name.clone(), data.source.clone()))
            .collect()
    }
}

/// Turns programs into callable codecs.
///
/// Every closure gets a name unique within this compiler, built from the
/// model id, the direction and a per-name counter.
pub struct ClosureCompiler {
    counters: Mutex<HashMap<String, usize>>,
    hook: Option<CodeGenHook>,
}

impl Default for ClosureCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClosureCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureCompiler")
            .field("hook", &self.hook.is_some())
            .finish_non_exhaustive()
    }
}

impl ClosureCompiler {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            hook: None,
        }
    }

    pub fn with_hook(hook: CodeGenHook) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            hook: Some(hook),
        }
    }

    fn closure_name(&self, base: String) -> String {
        let mut counters = self.counters.lock();
        let n = counters.entry(base.clone()).or_insert(0);
        let name = format!("{base}_{n}");
        *n += 1;
        name
    }

    fn emit<M>(&self, name: &str, header: &str, body: &CodeBuilder, namespace: &Namespace<M>) {
        let mut source = CodeBuilder::new();
        source.line(header);
        source.indented(|b| {
            b.extend(body);
        });
        let source = source.string();
        tracing::trace!(closure = name, "generated source:\n{source}");
        if let Some(hook) = &self.hook {
            hook(&CodeGenHookData {
                closure_name: name.to_owned(),
                source,
                namespace: namespace.names().map(str::to_owned).collect(),
            });
        }
    }

    pub fn compile_loader<M: 'static>(
        &self,
        program: LoadProgram,
        namespace: Namespace<M>,
    ) -> Result<Loader<M>, CannotProvide> {
        check_abi(&program.model, program.abi_version)?;
        let name = self.closure_name(format!("{}_loader", sanitize(&program.model)));
        self.emit(&name, &format!("fn {name}(data):"), &program.render(), &namespace);
        let linked = link_loader(&program, &namespace)?;
        Ok(Loader::new(name, move |data| linked.run(data)))
    }

    pub fn compile_dumper<M: Record + 'static>(
        &self,
        program: DumpProgram,
        namespace: Namespace<M>,
    ) -> Result<Dumper<M>, CannotProvide> {
        check_abi(&program.model, program.abi_version)?;
        let name = self.closure_name(format!("{}_dumper", sanitize(&program.model)));
        self.emit(&name, &format!("fn {name}(model):"), &program.render(), &namespace);
        let linked = link_dumper(&program, &namespace)?;
        Ok(Dumper::new(name, move |model| linked.run(model)))
    }
}

fn sanitize(model: &str) -> String {
    model
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn check_abi(model: &str, version: u32) -> Result<(), CannotProvide> {
    if version == PROGRAM_ABI_V1 {
        Ok(())
    } else {
        Err(CannotProvide::new(
            model,
            format_args!("unsupported program abi version {version}"),
        ))
    }
}

// ============================================================================
// Linking
// ============================================================================

struct Linker<'p, M> {
    model: &'p str,
    symbols: &'p [String],
    namespace: &'p Namespace<M>,
}

macro_rules! expect_capture {
    ($linker:expr, $sym:expr, $variant:ident, $what:literal) => {{
        match $linker.capture($sym)? {
            Capture::$variant(inner) => Ok(inner.clone()),
            other => Err($linker.mismatch($sym, $what, other.kind_name())),
        }
    }};
}

impl<'p, M> Linker<'p, M> {
    fn name(&self, sym: Sym) -> Result<&'p str, CannotProvide> {
        self.symbols.get(sym.0).map(String::as_str).ok_or_else(|| {
            CannotProvide::new(self.model, format_args!("symbol #{} is not declared", sym.0))
        })
    }

    fn capture(&self, sym: Sym) -> Result<&'p Capture<M>, CannotProvide> {
        let name = self.name(sym)?;
        self.namespace.get(name).ok_or_else(|| {
            CannotProvide::new(self.model, format_args!("`{name}` is not captured"))
        })
    }

    fn mismatch(&self, sym: Sym, expected: &str, found: &str) -> CannotProvide {
        let name = self.symbols.get(sym.0).map_or("?", String::as_str);
        CannotProvide::new(
            self.model,
            format_args!("`{name}` must be a {expected}, found a {found}"),
        )
    }

    fn filler(&self, sym: Sym) -> Result<LinkedFiller, CannotProvide> {
        match self.capture(sym)? {
            Capture::Value(value) => Ok(LinkedFiller::Value(value.clone())),
            Capture::Factory(factory) => Ok(LinkedFiller::Factory(factory.clone())),
            other => Err(self.mismatch(sym, "value or factory", other.kind_name())),
        }
    }
}

fn link_target(target: &FieldTarget) -> LinkedTarget {
    match target {
        FieldTarget::Local(reg) => LinkedTarget::Local(*reg),
        FieldTarget::Packed(name) => LinkedTarget::Packed(name.clone()),
    }
}

fn link_loader<M>(
    program: &LoadProgram,
    namespace: &Namespace<M>,
) -> Result<LinkedLoader<M>, CannotProvide> {
    let linker = Linker {
        model: &program.model,
        symbols: &program.symbols,
        namespace,
    };

    let mut instructions = Vec::with_capacity(program.instructions.len());
    for instr in &program.instructions {
        let linked = match instr {
            LoadInstr::ExpectMapping { data, path } => LinkedLoadInstr::ExpectMapping {
                data: data.0,
                path: *path,
            },
            LoadInstr::ExpectSequence { data, path } => LinkedLoadInstr::ExpectSequence {
                data: data.0,
                path: *path,
            },
            LoadInstr::CheckExtraKeys {
                data,
                path,
                known,
                policy,
                sink,
            } => LinkedLoadInstr::CheckExtraKeys {
                data: data.0,
                path: *path,
                known: known.iter().cloned().collect::<BTreeSet<_>>(),
                policy: *policy,
                sink: *sink,
            },
            LoadInstr::CheckRequiredKeys {
                data,
                path,
                required,
            } => LinkedLoadInstr::CheckRequiredKeys {
                data: data.0,
                path: *path,
                required: required.clone(),
            },
            LoadInstr::CheckLength {
                data,
                path,
                expected,
                policy,
            } => LinkedLoadInstr::CheckLength {
                data: data.0,
                path: *path,
                expected: *expected,
                policy: *policy,
            },
            LoadInstr::Enter {
                data,
                key,
                dst,
                required,
            } => LinkedLoadInstr::Enter {
                data: data.0,
                key: key.clone(),
                dst: dst.0,
                required: *required,
            },
            LoadInstr::LoadField {
                data,
                key,
                path,
                loader,
                target,
                on_absent,
            } => LinkedLoadInstr::LoadField {
                data: data.0,
                key: key.clone(),
                path: *path,
                loader: expect_capture!(linker, *loader, FieldLoader, "field loader")?,
                target: link_target(target),
                on_absent: match on_absent {
                    OnAbsent::Required => LinkedAbsent::Required,
                    OnAbsent::Skip => LinkedAbsent::Skip,
                    OnAbsent::Default(sym) => match linker.filler(*sym)? {
                        LinkedFiller::Value(value) => LinkedAbsent::Value(value),
                        LinkedFiller::Factory(factory) => LinkedAbsent::Factory(factory),
                    },
                },
            },
            LoadInstr::NestExtra { child, parent, key } => LinkedLoadInstr::NestExtra {
                child: *child,
                parent: *parent,
                key: key.clone(),
            },
            LoadInstr::LoadExtraTarget {
                loader,
                target,
                source,
            } => LinkedLoadInstr::LoadExtraTarget {
                loader: expect_capture!(linker, *loader, FieldLoader, "field loader")?,
                target: link_target(target),
                source: *source,
            },
        };
        instructions.push(linked);
    }

    let construction = &program.construction;
    let constructor =
        expect_capture!(linker, construction.constructor, Constructor, "constructor")?;
    let args = construction
        .args
        .iter()
        .map(|arg| match arg {
            ArgBinding::Positional(reg) => LinkedArg::Positional(*reg),
            ArgBinding::Keyword { name, field } => LinkedArg::Keyword(name.clone(), *field),
        })
        .collect();
    let extra = match &construction.extra {
        ConstructExtra::None => LinkedExtra::None,
        ConstructExtra::Kwargs(source) => LinkedExtra::Kwargs(*source),
        ConstructExtra::Saturate { saturator, source } => LinkedExtra::Saturate(
            expect_capture!(linker, *saturator, Saturator, "saturator")?,
            *source,
        ),
    };

    Ok(LinkedLoader {
        model: program.model.clone(),
        debug_trail: program.debug_trail,
        strict_coercion: program.strict_coercion,
        data_count: program.data_count,
        extra_count: program.extra_count,
        locals: program.locals.clone(),
        paths: program.paths.clone(),
        instructions,
        constructor,
        args,
        packed: construction.packed,
        extra,
    })
}

fn link_node<M>(linker: &Linker<'_, M>, node: &BuildNode) -> Result<LinkedNode<M>, CannotProvide> {
    Ok(match node {
        BuildNode::Field(reg) => LinkedNode::Field(*reg),
        BuildNode::Filler(sym) => LinkedNode::Filler(linker.filler(*sym)?),
        BuildNode::List(items) => LinkedNode::List(
            items
                .iter()
                .map(|item| link_node(linker, item))
                .collect::<Result<_, _>>()?,
        ),
        BuildNode::Dict(entries) => {
            let mut linked = Vec::with_capacity(entries.len());
            for entry in entries {
                let guard = match entry.guard {
                    EntryGuard::Always => LinkedGuard::Always,
                    EntryGuard::IfPresent => LinkedGuard::IfPresent,
                    EntryGuard::Sieve(sym) => {
                        LinkedGuard::Sieve(expect_capture!(linker, sym, Sieve, "sieve")?)
                    }
                };
                linked.push(LinkedEntry {
                    key: entry.key.clone(),
                    node: link_node(linker, &entry.node)?,
                    guard,
                });
            }
            LinkedNode::Dict(linked)
        }
    })
}

fn link_dumper<M>(
    program: &DumpProgram,
    namespace: &Namespace<M>,
) -> Result<LinkedDumper<M>, CannotProvide> {
    let linker = Linker {
        model: &program.model,
        symbols: &program.symbols,
        namespace,
    };

    let mut instructions = Vec::with_capacity(program.instructions.len());
    for instr in &program.instructions {
        instructions.push(match instr {
            DumpInstr::ExtractField {
                field,
                accessor,
                sieve,
                dumper,
                ..
            } => LinkedDumpInstr::ExtractField {
                field: *field,
                accessor: expect_capture!(linker, *accessor, Accessor, "accessor")?,
                sieve: match sieve {
                    Some(sym) => Some(expect_capture!(linker, *sym, Sieve, "sieve")?),
                    None => None,
                },
                dumper: expect_capture!(linker, *dumper, FieldDumper, "field dumper")?,
            },
            DumpInstr::MergeExtraTarget { field, trail } => LinkedDumpInstr::MergeExtraTarget {
                field: *field,
                trail: trail.clone(),
            },
            DumpInstr::ExtractExtra { extractor } => LinkedDumpInstr::ExtractExtra {
                extractor: expect_capture!(linker, *extractor, Extractor, "extractor")?,
            },
        });
    }

    Ok(LinkedDumper {
        model: program.model.clone(),
        debug_trail: program.debug_trail,
        field_count: program.locals.len(),
        instructions,
        root: link_node(&linker, &program.root)?,
        has_extra: program.has_extra,
    })
}
