//! Load and dump programs: the compiled form of a (shape, crown) pair.
//!
//! A program references everything it calls (field codecs, accessors,
//! sieves, the constructor, ...) through symbols. The symbols name entries of
//! a [`Namespace`] that travels next to the program until it is linked into a
//! codec.

use core::fmt;
use std::collections::BTreeMap;

use crate::code_builder::CodeBuilder;
use crate::crown::{CrownKey, CrownPath, DictExtraPolicy, ListExtraPolicy, path_to_string};
use crate::shape::{
    Accessor, Constructor, Extractor, Factory, FieldDumper, FieldLoader, Saturator, Sieve,
};
use crate::trail::{DebugTrail, TrailElement};
use crate::value::Value;

pub const PROGRAM_ABI_V1: u32 = 1;

/// Index into a program's symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sym(pub usize);

/// Register holding a value of the external tree. `DataReg(0)` is the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataReg(pub usize);

/// Register holding a loaded (or dumped) field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldReg(pub usize);

/// Register holding extras collected at one mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtraReg(pub usize);

/// Index into a program's path table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathId(pub usize);

// ============================================================================
// Namespace
// ============================================================================

/// A value captured by a generated codec.
pub enum Capture<M> {
    FieldLoader(FieldLoader),
    FieldDumper(FieldDumper),
    Value(Value),
    Factory(Factory),
    Constructor(Constructor<M>),
    Saturator(Saturator<M>),
    Accessor(Accessor<M>),
    Sieve(Sieve<M>),
    Extractor(Extractor<M>),
}

impl<M> Capture<M> {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Capture::FieldLoader(_) => "field loader",
            Capture::FieldDumper(_) => "field dumper",
            Capture::Value(_) => "value",
            Capture::Factory(_) => "factory",
            Capture::Constructor(_) => "constructor",
            Capture::Saturator(_) => "saturator",
            Capture::Accessor(_) => "accessor",
            Capture::Sieve(_) => "sieve",
            Capture::Extractor(_) => "extractor",
        }
    }
}

impl<M> fmt::Debug for Capture<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capture::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Capture::Accessor(accessor) => f.debug_tuple("Accessor").field(accessor).finish(),
            other => write!(f, "<{}>", other.kind_name()),
        }
    }
}

/// Captured globals of one codec, keyed by generated names.
pub struct Namespace<M> {
    captures: BTreeMap<String, Capture<M>>,
}

impl<M> Default for Namespace<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Namespace<M> {
    pub fn new() -> Self {
        Self {
            captures: BTreeMap::new(),
        }
    }

    /// Adds a capture, returning the one previously stored under `name`.
    pub fn insert(&mut self, name: impl Into<String>, capture: Capture<M>) -> Option<Capture<M>> {
        self.captures.insert(name.into(), capture)
    }

    pub fn get(&self, name: &str) -> Option<&Capture<M>> {
        self.captures.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Capture<M>> {
        self.captures.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.captures.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.captures.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.captures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captures.is_empty()
    }
}

impl<M> fmt::Debug for Namespace<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.captures.iter()).finish()
    }
}

// ============================================================================
// Load programs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldTarget {
    /// Passed to the constructor as its own argument.
    Local(FieldReg),
    /// Collected into the `opt_fields` mapping under the param name.
    Packed(String),
}

/// What happens to a field whose key is absent from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnAbsent {
    /// The enclosing check already reported the key as missing.
    Required,
    Skip,
    /// Fill from a captured value or factory.
    Default(Sym),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadInstr {
    ExpectMapping {
        data: DataReg,
        path: PathId,
    },
    ExpectSequence {
        data: DataReg,
        path: PathId,
    },
    CheckExtraKeys {
        data: DataReg,
        path: PathId,
        known: Vec<String>,
        policy: DictExtraPolicy,
        sink: Option<ExtraReg>,
    },
    CheckRequiredKeys {
        data: DataReg,
        path: PathId,
        required: Vec<String>,
    },
    CheckLength {
        data: DataReg,
        path: PathId,
        expected: usize,
        policy: ListExtraPolicy,
    },
    Enter {
        data: DataReg,
        key: CrownKey,
        dst: DataReg,
        required: bool,
    },
    LoadField {
        data: DataReg,
        key: CrownKey,
        path: PathId,
        loader: Sym,
        target: FieldTarget,
        on_absent: OnAbsent,
    },
    NestExtra {
        child: ExtraReg,
        parent: ExtraReg,
        key: String,
    },
    /// Loads an extra-target field from collected extras, or from an empty
    /// mapping when nothing is collected.
    LoadExtraTarget {
        loader: Sym,
        target: FieldTarget,
        source: Option<ExtraReg>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgBinding {
    Positional(FieldReg),
    Keyword { name: String, field: FieldReg },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstructExtra {
    None,
    Kwargs(Option<ExtraReg>),
    Saturate {
        saturator: Sym,
        source: Option<ExtraReg>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadConstruction {
    pub constructor: Sym,
    pub args: Vec<ArgBinding>,
    pub packed: bool,
    pub extra: ConstructExtra,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadProgram {
    pub abi_version: u32,
    pub model: String,
    pub debug_trail: DebugTrail,
    pub strict_coercion: bool,
    pub data_count: usize,
    pub extra_count: usize,
    /// Names of field registers, indexed by `FieldReg`.
    pub locals: Vec<String>,
    pub paths: Vec<CrownPath>,
    pub symbols: Vec<String>,
    pub instructions: Vec<LoadInstr>,
    pub construction: LoadConstruction,
}

fn symbol(symbols: &[String], sym: Sym) -> &str {
    symbols.get(sym.0).map_or("<unbound>", String::as_str)
}

fn local(locals: &[String], reg: FieldReg) -> &str {
    locals.get(reg.0).map_or("<unbound>", String::as_str)
}

fn quoted(keys: &[String]) -> String {
    let parts: Vec<String> = keys.iter().map(|key| format!("{key:?}")).collect();
    format!("[{}]", parts.join(", "))
}

impl LoadProgram {
    pub fn path(&self, id: PathId) -> &[CrownKey] {
        self.paths.get(id.0).map_or(&[], |path| path.as_slice())
    }

    pub fn symbol(&self, sym: Sym) -> &str {
        symbol(&self.symbols, sym)
    }

    fn target(&self, target: &FieldTarget) -> String {
        match target {
            FieldTarget::Local(reg) => local(&self.locals, *reg).to_owned(),
            FieldTarget::Packed(name) => format!("opt_fields[{name:?}]"),
        }
    }

    /// Readable pseudo-source of the program body.
    pub fn render(&self) -> CodeBuilder {
        let mut out = CodeBuilder::new();
        out.line(&format!(
            "# abi {}, debug trail {:?}, strict coercion {}",
            self.abi_version, self.debug_trail, self.strict_coercion
        ));
        if !self.paths.is_empty() {
            out.line("# paths");
            for (idx, path) in self.paths.iter().enumerate() {
                out.line(&format!("# p{idx} -> {}", path_to_string(path)));
            }
        }
        out.empty_line();
        if self.construction.packed {
            out.line("opt_fields = {}");
        }
        for idx in 0..self.extra_count {
            out.line(&format!("e{idx} = {{}}"));
        }

        for instr in &self.instructions {
            match instr {
                LoadInstr::ExpectMapping { data, path } => {
                    out.line(&format!("expect_mapping(d{}) @ p{}", data.0, path.0));
                }
                LoadInstr::ExpectSequence { data, path } => {
                    out.line(&format!("expect_sequence(d{}) @ p{}", data.0, path.0));
                }
                LoadInstr::CheckExtraKeys {
                    data,
                    path,
                    known,
                    policy,
                    sink,
                } => {
                    let into = sink.map(|e| format!(" into e{}", e.0)).unwrap_or_default();
                    out.line(&format!(
                        "check_extra_keys(d{}, known={}, {policy:?}){into} @ p{}",
                        data.0,
                        quoted(known),
                        path.0
                    ));
                }
                LoadInstr::CheckRequiredKeys {
                    data,
                    path,
                    required,
                } => {
                    out.line(&format!(
                        "check_required_keys(d{}, {}) @ p{}",
                        data.0,
                        quoted(required),
                        path.0
                    ));
                }
                LoadInstr::CheckLength {
                    data,
                    path,
                    expected,
                    policy,
                } => {
                    out.line(&format!(
                        "check_length(d{}, {expected}, {policy:?}) @ p{}",
                        data.0, path.0
                    ));
                }
                LoadInstr::Enter {
                    data,
                    key,
                    dst,
                    required,
                } => {
                    let mode = if *required { "required" } else { "optional" };
                    out.line(&format!("d{} = d{}[{key}]  # {mode}", dst.0, data.0));
                }
                LoadInstr::LoadField {
                    data,
                    key,
                    path,
                    loader,
                    target,
                    on_absent,
                } => {
                    let absent = match on_absent {
                        OnAbsent::Required => "required".to_owned(),
                        OnAbsent::Skip => "skip if absent".to_owned(),
                        OnAbsent::Default(sym) => format!("else {}", self.symbol(*sym)),
                    };
                    out.line(&format!(
                        "{} = {}(d{}[{key}]) @ p{}  # {absent}",
                        self.target(target),
                        self.symbol(*loader),
                        data.0,
                        path.0
                    ));
                }
                LoadInstr::NestExtra { child, parent, key } => {
                    out.line(&format!("if e{}: e{}[{key:?}] = e{}", child.0, parent.0, child.0));
                }
                LoadInstr::LoadExtraTarget {
                    loader,
                    target,
                    source,
                } => {
                    let source = source.map_or("{}".to_owned(), |e| format!("e{}", e.0));
                    out.line(&format!(
                        "{} = {}({source})",
                        self.target(target),
                        self.symbol(*loader)
                    ));
                }
            }
        }

        out.empty_line();
        let construction = &self.construction;
        let mut call = CodeBuilder::new();
        call.line(&format!("{}(", self.symbol(construction.constructor)));
        call.indented(|b| {
            for arg in &construction.args {
                match arg {
                    ArgBinding::Positional(reg) => {
                        b.line(&format!("{},", local(&self.locals, *reg)));
                    }
                    ArgBinding::Keyword { name, field } => {
                        b.line(&format!("{name}={},", local(&self.locals, *field)));
                    }
                }
            }
            if construction.packed {
                b.line("**opt_fields,");
            }
            if let ConstructExtra::Kwargs(source) = &construction.extra {
                let source = source.map_or("{}".to_owned(), |e| format!("e{}", e.0));
                b.line(&format!("**{source},"));
            }
        });
        call.line(")");

        match &construction.extra {
            ConstructExtra::Saturate { saturator, source } => {
                let source = source.map_or("{}".to_owned(), |e| format!("e{}", e.0));
                out.line("result = ");
                out.extend_including(&call);
                out.line(&format!("{}(result, {source})", self.symbol(*saturator)));
                out.line("return result");
            }
            ConstructExtra::None | ConstructExtra::Kwargs(_) => {
                out.line("return ");
                out.extend_including(&call);
            }
        }
        out
    }
}

// ============================================================================
// Dump programs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpInstr {
    /// Reads a field through its accessor, filters it, and dumps it.
    ExtractField {
        field: FieldReg,
        accessor: Sym,
        required: bool,
        sieve: Option<Sym>,
        dumper: Sym,
    },
    /// Merges a dumped mapping field into the root extras.
    MergeExtraTarget {
        field: FieldReg,
        trail: TrailElement,
    },
    ExtractExtra {
        extractor: Sym,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryGuard {
    Always,
    /// Omitted when the field register is empty.
    IfPresent,
    /// Omitted when the sieve rejects the built value.
    Sieve(Sym),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEntry {
    pub key: String,
    pub node: BuildNode,
    pub guard: EntryGuard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildNode {
    Dict(Vec<BuildEntry>),
    List(Vec<BuildNode>),
    Field(FieldReg),
    Filler(Sym),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpProgram {
    pub abi_version: u32,
    pub model: String,
    pub debug_trail: DebugTrail,
    pub locals: Vec<String>,
    pub symbols: Vec<String>,
    pub instructions: Vec<DumpInstr>,
    pub root: BuildNode,
    pub has_extra: bool,
}

impl DumpProgram {
    pub fn symbol(&self, sym: Sym) -> &str {
        symbol(&self.symbols, sym)
    }

    pub fn render(&self) -> CodeBuilder {
        let mut out = CodeBuilder::new();
        out.line(&format!(
            "# abi {}, debug trail {:?}",
            self.abi_version, self.debug_trail
        ));
        out.empty_line();
        if self.has_extra {
            out.line("extra = {}");
        }
        for instr in &self.instructions {
            match instr {
                DumpInstr::ExtractField {
                    field,
                    accessor,
                    required,
                    sieve,
                    dumper,
                } => {
                    let name = local(&self.locals, *field);
                    let read = format!("{}(model)", self.symbol(*accessor));
                    let mut line = if *required {
                        format!("raw = {read}")
                    } else {
                        format!("raw = {read} or skip")
                    };
                    if let Some(sieve) = sieve {
                        line.push_str(&format!("; keep if {}(model, raw)", self.symbol(*sieve)));
                    }
                    out.line(&line);
                    out.line(&format!("{name} = {}(raw)", self.symbol(*dumper)));
                }
                DumpInstr::MergeExtraTarget { field, .. } => {
                    out.line(&format!("extra.update({})", local(&self.locals, *field)));
                }
                DumpInstr::ExtractExtra { extractor } => {
                    out.line(&format!("extra.update({}(model))", self.symbol(*extractor)));
                }
            }
        }
        out.empty_line();
        out.line("return ");
        let mut tree = CodeBuilder::new();
        self.render_node(&self.root, &mut tree);
        out.extend_including(&tree);
        if self.has_extra {
            out.include(" | extra");
        }
        out
    }

    fn render_node(&self, node: &BuildNode, out: &mut CodeBuilder) {
        match node {
            BuildNode::Field(reg) => {
                out.include(local(&self.locals, *reg));
            }
            BuildNode::Filler(sym) => {
                out.include(self.symbol(*sym));
            }
            BuildNode::List(items) => {
                out.include("[");
                out.indented(|b| {
                    for item in items {
                        b.line("");
                        self.render_node(item, b);
                        b.include(",");
                    }
                });
                out.line("]");
            }
            BuildNode::Dict(entries) => {
                out.include("{");
                out.indented(|b| {
                    for entry in entries {
                        let guard = match entry.guard {
                            EntryGuard::Always => String::new(),
                            EntryGuard::IfPresent => "  # if present".to_owned(),
                            EntryGuard::Sieve(sym) => format!("  # if {}", self.symbol(sym)),
                        };
                        b.line(&format!("{:?}: ", entry.key));
                        self.render_node(&entry.node, b);
                        b.include(&format!(",{guard}"));
                    }
                });
                out.line("}");
            }
        }
    }
}
