use std::collections::{HashMap, HashSet};

use crown_ir::{CrownKey, FieldReg, Sym};

/// What a generated name stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity<'a> {
    FieldLoader(&'a str),
    FieldDumper(&'a str),
    Default(&'a str),
    Accessor(&'a str),
    Sieve(&'a [CrownKey]),
    Filler(&'a [CrownKey]),
    Constructor,
    Saturator,
    Extractor,
}

impl Entity<'_> {
    fn prefix(&self) -> &'static str {
        match self {
            Entity::FieldLoader(_) => "loader",
            Entity::FieldDumper(_) => "dumper",
            Entity::Default(_) => "default",
            Entity::Accessor(_) => "accessor",
            Entity::Sieve(_) => "sieve",
            Entity::Filler(_) => "filler",
            Entity::Constructor => "constructor",
            Entity::Saturator => "saturator",
            Entity::Extractor => "extractor",
        }
    }

    fn stem(&self) -> String {
        match self {
            Entity::FieldLoader(id)
            | Entity::FieldDumper(id)
            | Entity::Default(id)
            | Entity::Accessor(id) => format!("{}_{}", self.prefix(), sanitize(id)),
            Entity::Sieve(path) | Entity::Filler(path) => {
                let mut stem = self.prefix().to_owned();
                for key in *path {
                    stem.push('_');
                    match key {
                        CrownKey::Key(key) => stem.push_str(&sanitize(key)),
                        CrownKey::Index(index) => stem.push_str(&index.to_string()),
                    }
                }
                stem
            }
            Entity::Constructor | Entity::Saturator | Entity::Extractor => {
                self.prefix().to_owned()
            }
        }
    }
}

fn sanitize(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() { "_".to_owned() } else { cleaned }
}

/// Deterministic names for everything a generated codec refers to.
///
/// Globals get a kind prefix (`loader_`, `sieve_`, ...) and locals get
/// `field_`, so user-controlled ids never collide with each other or with
/// the fixed names of the program. Binding the same entity twice returns
/// the same name.
#[derive(Debug, Default)]
pub struct VarBinder {
    taken: HashSet<String>,
    symbols: Vec<String>,
    bound: HashMap<(&'static str, String), Sym>,
    locals: Vec<String>,
    bound_locals: HashMap<String, FieldReg>,
}

impl VarBinder {
    pub fn new() -> Self {
        Self::default()
    }

    fn unique(&mut self, stem: String) -> String {
        let mut name = stem.clone();
        let mut n = 1;
        while !self.taken.insert(name.clone()) {
            name = format!("{stem}_{n}");
            n += 1;
        }
        name
    }

    /// Symbol for `entity`, allocated on first use.
    pub fn symbol(&mut self, entity: Entity<'_>) -> Sym {
        let stem = entity.stem();
        let key = (entity.prefix(), format!("{entity:?}"));
        if let Some(sym) = self.bound.get(&key) {
            return *sym;
        }
        let name = self.unique(stem);
        let sym = Sym(self.symbols.len());
        self.symbols.push(name);
        self.bound.insert(key, sym);
        sym
    }

    pub fn name(&self, sym: Sym) -> &str {
        self.symbols.get(sym.0).map_or("", String::as_str)
    }

    /// Register holding the value of field `id`.
    pub fn local(&mut self, id: &str) -> FieldReg {
        if let Some(reg) = self.bound_locals.get(id) {
            return *reg;
        }
        let name = self.unique(format!("field_{}", sanitize(id)));
        let reg = FieldReg(self.locals.len());
        self.locals.push(name);
        self.bound_locals.insert(id.to_owned(), reg);
        reg
    }

    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    /// Symbol table and local names, indexed by `Sym` and `FieldReg`.
    pub fn into_tables(self) -> (Vec<String>, Vec<String>) {
        (self.symbols, self.locals)
    }
}
