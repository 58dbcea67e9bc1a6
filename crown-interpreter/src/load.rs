use std::borrow::Cow;
use std::collections::BTreeSet;

use crown_ir::{
    Constructor, ConstructorArgs, CrownKey, CrownPath, DebugTrail, DictExtraPolicy, ExtraReg,
    Factory, FieldLoader, FieldReg, ListExtraPolicy, LoadError, LoadErrorKind, Map, PathId,
    Saturator, Value, ValueKind, extend_path, path_trail,
};

#[derive(Debug, Clone)]
enum Slot<'a> {
    Absent,
    /// The value is missing or malformed and that was already reported.
    Poisoned,
    Present(Cow<'a, Value>),
}

impl<'a> Slot<'a> {
    fn child(&self, key: &CrownKey) -> Slot<'a> {
        match self {
            Slot::Absent => Slot::Absent,
            Slot::Poisoned => Slot::Poisoned,
            Slot::Present(Cow::Borrowed(value)) => match lookup(*value, key) {
                Some(child) => Slot::Present(Cow::Borrowed(child)),
                None => Slot::Absent,
            },
            Slot::Present(Cow::Owned(value)) => match lookup(value, key) {
                Some(child) => Slot::Present(Cow::Owned(child.clone())),
                None => Slot::Absent,
            },
        }
    }

    fn value(&self) -> Option<&Value> {
        match self {
            Slot::Present(value) => Some(value),
            Slot::Absent | Slot::Poisoned => None,
        }
    }
}

fn lookup<'v>(value: &'v Value, key: &CrownKey) -> Option<&'v Value> {
    match key {
        CrownKey::Key(key) => value.as_object()?.get(key),
        CrownKey::Index(index) => value.as_array()?.get(*index),
    }
}

pub(crate) enum LinkedAbsent {
    Required,
    Skip,
    Value(Value),
    Factory(Factory),
}

pub(crate) enum LinkedTarget {
    Local(FieldReg),
    Packed(String),
}

pub(crate) enum LinkedLoadInstr {
    ExpectMapping {
        data: usize,
        path: PathId,
    },
    ExpectSequence {
        data: usize,
        path: PathId,
    },
    CheckExtraKeys {
        data: usize,
        path: PathId,
        known: BTreeSet<String>,
        policy: DictExtraPolicy,
        sink: Option<ExtraReg>,
    },
    CheckRequiredKeys {
        data: usize,
        path: PathId,
        required: Vec<String>,
    },
    CheckLength {
        data: usize,
        path: PathId,
        expected: usize,
        policy: ListExtraPolicy,
    },
    Enter {
        data: usize,
        key: CrownKey,
        dst: usize,
        required: bool,
    },
    LoadField {
        data: usize,
        key: CrownKey,
        path: PathId,
        loader: FieldLoader,
        target: LinkedTarget,
        on_absent: LinkedAbsent,
    },
    NestExtra {
        child: ExtraReg,
        parent: ExtraReg,
        key: String,
    },
    LoadExtraTarget {
        loader: FieldLoader,
        target: LinkedTarget,
        source: Option<ExtraReg>,
    },
}

pub(crate) enum LinkedArg {
    Positional(FieldReg),
    Keyword(String, FieldReg),
}

pub(crate) enum LinkedExtra<M> {
    None,
    Kwargs(Option<ExtraReg>),
    Saturate(Saturator<M>, Option<ExtraReg>),
}

pub(crate) struct LinkedLoader<M> {
    pub model: String,
    pub debug_trail: DebugTrail,
    pub strict_coercion: bool,
    pub data_count: usize,
    pub extra_count: usize,
    pub locals: Vec<String>,
    pub paths: Vec<CrownPath>,
    pub instructions: Vec<LinkedLoadInstr>,
    pub constructor: Constructor<M>,
    pub args: Vec<LinkedArg>,
    pub packed: bool,
    pub extra: LinkedExtra<M>,
}

struct Frame<'a> {
    slots: Vec<Slot<'a>>,
    fields: Vec<Option<Value>>,
    packed: Map<String, Value>,
    extras: Vec<Map<String, Value>>,
}

impl Frame<'_> {
    fn store(&mut self, target: &LinkedTarget, value: Value) {
        match target {
            LinkedTarget::Local(reg) => {
                if let Some(slot) = self.fields.get_mut(reg.0) {
                    *slot = Some(value);
                }
            }
            LinkedTarget::Packed(name) => {
                self.packed.insert(name.clone(), value);
            }
        }
    }

    fn take_extra(&mut self, reg: Option<ExtraReg>) -> Map<String, Value> {
        reg.and_then(|reg| self.extras.get_mut(reg.0))
            .map(std::mem::take)
            .unwrap_or_default()
    }
}

impl<M> LinkedLoader<M> {
    fn located(&self, err: LoadError, path: PathId) -> LoadError {
        if self.debug_trail == DebugTrail::Disable {
            return err;
        }
        match self.paths.get(path.0) {
            Some(path) => extend_path(err, path_trail(path)),
            None => err,
        }
    }

    pub fn run(&self, input: &Value) -> Result<M, LoadError> {
        let mut frame = Frame {
            slots: vec![Slot::Absent; self.data_count.max(1)],
            fields: vec![None; self.locals.len()],
            packed: Map::new(),
            extras: vec![Map::new(); self.extra_count],
        };
        frame.slots[0] = Slot::Present(Cow::Borrowed(input));

        let mut errors = Vec::new();
        for instr in &self.instructions {
            if let Err(err) = self.step(instr, &mut frame) {
                match self.debug_trail {
                    DebugTrail::Disable | DebugTrail::First => return Err(err),
                    DebugTrail::All => errors.push(err),
                }
            }
        }
        if !errors.is_empty() {
            return Err(LoadError::aggregate(
                format!("while loading model {}", self.model),
                errors,
            ));
        }
        self.construct(frame)
    }

    fn step<'a>(&self, instr: &LinkedLoadInstr, frame: &mut Frame<'a>) -> Result<(), LoadError> {
        match instr {
            LinkedLoadInstr::ExpectMapping { data, path } => {
                let Some(value) = frame.slots[*data].value() else {
                    return Ok(());
                };
                if value.is_object() {
                    return Ok(());
                }
                let err = LoadError::type_error(ValueKind::Mapping, value.clone());
                frame.slots[*data] = Slot::Poisoned;
                Err(self.located(err, *path))
            }
            LinkedLoadInstr::ExpectSequence { data, path } => {
                let Some(value) = frame.slots[*data].value() else {
                    return Ok(());
                };
                let err = match value {
                    Value::Array(_) => return Ok(()),
                    Value::String(text) if !self.strict_coercion => {
                        let chars = text.chars().map(|c| Value::String(c.to_string())).collect();
                        frame.slots[*data] = Slot::Present(Cow::Owned(Value::Array(chars)));
                        return Ok(());
                    }
                    Value::String(_) => {
                        LoadError::excluded_type(ValueKind::Sequence, ValueKind::Str, value.clone())
                    }
                    other => LoadError::type_error(ValueKind::Sequence, other.clone()),
                };
                frame.slots[*data] = Slot::Poisoned;
                Err(self.located(err, *path))
            }
            LinkedLoadInstr::CheckExtraKeys {
                data,
                path,
                known,
                policy,
                sink,
            } => {
                let Some(Value::Object(map)) = frame.slots[*data].value() else {
                    return Ok(());
                };
                match policy {
                    DictExtraPolicy::Skip => Ok(()),
                    DictExtraPolicy::Forbid => {
                        let extras: BTreeSet<String> = map
                            .keys()
                            .filter(|key| !known.contains(*key))
                            .cloned()
                            .collect();
                        if extras.is_empty() {
                            return Ok(());
                        }
                        let err = LoadError::new(LoadErrorKind::ExtraFields {
                            extras,
                            got: Value::Object(map.clone()),
                        });
                        Err(self.located(err, *path))
                    }
                    DictExtraPolicy::Collect => {
                        let collected: Map<String, Value> = map
                            .iter()
                            .filter(|(key, _)| !known.contains(*key))
                            .map(|(key, value)| (key.clone(), value.clone()))
                            .collect();
                        if let Some(sink) = sink.and_then(|sink| frame.extras.get_mut(sink.0)) {
                            *sink = collected;
                        }
                        Ok(())
                    }
                }
            }
            LinkedLoadInstr::CheckRequiredKeys {
                data,
                path,
                required,
            } => {
                let Some(Value::Object(map)) = frame.slots[*data].value() else {
                    return Ok(());
                };
                let missing: BTreeSet<String> = required
                    .iter()
                    .filter(|key| !map.contains_key(*key))
                    .cloned()
                    .collect();
                if missing.is_empty() {
                    return Ok(());
                }
                let err = LoadError::new(LoadErrorKind::NoRequiredFields {
                    missing,
                    got: Value::Object(map.clone()),
                });
                Err(self.located(err, *path))
            }
            LinkedLoadInstr::CheckLength {
                data,
                path,
                expected,
                policy,
            } => {
                let Some(Value::Array(items)) = frame.slots[*data].value() else {
                    return Ok(());
                };
                let got = Value::Array(items.clone());
                let err = if items.len() < *expected {
                    LoadError::new(LoadErrorKind::NoRequiredItems {
                        expected_len: *expected,
                        got,
                    })
                } else if items.len() > *expected && *policy == ListExtraPolicy::Forbid {
                    LoadError::new(LoadErrorKind::ExtraItems {
                        expected_len: *expected,
                        got,
                    })
                } else {
                    return Ok(());
                };
                Err(self.located(err, *path))
            }
            LinkedLoadInstr::Enter {
                data,
                key,
                dst,
                required,
            } => {
                let child = match frame.slots[*data].child(key) {
                    Slot::Absent if *required => Slot::Poisoned,
                    other => other,
                };
                frame.slots[*dst] = child;
                Ok(())
            }
            LinkedLoadInstr::LoadField {
                data,
                key,
                path,
                loader,
                target,
                on_absent,
            } => {
                let loaded = match &frame.slots[*data] {
                    Slot::Poisoned => return Ok(()),
                    Slot::Absent => None,
                    Slot::Present(value) => match lookup(value, key) {
                        Some(raw) => Some(loader(raw).map_err(|err| self.located(err, *path))?),
                        None => None,
                    },
                };
                let value = match (loaded, on_absent) {
                    (Some(value), _) => value,
                    (None, LinkedAbsent::Required | LinkedAbsent::Skip) => return Ok(()),
                    (None, LinkedAbsent::Value(value)) => value.clone(),
                    (None, LinkedAbsent::Factory(factory)) => factory(),
                };
                frame.store(target, value);
                Ok(())
            }
            LinkedLoadInstr::NestExtra { child, parent, key } => {
                let nested = frame.take_extra(Some(*child));
                if !nested.is_empty()
                    && let Some(parent) = frame.extras.get_mut(parent.0)
                {
                    parent.insert(key.clone(), Value::Object(nested));
                }
                Ok(())
            }
            LinkedLoadInstr::LoadExtraTarget {
                loader,
                target,
                source,
            } => {
                let extras = source
                    .and_then(|reg| frame.extras.get(reg.0))
                    .cloned()
                    .unwrap_or_default();
                if extras.is_empty() && matches!(target, LinkedTarget::Packed(_)) {
                    return Ok(());
                }
                let value = loader(&Value::Object(extras))?;
                frame.store(target, value);
                Ok(())
            }
        }
    }

    fn construct(&self, mut frame: Frame<'_>) -> Result<M, LoadError> {
        let mut args = ConstructorArgs::default();
        for arg in &self.args {
            let (reg, keyword) = match arg {
                LinkedArg::Positional(reg) => (reg, None),
                LinkedArg::Keyword(name, reg) => (reg, Some(name)),
            };
            let Some(value) = frame.fields.get_mut(reg.0).and_then(Option::take) else {
                let local = self.locals.get(reg.0).map_or("?", String::as_str);
                return Err(LoadError::value(
                    format!("`{local}` was not loaded"),
                    Value::Null,
                ));
            };
            match keyword {
                Some(name) => {
                    args.keyword.insert(name.clone(), value);
                }
                None => args.positional.push(value),
            }
        }
        if self.packed {
            args.keyword.extend(std::mem::take(&mut frame.packed));
        }

        match &self.extra {
            LinkedExtra::None => (self.constructor)(args),
            LinkedExtra::Kwargs(source) => {
                args.keyword.extend(frame.take_extra(*source));
                (self.constructor)(args)
            }
            LinkedExtra::Saturate(saturator, source) => {
                let extras = frame.take_extra(*source);
                let mut instance = (self.constructor)(args)?;
                saturator(&mut instance, extras)?;
                Ok(instance)
            }
        }
    }
}
