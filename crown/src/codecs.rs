//! Per-field codecs.
//!
//! A model codec delegates every field value to a [`FieldLoader`] or
//! [`FieldDumper`]. [`BuiltinCodecs`] covers each [`TypeHint`]; containers
//! recurse into their item hint and nested models are compiled by the
//! retort on demand.

use std::sync::Arc;

use crown_ir::{
    CannotProvide, DebugTrail, DumpError, FieldDumper, FieldLoader, LoadError, Map, Metadata,
    TrailElement, Trailed, TypeHint, Value, ValueKind, append_path,
};

use crate::retort::Retort;

/// A field a codec is requested for.
#[derive(Debug, Clone, Copy)]
pub struct FieldRequest<'a> {
    pub model: &'a str,
    pub field_id: &'a str,
    pub type_hint: &'a TypeHint,
    pub metadata: &'a Metadata,
    pub strict_coercion: bool,
    pub debug_trail: DebugTrail,
}

/// Source of per-field codecs for a [`Retort`].
pub trait FieldCodecProvider: Send + Sync {
    fn field_loader(
        &self,
        retort: &Retort,
        request: &FieldRequest<'_>,
    ) -> Result<FieldLoader, CannotProvide>;

    fn field_dumper(
        &self,
        retort: &Retort,
        request: &FieldRequest<'_>,
    ) -> Result<FieldDumper, CannotProvide>;
}

/// Codecs for every [`TypeHint`].
///
/// Scalars are checked on load and passed through on dump. With
/// `strict_coercion` off, strings are parsed into numbers, scalars are
/// accepted as strings and a string at a list position is split into
/// characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinCodecs;

impl FieldCodecProvider for BuiltinCodecs {
    fn field_loader(
        &self,
        retort: &Retort,
        request: &FieldRequest<'_>,
    ) -> Result<FieldLoader, CannotProvide> {
        loader_for(retort, request.type_hint, request)
    }

    fn field_dumper(
        &self,
        retort: &Retort,
        request: &FieldRequest<'_>,
    ) -> Result<FieldDumper, CannotProvide> {
        dumper_for(retort, request.type_hint, request)
    }
}

fn loader_for(
    retort: &Retort,
    hint: &TypeHint,
    request: &FieldRequest<'_>,
) -> Result<FieldLoader, CannotProvide> {
    let strict = request.strict_coercion;
    let trail = request.debug_trail;
    let loader: FieldLoader = match hint {
        TypeHint::Any => Arc::new(|data: &Value| Ok(data.clone())),
        TypeHint::Bool => Arc::new(|data: &Value| match data {
            Value::Bool(_) => Ok(data.clone()),
            _ => Err(LoadError::type_error(ValueKind::Bool, data.clone())),
        }),
        TypeHint::Int => Arc::new(move |data: &Value| load_int(data, strict)),
        TypeHint::Float => Arc::new(move |data: &Value| load_float(data, strict)),
        TypeHint::Str => Arc::new(move |data: &Value| load_str(data, strict)),
        TypeHint::List(item) => {
            let item = loader_for(retort, item, request)?;
            Arc::new(move |data: &Value| {
                let chars;
                let items = match data {
                    Value::Array(items) => items,
                    Value::String(s) if !strict => {
                        chars = s.chars().map(|c| Value::String(c.into())).collect::<Vec<_>>();
                        &chars
                    }
                    Value::String(_) => {
                        return Err(LoadError::excluded_type(
                            ValueKind::Sequence,
                            ValueKind::Str,
                            data.clone(),
                        ));
                    }
                    _ => return Err(LoadError::type_error(ValueKind::Sequence, data.clone())),
                };
                let loaded = collect_items(
                    trail,
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, value)| (TrailElement::Index(i), item(value))),
                    |errors| LoadError::aggregate("while loading iterable", errors),
                )?;
                Ok(Value::Array(loaded))
            })
        }
        TypeHint::Dict(value) => {
            let value_loader = loader_for(retort, value, request)?;
            Arc::new(move |data: &Value| {
                let Value::Object(map) = data else {
                    return Err(LoadError::type_error(ValueKind::Mapping, data.clone()));
                };
                let loaded = collect_items(
                    trail,
                    map.iter()
                        .map(|(key, value)| (TrailElement::Key(key.clone()), value_loader(value))),
                    |errors| LoadError::aggregate("while loading mapping", errors),
                )?;
                Ok(Value::Object(map.keys().cloned().zip(loaded).collect::<Map<_, _>>()))
            })
        }
        TypeHint::Optional(inner) => {
            let inner = loader_for(retort, inner, request)?;
            Arc::new(move |data: &Value| match data {
                Value::Null => Ok(Value::Null),
                _ => inner(data),
            })
        }
        TypeHint::Model(type_id) => {
            let nested = retort.loader::<Value>(type_id)?;
            Arc::new(move |data: &Value| nested.load(data))
        }
    };
    Ok(loader)
}

fn dumper_for(
    retort: &Retort,
    hint: &TypeHint,
    request: &FieldRequest<'_>,
) -> Result<FieldDumper, CannotProvide> {
    let trail = request.debug_trail;
    let dumper: FieldDumper = match hint {
        TypeHint::Any | TypeHint::Bool | TypeHint::Int | TypeHint::Float | TypeHint::Str => {
            Arc::new(|value: &Value| Ok(value.clone()))
        }
        TypeHint::List(item) => {
            let item = dumper_for(retort, item, request)?;
            Arc::new(move |value: &Value| {
                let Value::Array(items) = value else {
                    return Err(unexpected(ValueKind::Sequence, value));
                };
                let dumped = collect_items(
                    trail,
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, value)| (TrailElement::Index(i), item(value))),
                    |errors| DumpError::aggregate("while dumping iterable", errors),
                )?;
                Ok(Value::Array(dumped))
            })
        }
        TypeHint::Dict(value) => {
            let value_dumper = dumper_for(retort, value, request)?;
            Arc::new(move |value: &Value| {
                let Value::Object(map) = value else {
                    return Err(unexpected(ValueKind::Mapping, value));
                };
                let dumped = collect_items(
                    trail,
                    map.iter()
                        .map(|(key, value)| (TrailElement::Key(key.clone()), value_dumper(value))),
                    |errors| DumpError::aggregate("while dumping mapping", errors),
                )?;
                Ok(Value::Object(map.keys().cloned().zip(dumped).collect::<Map<_, _>>()))
            })
        }
        TypeHint::Optional(inner) => {
            let inner = dumper_for(retort, inner, request)?;
            Arc::new(move |value: &Value| match value {
                Value::Null => Ok(Value::Null),
                _ => inner(value),
            })
        }
        TypeHint::Model(type_id) => {
            let nested = retort.dumper::<Value>(type_id)?;
            Arc::new(move |value: &Value| nested.dump(value))
        }
    };
    Ok(dumper)
}

/// Runs item codecs the way the active trail mode asks: stop at the first
/// failure, or run all of them and aggregate.
fn collect_items<E: Trailed>(
    trail: DebugTrail,
    items: impl Iterator<Item = (TrailElement, Result<Value, E>)>,
    aggregate: impl FnOnce(Vec<E>) -> E,
) -> Result<Vec<Value>, E> {
    let mut out = Vec::new();
    let mut errors = Vec::new();
    for (element, result) in items {
        match (result, trail) {
            (Ok(value), _) => out.push(value),
            (Err(err), DebugTrail::Disable) => return Err(err),
            (Err(err), DebugTrail::First) => return Err(append_path(err, element)),
            (Err(err), DebugTrail::All) => errors.push(append_path(err, element)),
        }
    }
    if errors.is_empty() {
        Ok(out)
    } else {
        Err(aggregate(errors))
    }
}

fn unexpected(expected: ValueKind, value: &Value) -> DumpError {
    DumpError::msg(format!("expected {expected}, got {}", ValueKind::of(value)))
}

fn load_int(data: &Value, strict: bool) -> Result<Value, LoadError> {
    match data {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(data.clone()),
        Value::Number(n) if !strict => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(Value::from(f as i64)),
            _ => Err(LoadError::value("float has a fractional part", data.clone())),
        },
        Value::String(s) if !strict => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| LoadError::value("invalid integer literal", data.clone())),
        _ => Err(LoadError::type_error(ValueKind::Int, data.clone())),
    }
}

fn load_float(data: &Value, strict: bool) -> Result<Value, LoadError> {
    match data {
        Value::Number(_) => Ok(data.clone()),
        Value::String(s) if !strict => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| LoadError::value("invalid float literal", data.clone())),
        _ => Err(LoadError::type_error(ValueKind::Float, data.clone())),
    }
}

fn load_str(data: &Value, strict: bool) -> Result<Value, LoadError> {
    match data {
        Value::String(_) => Ok(data.clone()),
        Value::Number(n) if !strict => Ok(Value::String(n.to_string())),
        Value::Bool(b) if !strict => Ok(Value::String(b.to_string())),
        _ => Err(LoadError::type_error(ValueKind::Str, data.clone())),
    }
}
