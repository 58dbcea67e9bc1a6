//! External data values and the record view accessors read through.

use core::fmt;

pub use serde_json::{Map, Number, Value};

/// Coarse kind of an external value, used to describe type mismatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Mapping,
    Sequence,
    Str,
    Int,
    Float,
    Bool,
    Null,
    Any,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => ValueKind::Int,
            Value::Number(_) => ValueKind::Float,
            Value::String(_) => ValueKind::Str,
            Value::Array(_) => ValueKind::Sequence,
            Value::Object(_) => ValueKind::Mapping,
        }
    }

    pub fn as_symbol(self) -> &'static str {
        match self {
            ValueKind::Mapping => "mapping",
            ValueKind::Sequence => "sequence",
            ValueKind::Str => "str",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Bool => "bool",
            ValueKind::Null => "null",
            ValueKind::Any => "any",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_symbol())
    }
}

/// Key used by item accessors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemKey {
    Str(String),
    Index(usize),
}

impl From<&str> for ItemKey {
    fn from(value: &str) -> Self {
        ItemKey::Str(value.to_owned())
    }
}

impl From<String> for ItemKey {
    fn from(value: String) -> Self {
        ItemKey::Str(value)
    }
}

impl From<usize> for ItemKey {
    fn from(value: usize) -> Self {
        ItemKey::Index(value)
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKey::Str(key) => write!(f, "{key:?}"),
            ItemKey::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Read-only view of a model instance used by attribute and item accessors.
///
/// Both lookups default to "absent", so a model read only through custom
/// accessors can implement this trait with an empty body.
pub trait Record {
    fn attr(&self, name: &str) -> Option<Value> {
        let _ = name;
        None
    }

    fn item(&self, key: &ItemKey) -> Option<Value> {
        let _ = key;
        None
    }
}

/// Mapping-backed records: attributes and string items are object keys,
/// integer items are array positions.
impl Record for Value {
    fn attr(&self, name: &str) -> Option<Value> {
        self.as_object()?.get(name).cloned()
    }

    fn item(&self, key: &ItemKey) -> Option<Value> {
        match (self, key) {
            (Value::Object(map), ItemKey::Str(key)) => map.get(key).cloned(),
            (Value::Array(items), ItemKey::Index(index)) => items.get(*index).cloned(),
            _ => None,
        }
    }
}
