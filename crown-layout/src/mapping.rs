//! Field selection and key mapping rules.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crown_ir::{CrownKey, CrownPath, InputField, Metadata, OutputField, TypeHint};

/// What mapping rules and predicates know about a field.
#[derive(Debug, Clone, Copy)]
pub struct FieldInfo<'a> {
    pub id: &'a str,
    /// Position of the field in its shape.
    pub index: usize,
    pub type_hint: &'a TypeHint,
    pub metadata: &'a Metadata,
    pub is_required: bool,
}

impl<'a> FieldInfo<'a> {
    pub fn input(index: usize, field: &'a InputField) -> Self {
        Self {
            id: &field.id,
            index,
            type_hint: &field.type_hint,
            metadata: &field.metadata,
            is_required: field.required,
        }
    }

    pub fn output<M>(index: usize, field: &'a OutputField<M>) -> Self {
        Self {
            id: &field.id,
            index,
            type_hint: &field.type_hint,
            metadata: &field.metadata,
            is_required: field.is_required(),
        }
    }
}

type PredicateFn = Arc<dyn Fn(&FieldInfo<'_>) -> bool + Send + Sync>;
type MapFn = Arc<dyn Fn(&FieldInfo<'_>) -> MapResult + Send + Sync>;

#[derive(Clone)]
pub enum FieldPredicate {
    Any,
    Nothing,
    Id(String),
    AnyOf(BTreeSet<String>),
    Func(PredicateFn),
}

impl FieldPredicate {
    pub fn id(id: impl Into<String>) -> Self {
        FieldPredicate::Id(id.into())
    }

    pub fn any_of<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldPredicate::AnyOf(ids.into_iter().map(Into::into).collect())
    }

    pub fn func(f: impl Fn(&FieldInfo<'_>) -> bool + Send + Sync + 'static) -> Self {
        FieldPredicate::Func(Arc::new(f))
    }

    pub fn matches(&self, field: &FieldInfo<'_>) -> bool {
        match self {
            FieldPredicate::Any => true,
            FieldPredicate::Nothing => false,
            FieldPredicate::Id(id) => id == field.id,
            FieldPredicate::AnyOf(ids) => ids.contains(field.id),
            FieldPredicate::Func(f) => f(field),
        }
    }
}

impl fmt::Debug for FieldPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldPredicate::Any => f.write_str("Any"),
            FieldPredicate::Nothing => f.write_str("Nothing"),
            FieldPredicate::Id(id) => f.debug_tuple("Id").field(id).finish(),
            FieldPredicate::AnyOf(ids) => f.debug_tuple("AnyOf").field(ids).finish(),
            FieldPredicate::Func(_) => f.write_str("Func(..)"),
        }
    }
}

/// One element of a mapped path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Key(String),
    Index(usize),
    /// The key the field would get without any mapping.
    Generated,
}

impl From<&str> for MapKey {
    fn from(value: &str) -> Self {
        MapKey::Key(value.to_owned())
    }
}

impl From<String> for MapKey {
    fn from(value: String) -> Self {
        MapKey::Key(value)
    }
}

impl From<usize> for MapKey {
    fn from(value: usize) -> Self {
        MapKey::Index(value)
    }
}

#[derive(Clone)]
pub enum MapResult {
    /// The field gets no place in the external data.
    Skip,
    Path(Vec<MapKey>),
    Func(MapFn),
}

impl MapResult {
    pub fn key(key: impl Into<MapKey>) -> Self {
        MapResult::Path(vec![key.into()])
    }

    pub fn path<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<MapKey>,
    {
        MapResult::Path(keys.into_iter().map(Into::into).collect())
    }

    pub fn generated() -> Self {
        MapResult::Path(vec![MapKey::Generated])
    }

    pub fn func(f: impl Fn(&FieldInfo<'_>) -> MapResult + Send + Sync + 'static) -> Self {
        MapResult::Func(Arc::new(f))
    }

    /// Mapped keys for `field`, `None` when the field is skipped.
    pub fn resolve(&self, field: &FieldInfo<'_>) -> Option<Vec<MapKey>> {
        match self {
            MapResult::Skip => None,
            MapResult::Path(keys) => Some(keys.clone()),
            MapResult::Func(f) => f(field).resolve(field),
        }
    }
}

/// Builds a crown path from mapped keys, asking for the generated key only
/// when a [`MapKey::Generated`] placeholder needs it.
pub fn substitute<E>(
    keys: &[MapKey],
    mut generated: impl FnMut() -> Result<CrownKey, E>,
) -> Result<CrownPath, E> {
    keys.iter()
        .map(|key| match key {
            MapKey::Key(key) => Ok(CrownKey::Key(key.clone())),
            MapKey::Index(index) => Ok(CrownKey::Index(*index)),
            MapKey::Generated => generated(),
        })
        .collect()
}

impl fmt::Debug for MapResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapResult::Skip => f.write_str("Skip"),
            MapResult::Path(keys) => f.debug_tuple("Path").field(keys).finish(),
            MapResult::Func(_) => f.write_str("Func(..)"),
        }
    }
}

/// A `map` rule: fields matching the predicate get the result.
#[derive(Debug, Clone)]
pub struct NameMapEntry {
    pub predicate: FieldPredicate,
    pub result: MapResult,
}

impl NameMapEntry {
    pub fn new(predicate: FieldPredicate, result: MapResult) -> Self {
        Self { predicate, result }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crown_ir::FieldDefault;
    use smallvec::smallvec;

    fn info<'a>(field: &'a InputField) -> FieldInfo<'a> {
        FieldInfo::input(3, field)
    }

    #[test]
    fn predicates() {
        let field = InputField::required("abc", TypeHint::Int);
        let field = info(&field);
        assert!(FieldPredicate::Any.matches(&field));
        assert!(!FieldPredicate::Nothing.matches(&field));
        assert!(FieldPredicate::id("abc").matches(&field));
        assert!(FieldPredicate::any_of(["x", "abc"]).matches(&field));
        assert!(!FieldPredicate::any_of(["x"]).matches(&field));
        assert!(FieldPredicate::func(|f| f.index == 3).matches(&field));
    }

    #[test]
    fn generated_key_is_substituted() {
        let keys = [MapKey::from("x"), MapKey::Generated, MapKey::from(0usize)];
        let path: Result<CrownPath, ()> = substitute(&keys, || Ok(CrownKey::from("Abc")));
        let expected: CrownPath =
            smallvec![CrownKey::from("x"), CrownKey::from("Abc"), CrownKey::from(0usize)];
        assert_eq!(path, Ok(expected));

        let plain = [MapKey::from("y")];
        let path: Result<CrownPath, &str> = substitute(&plain, || Err("not needed"));
        assert_eq!(path, Ok(smallvec![CrownKey::from("y")]));
    }

    #[test]
    fn functions_may_skip_or_remap() {
        let required = InputField::required("abc", TypeHint::Int);
        let optional =
            InputField::optional("opt", TypeHint::Int, FieldDefault::Value(serde_json::json!(0)));
        let result = MapResult::func(|f| {
            if f.is_required {
                MapResult::key(f.id.to_uppercase())
            } else {
                MapResult::Skip
            }
        });
        assert_eq!(result.resolve(&info(&required)), Some(vec![MapKey::from("ABC")]));
        assert_eq!(result.resolve(&info(&optional)), None);
        assert_eq!(MapResult::Skip.resolve(&info(&required)), None);
    }
}
