//! Model shapes: what a loader feeds into a constructor and what a dumper
//! reads back out of an instance.

use core::fmt;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use crate::error::{DumpError, LoadError};
use crate::trail::TrailElement;
use crate::value::{ItemKey, Map, Record, Value};

// ============================================================================
// Callables
// ============================================================================

pub type Factory = Arc<dyn Fn() -> Value + Send + Sync>;
pub type SelfFactory<M> = Arc<dyn Fn(&M) -> Value + Send + Sync>;
pub type Constructor<M> = Arc<dyn Fn(ConstructorArgs) -> Result<M, LoadError> + Send + Sync>;
pub type Saturator<M> =
    Arc<dyn Fn(&mut M, Map<String, Value>) -> Result<(), LoadError> + Send + Sync>;
pub type Extractor<M> = Arc<dyn Fn(&M) -> Result<Map<String, Value>, DumpError> + Send + Sync>;
pub type Getter<M> = Arc<dyn Fn(&M) -> Result<Value, AccessError> + Send + Sync>;
/// Decides whether a raw field value is emitted. Receives the dumped model too.
pub type Sieve<M> = Arc<dyn Fn(&M, &Value) -> bool + Send + Sync>;
pub type FieldLoader = Arc<dyn Fn(&Value) -> Result<Value, LoadError> + Send + Sync>;
pub type FieldDumper = Arc<dyn Fn(&Value) -> Result<Value, DumpError> + Send + Sync>;
pub type Original = Arc<dyn Any + Send + Sync>;
pub type Metadata = BTreeMap<String, Value>;

/// Arguments handed to a model constructor.
///
/// Positional arguments are the leading params in declaration order, so the
/// position of a positional argument equals the index of its param.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstructorArgs {
    pub positional: Vec<Value>,
    pub keyword: Map<String, Value>,
}

impl ConstructorArgs {
    /// Argument for the param at `position` named `name`, wherever it was passed.
    pub fn arg(&self, position: usize, name: &str) -> Option<&Value> {
        self.positional
            .get(position)
            .or_else(|| self.keyword.get(name))
    }

    /// Keyword arguments not named by any of `known`.
    pub fn extra_keywords<'a>(
        &'a self,
        known: &'a [&'a str],
    ) -> impl Iterator<Item = (&'a String, &'a Value)> + 'a {
        self.keyword
            .iter()
            .filter(move |(key, _)| !known.contains(&key.as_str()))
    }
}

// ============================================================================
// Field descriptors
// ============================================================================

/// Declared type of a field, used to pick its field codec.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeHint {
    Any,
    Bool,
    Int,
    Float,
    Str,
    List(Box<TypeHint>),
    Dict(Box<TypeHint>),
    Optional(Box<TypeHint>),
    /// Another registered model, by type id.
    Model(String),
}

impl TypeHint {
    pub fn list(item: TypeHint) -> Self {
        TypeHint::List(Box::new(item))
    }

    pub fn dict(value: TypeHint) -> Self {
        TypeHint::Dict(Box::new(value))
    }

    pub fn optional(inner: TypeHint) -> Self {
        TypeHint::Optional(Box::new(inner))
    }

    pub fn model(type_id: impl Into<String>) -> Self {
        TypeHint::Model(type_id.into())
    }
}

impl fmt::Display for TypeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeHint::Any => f.write_str("any"),
            TypeHint::Bool => f.write_str("bool"),
            TypeHint::Int => f.write_str("int"),
            TypeHint::Float => f.write_str("float"),
            TypeHint::Str => f.write_str("str"),
            TypeHint::List(item) => write!(f, "list[{item}]"),
            TypeHint::Dict(value) => write!(f, "dict[str, {value}]"),
            TypeHint::Optional(inner) => write!(f, "optional[{inner}]"),
            TypeHint::Model(type_id) => f.write_str(type_id),
        }
    }
}

/// Declared default of a field.
pub enum FieldDefault<M = ()> {
    None,
    Value(Value),
    Factory(Factory),
    /// Computed from the instance being dumped; output fields only.
    FactoryWithSelf(SelfFactory<M>),
}

impl<M> FieldDefault<M> {
    pub fn factory(f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        FieldDefault::Factory(Arc::new(f))
    }

    pub fn factory_with_self(f: impl Fn(&M) -> Value + Send + Sync + 'static) -> Self {
        FieldDefault::FactoryWithSelf(Arc::new(f))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, FieldDefault::None)
    }

    /// Evaluates the default. Factories run on every call.
    pub fn materialize(&self, model: &M) -> Option<Value> {
        match self {
            FieldDefault::None => None,
            FieldDefault::Value(value) => Some(value.clone()),
            FieldDefault::Factory(factory) => Some(factory()),
            FieldDefault::FactoryWithSelf(factory) => Some(factory(model)),
        }
    }
}

impl<M> Clone for FieldDefault<M> {
    fn clone(&self) -> Self {
        match self {
            FieldDefault::None => FieldDefault::None,
            FieldDefault::Value(value) => FieldDefault::Value(value.clone()),
            FieldDefault::Factory(factory) => FieldDefault::Factory(factory.clone()),
            FieldDefault::FactoryWithSelf(factory) => {
                FieldDefault::FactoryWithSelf(factory.clone())
            }
        }
    }
}

impl<M> fmt::Debug for FieldDefault<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldDefault::None => f.write_str("None"),
            FieldDefault::Value(value) => f.debug_tuple("Value").field(value).finish(),
            FieldDefault::Factory(_) => f.write_str("Factory(..)"),
            FieldDefault::FactoryWithSelf(_) => f.write_str("FactoryWithSelf(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamKind {
    PositionalOnly,
    PositionalOrKeyword,
    KeywordOnly,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParamKind::PositionalOnly => "positional-only",
            ParamKind::PositionalOrKeyword => "positional-or-keyword",
            ParamKind::KeywordOnly => "keyword-only",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub field_id: String,
    pub name: String,
    pub kind: ParamKind,
}

impl Param {
    pub fn new(field_id: impl Into<String>, name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            field_id: field_id.into(),
            name: name.into(),
            kind,
        }
    }
}

#[derive(Clone)]
pub struct InputField {
    pub id: String,
    pub type_hint: TypeHint,
    pub required: bool,
    pub default: FieldDefault,
    pub metadata: Metadata,
    pub original: Option<Original>,
}

impl InputField {
    pub fn required(id: impl Into<String>, type_hint: TypeHint) -> Self {
        Self {
            id: id.into(),
            type_hint,
            required: true,
            default: FieldDefault::None,
            metadata: Metadata::new(),
            original: None,
        }
    }

    pub fn optional(id: impl Into<String>, type_hint: TypeHint, default: FieldDefault) -> Self {
        Self {
            required: false,
            default,
            ..Self::required(id, type_hint)
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_optional(&self) -> bool {
        !self.required
    }
}

impl fmt::Debug for InputField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputField")
            .field("id", &self.id)
            .field("type_hint", &self.type_hint)
            .field("required", &self.required)
            .field("default", &self.default)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Accessors
// ============================================================================

/// Which lookup failure means "this field is absent from the instance".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessErrorKind {
    Attribute,
    Key,
    Custom,
}

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("value is absent ({0:?} lookup failed)")]
    Absent(AccessErrorKind),
    #[error(transparent)]
    Failed(DumpError),
}

pub enum AccessorKind<M> {
    Attribute(String),
    Item(ItemKey),
    Custom(Getter<M>),
}

/// Reads one field out of a model instance.
pub struct Accessor<M> {
    kind: AccessorKind<M>,
    access_error: Option<AccessErrorKind>,
    trail_element: TrailElement,
}

impl<M> Accessor<M> {
    pub fn attribute(name: impl Into<String>, is_required: bool) -> Self {
        let name = name.into();
        Self {
            trail_element: TrailElement::Attr(name.clone()),
            kind: AccessorKind::Attribute(name),
            access_error: (!is_required).then_some(AccessErrorKind::Attribute),
        }
    }

    pub fn item(key: impl Into<ItemKey>, is_required: bool) -> Self {
        let key = key.into();
        let trail_element = match &key {
            ItemKey::Str(key) => TrailElement::Key(key.clone()),
            ItemKey::Index(index) => TrailElement::Index(*index),
        };
        Self {
            kind: AccessorKind::Item(key),
            access_error: (!is_required).then_some(AccessErrorKind::Key),
            trail_element,
        }
    }

    pub fn custom(
        getter: impl Fn(&M) -> Result<Value, AccessError> + Send + Sync + 'static,
        access_error: Option<AccessErrorKind>,
        trail_element: TrailElement,
    ) -> Self {
        Self {
            kind: AccessorKind::Custom(Arc::new(getter)),
            access_error,
            trail_element,
        }
    }

    pub fn kind(&self) -> &AccessorKind<M> {
        &self.kind
    }

    /// The failure kind treated as a silent miss, `None` if the field is
    /// always present.
    pub fn access_error(&self) -> Option<AccessErrorKind> {
        self.access_error
    }

    pub fn trail_element(&self) -> &TrailElement {
        &self.trail_element
    }

    pub fn get(&self, model: &M) -> Result<Value, AccessError>
    where
        M: Record,
    {
        match &self.kind {
            AccessorKind::Attribute(name) => model
                .attr(name)
                .ok_or(AccessError::Absent(AccessErrorKind::Attribute)),
            AccessorKind::Item(key) => model
                .item(key)
                .ok_or(AccessError::Absent(AccessErrorKind::Key)),
            AccessorKind::Custom(getter) => getter(model),
        }
    }

    /// Short description used in generated source.
    pub fn describe(&self) -> String {
        match &self.kind {
            AccessorKind::Attribute(name) => format!("attr({name})"),
            AccessorKind::Item(key) => format!("item({key})"),
            AccessorKind::Custom(_) => format!("custom({})", self.trail_element),
        }
    }
}

impl<M> Clone for Accessor<M> {
    fn clone(&self) -> Self {
        let kind = match &self.kind {
            AccessorKind::Attribute(name) => AccessorKind::Attribute(name.clone()),
            AccessorKind::Item(key) => AccessorKind::Item(key.clone()),
            AccessorKind::Custom(getter) => AccessorKind::Custom(getter.clone()),
        };
        Self {
            kind,
            access_error: self.access_error,
            trail_element: self.trail_element.clone(),
        }
    }
}

/// Custom accessors are equal only to clones of themselves.
impl<M> PartialEq for Accessor<M> {
    fn eq(&self, other: &Self) -> bool {
        let same_kind = match (&self.kind, &other.kind) {
            (AccessorKind::Attribute(a), AccessorKind::Attribute(b)) => a == b,
            (AccessorKind::Item(a), AccessorKind::Item(b)) => a == b,
            (AccessorKind::Custom(a), AccessorKind::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        same_kind
            && self.access_error == other.access_error
            && self.trail_element == other.trail_element
    }
}

impl<M> fmt::Debug for Accessor<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor")
            .field("kind", &self.describe())
            .field("access_error", &self.access_error)
            .field("trail_element", &self.trail_element)
            .finish()
    }
}

pub struct OutputField<M> {
    pub id: String,
    pub type_hint: TypeHint,
    pub default: FieldDefault<M>,
    pub metadata: Metadata,
    pub accessor: Accessor<M>,
    pub original: Option<Original>,
}

impl<M> OutputField<M> {
    pub fn new(id: impl Into<String>, type_hint: TypeHint, accessor: Accessor<M>) -> Self {
        Self {
            id: id.into(),
            type_hint,
            default: FieldDefault::None,
            metadata: Metadata::new(),
            accessor,
            original: None,
        }
    }

    /// Field read through `attribute(id)`.
    pub fn attribute(id: impl Into<String>, type_hint: TypeHint, is_required: bool) -> Self {
        let id = id.into();
        let accessor = Accessor::attribute(id.clone(), is_required);
        Self::new(id, type_hint, accessor)
    }

    pub fn with_default(mut self, default: FieldDefault<M>) -> Self {
        self.default = default;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_required(&self) -> bool {
        self.accessor.access_error().is_none()
    }

    pub fn is_optional(&self) -> bool {
        !self.is_required()
    }
}

impl<M> Clone for OutputField<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            type_hint: self.type_hint.clone(),
            default: self.default.clone(),
            metadata: self.metadata.clone(),
            accessor: self.accessor.clone(),
            original: self.original.clone(),
        }
    }
}

impl<M> fmt::Debug for OutputField<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputField")
            .field("id", &self.id)
            .field("type_hint", &self.type_hint)
            .field("default", &self.default)
            .field("metadata", &self.metadata)
            .field("accessor", &self.accessor)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Shapes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    #[error("field id `{0}` is duplicated")]
    DuplicateField(String),
    #[error("parameter name `{0}` is duplicated")]
    DuplicateParam(String),
    #[error("field `{0}` is bound to several parameters")]
    DuplicateBinding(String),
    #[error("parameter `{param}` refers to unknown field `{field_id}`")]
    WildParam { param: String, field_id: String },
    #[error("field `{0}` is not bound to any parameter")]
    UnboundField(String),
    #[error("parameter `{param}` ({kind}) follows a {previous} parameter")]
    ParamKindOrder {
        param: String,
        kind: ParamKind,
        previous: ParamKind,
    },
    #[error("required field `{required}` follows optional field `{optional}`")]
    RequiredAfterOptional { required: String, optional: String },
    #[error("positional-only field `{0}` can not be optional")]
    OptionalPositionalOnly(String),
    #[error("input field `{0}` has a default computed from the model")]
    SelfFactoryOnInput(String),
    #[error("overridden type refers to unknown field `{0}`")]
    UnknownOverride(String),
}

fn check_unique_ids<'a>(ids: impl Iterator<Item = &'a str>) -> Result<(), ShapeError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ShapeError::DuplicateField(id.to_owned()));
        }
    }
    Ok(())
}

fn check_overrides(
    overriden_types: &BTreeSet<String>,
    mut has_field: impl FnMut(&str) -> bool,
) -> Result<(), ShapeError> {
    match overriden_types.iter().find(|id| !has_field(id)) {
        Some(id) => Err(ShapeError::UnknownOverride(id.clone())),
        None => Ok(()),
    }
}

/// Everything a loader needs to build an instance.
pub struct InputShape<M> {
    fields: Vec<InputField>,
    params: Vec<Param>,
    kwargs: Option<TypeHint>,
    constructor: Constructor<M>,
    overriden_types: BTreeSet<String>,
}

impl<M> InputShape<M> {
    pub fn builder(
        constructor: impl Fn(ConstructorArgs) -> Result<M, LoadError> + Send + Sync + 'static,
    ) -> InputShapeBuilder<M> {
        InputShapeBuilder {
            fields: Vec::new(),
            params: Vec::new(),
            kwargs: None,
            constructor: Arc::new(constructor),
            overriden_types: BTreeSet::new(),
        }
    }

    pub fn fields(&self) -> &[InputField] {
        &self.fields
    }

    pub fn field(&self, id: &str) -> Option<&InputField> {
        self.fields.iter().find(|field| field.id == id)
    }

    pub fn field_index(&self, id: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.id == id)
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn param_for(&self, field_id: &str) -> Option<&Param> {
        self.params.iter().find(|param| param.field_id == field_id)
    }

    pub fn kwargs(&self) -> Option<&TypeHint> {
        self.kwargs.as_ref()
    }

    pub fn constructor(&self) -> &Constructor<M> {
        &self.constructor
    }

    pub fn overriden_types(&self) -> &BTreeSet<String> {
        &self.overriden_types
    }

    fn validate(&self) -> Result<(), ShapeError> {
        check_unique_ids(self.fields.iter().map(|field| field.id.as_str()))?;
        if let Some(field) = self
            .fields
            .iter()
            .find(|field| matches!(field.default, FieldDefault::FactoryWithSelf(_)))
        {
            return Err(ShapeError::SelfFactoryOnInput(field.id.clone()));
        }

        let mut names = HashSet::new();
        let mut bound = HashSet::new();
        for param in &self.params {
            if !names.insert(param.name.as_str()) {
                return Err(ShapeError::DuplicateParam(param.name.clone()));
            }
            if self.field(&param.field_id).is_none() {
                return Err(ShapeError::WildParam {
                    param: param.name.clone(),
                    field_id: param.field_id.clone(),
                });
            }
            if !bound.insert(param.field_id.as_str()) {
                return Err(ShapeError::DuplicateBinding(param.field_id.clone()));
            }
        }
        if let Some(field) = self
            .fields
            .iter()
            .find(|field| !bound.contains(field.id.as_str()))
        {
            return Err(ShapeError::UnboundField(field.id.clone()));
        }

        let mut previous: Option<&Param> = None;
        let mut last_optional: Option<&str> = None;
        for param in &self.params {
            if let Some(prev) = previous
                && param.kind < prev.kind
            {
                return Err(ShapeError::ParamKindOrder {
                    param: param.name.clone(),
                    kind: param.kind,
                    previous: prev.kind,
                });
            }
            previous = Some(param);

            let Some(field) = self.field(&param.field_id) else {
                continue;
            };
            if field.is_optional() {
                if param.kind == ParamKind::PositionalOnly {
                    return Err(ShapeError::OptionalPositionalOnly(field.id.clone()));
                }
                last_optional = Some(field.id.as_str());
            } else if let Some(optional) = last_optional
                && param.kind != ParamKind::KeywordOnly
            {
                return Err(ShapeError::RequiredAfterOptional {
                    required: field.id.clone(),
                    optional: optional.to_owned(),
                });
            }
        }

        check_overrides(&self.overriden_types, |id| self.field(id).is_some())
    }
}

impl<M> fmt::Debug for InputShape<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputShape")
            .field("fields", &self.fields)
            .field("params", &self.params)
            .field("kwargs", &self.kwargs)
            .field("overriden_types", &self.overriden_types)
            .finish_non_exhaustive()
    }
}

pub struct InputShapeBuilder<M> {
    fields: Vec<InputField>,
    params: Vec<Param>,
    kwargs: Option<TypeHint>,
    constructor: Constructor<M>,
    overriden_types: BTreeSet<String>,
}

impl<M> InputShapeBuilder<M> {
    pub fn field(mut self, field: InputField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Adds `field` together with a param of the same name.
    pub fn bound_field(self, field: InputField, kind: ParamKind) -> Self {
        let param = Param::new(field.id.clone(), field.id.clone(), kind);
        self.field(field).param(param)
    }

    pub fn kwargs(mut self, type_hint: TypeHint) -> Self {
        self.kwargs = Some(type_hint);
        self
    }

    pub fn overriden_type(mut self, field_id: impl Into<String>) -> Self {
        self.overriden_types.insert(field_id.into());
        self
    }

    pub fn build(self) -> Result<InputShape<M>, ShapeError> {
        let shape = InputShape {
            fields: self.fields,
            params: self.params,
            kwargs: self.kwargs,
            constructor: self.constructor,
            overriden_types: self.overriden_types,
        };
        shape.validate()?;
        Ok(shape)
    }
}

/// Everything a dumper needs to read an instance.
pub struct OutputShape<M> {
    fields: Vec<OutputField<M>>,
    overriden_types: BTreeSet<String>,
}

impl<M> OutputShape<M> {
    pub fn new(fields: Vec<OutputField<M>>) -> Result<Self, ShapeError> {
        Self::with_overriden_types(fields, BTreeSet::new())
    }

    pub fn with_overriden_types(
        fields: Vec<OutputField<M>>,
        overriden_types: BTreeSet<String>,
    ) -> Result<Self, ShapeError> {
        check_unique_ids(fields.iter().map(|field| field.id.as_str()))?;
        check_overrides(&overriden_types, |id| fields.iter().any(|f| f.id == id))?;
        Ok(Self {
            fields,
            overriden_types,
        })
    }

    pub fn fields(&self) -> &[OutputField<M>] {
        &self.fields
    }

    pub fn field(&self, id: &str) -> Option<&OutputField<M>> {
        self.fields.iter().find(|field| field.id == id)
    }

    pub fn field_index(&self, id: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.id == id)
    }

    pub fn overriden_types(&self) -> &BTreeSet<String> {
        &self.overriden_types
    }
}

impl<M> fmt::Debug for OutputShape<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputShape")
            .field("fields", &self.fields)
            .field("overriden_types", &self.overriden_types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unit(_: ConstructorArgs) -> Result<(), LoadError> {
        Ok(())
    }

    #[test]
    fn builds_a_valid_shape() {
        let shape = InputShape::builder(unit)
            .bound_field(InputField::required("a", TypeHint::Int), ParamKind::PositionalOnly)
            .bound_field(
                InputField::optional("b", TypeHint::Int, FieldDefault::Value(json!(0))),
                ParamKind::PositionalOrKeyword,
            )
            .bound_field(InputField::required("c", TypeHint::Str), ParamKind::KeywordOnly)
            .build()
            .expect("shape should be valid");
        assert_eq!(shape.fields().len(), 3);
        assert_eq!(shape.param_for("c").map(|p| p.kind), Some(ParamKind::KeywordOnly));
        assert_eq!(shape.field_index("b"), Some(1));
    }

    #[test]
    fn rejects_duplicate_field_ids() {
        let err = InputShape::builder(unit)
            .bound_field(InputField::required("a", TypeHint::Int), ParamKind::PositionalOrKeyword)
            .field(InputField::required("a", TypeHint::Int))
            .build()
            .expect_err("duplicate ids");
        assert_eq!(err, ShapeError::DuplicateField("a".into()));
    }

    #[test]
    fn rejects_wild_and_unbound() {
        let err = InputShape::builder(unit)
            .param(Param::new("ghost", "ghost", ParamKind::PositionalOrKeyword))
            .build()
            .expect_err("wild param");
        assert!(matches!(err, ShapeError::WildParam { .. }));

        let err = InputShape::builder(unit)
            .field(InputField::required("a", TypeHint::Int))
            .build()
            .expect_err("unbound field");
        assert_eq!(err, ShapeError::UnboundField("a".into()));
    }

    #[test]
    fn rejects_bad_param_order() {
        let err = InputShape::builder(unit)
            .bound_field(InputField::required("a", TypeHint::Int), ParamKind::KeywordOnly)
            .bound_field(InputField::required("b", TypeHint::Int), ParamKind::PositionalOrKeyword)
            .build()
            .expect_err("kind order");
        assert!(matches!(err, ShapeError::ParamKindOrder { .. }));
    }

    #[test]
    fn required_after_optional_only_allowed_for_keyword_only() {
        let optional = || InputField::optional("a", TypeHint::Int, FieldDefault::Value(json!(1)));

        let err = InputShape::builder(unit)
            .bound_field(optional(), ParamKind::PositionalOrKeyword)
            .bound_field(InputField::required("b", TypeHint::Int), ParamKind::PositionalOrKeyword)
            .build()
            .expect_err("required after optional");
        assert!(matches!(err, ShapeError::RequiredAfterOptional { .. }));

        InputShape::builder(unit)
            .bound_field(optional(), ParamKind::PositionalOrKeyword)
            .bound_field(InputField::required("b", TypeHint::Int), ParamKind::KeywordOnly)
            .build()
            .expect("keyword-only may follow optional");
    }

    #[test]
    fn rejects_optional_positional_only_and_unknown_override() {
        let err = InputShape::builder(unit)
            .bound_field(
                InputField::optional("a", TypeHint::Int, FieldDefault::None),
                ParamKind::PositionalOnly,
            )
            .build()
            .expect_err("optional positional-only");
        assert_eq!(err, ShapeError::OptionalPositionalOnly("a".into()));

        let err = InputShape::builder(unit)
            .overriden_type("nope")
            .build()
            .expect_err("unknown override");
        assert_eq!(err, ShapeError::UnknownOverride("nope".into()));
    }

    #[test]
    fn output_field_is_required_without_sentinel() {
        let required = OutputField::<Value>::attribute("a", TypeHint::Int, true);
        let optional = OutputField::<Value>::attribute("b", TypeHint::Int, false);
        assert!(required.is_required());
        assert!(optional.is_optional());
        assert_eq!(
            optional.accessor.access_error(),
            Some(AccessErrorKind::Attribute)
        );
        assert_eq!(required.accessor.trail_element(), &TrailElement::Attr("a".into()));
    }

    #[test]
    fn accessors_read_records() {
        let model = json!({"a": 1, "items": [5, 6]});
        let attr = Accessor::<Value>::attribute("a", true);
        assert_eq!(attr.get(&model).expect("present"), json!(1));

        let missing = Accessor::<Value>::attribute("zz", false);
        assert!(matches!(
            missing.get(&model),
            Err(AccessError::Absent(AccessErrorKind::Attribute))
        ));

        let item = Accessor::<Value>::item("items", true);
        assert_eq!(item.get(&model).expect("present"), json!([5, 6]));
        assert_eq!(item.trail_element(), &TrailElement::Key("items".into()));
    }

    #[test]
    fn custom_accessors_compare_by_identity() {
        let a = Accessor::<Value>::custom(|_| Ok(json!(1)), None, TrailElement::Marker("x".into()));
        let b = Accessor::<Value>::custom(|_| Ok(json!(1)), None, TrailElement::Marker("x".into()));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(
            Accessor::<Value>::attribute("a", true),
            Accessor::<Value>::attribute("a", true)
        );
    }

    #[test]
    fn constructor_args_resolve_by_position_or_name() {
        let mut args = ConstructorArgs::default();
        args.positional.push(json!(1));
        args.keyword.insert("b".into(), json!(2));
        args.keyword.insert("extra".into(), json!(3));
        assert_eq!(args.arg(0, "a"), Some(&json!(1)));
        assert_eq!(args.arg(1, "b"), Some(&json!(2)));
        assert_eq!(args.arg(2, "c"), None);
        let extras: Vec<_> = args.extra_keywords(&["b"]).map(|(k, _)| k.as_str()).collect();
        assert_eq!(extras, vec!["extra"]);
    }

    #[test]
    fn defaults_materialize_on_every_call() {
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = counter.clone();
        let default: FieldDefault<Value> = FieldDefault::factory(move || {
            json!(seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
        });
        assert_eq!(default.materialize(&Value::Null), Some(json!(0)));
        assert_eq!(default.materialize(&Value::Null), Some(json!(1)));

        let with_self: FieldDefault<Value> =
            FieldDefault::factory_with_self(|model: &Value| model["base"].clone());
        assert_eq!(with_self.materialize(&json!({"base": 7})), Some(json!(7)));
        assert!(FieldDefault::<Value>::None.materialize(&Value::Null).is_none());
    }
}
