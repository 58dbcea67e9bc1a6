use core::fmt;
use std::collections::BTreeSet;

use crate::trail::{Trail, Trailed, render_trail};
use crate::value::{Value, ValueKind};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What went wrong while loading external data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoadErrorKind {
    #[error("expected {expected}, got {got}")]
    Type { expected: ValueKind, got: Value },

    /// The value has the expected kind but one that is explicitly excluded,
    /// e.g. a string where a sequence is expected under strict coercion.
    #[error("expected {expected} that is not {excluded}, got {got}")]
    ExcludedType {
        expected: ValueKind,
        excluded: ValueKind,
        got: Value,
    },

    #[error("{message}, got {got}")]
    Value { message: String, got: Value },

    #[error("unexpected fields {extras:?} in {got}")]
    ExtraFields { extras: BTreeSet<String>, got: Value },

    #[error("expected {expected_len} items, got more in {got}")]
    ExtraItems { expected_len: usize, got: Value },

    #[error("required fields {missing:?} are missing in {got}")]
    NoRequiredFields {
        missing: BTreeSet<String>,
        got: Value,
    },

    #[error("expected {expected_len} items, got fewer in {got}")]
    NoRequiredItems { expected_len: usize, got: Value },

    /// Only produced when every failure is collected.
    #[error("{message} ({} sub-errors)", .errors.len())]
    Aggregate {
        message: String,
        errors: Vec<LoadError>,
    },
}

/// A loading failure together with the location it happened at.
#[derive(Clone, PartialEq)]
pub struct LoadError {
    kind: Box<LoadErrorKind>,
    trail: Trail,
}

impl LoadError {
    pub fn new(kind: LoadErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
            trail: Trail::new(),
        }
    }

    pub fn type_error(expected: ValueKind, got: Value) -> Self {
        Self::new(LoadErrorKind::Type { expected, got })
    }

    pub fn excluded_type(expected: ValueKind, excluded: ValueKind, got: Value) -> Self {
        Self::new(LoadErrorKind::ExcludedType {
            expected,
            excluded,
            got,
        })
    }

    pub fn value(message: impl Into<String>, got: Value) -> Self {
        Self::new(LoadErrorKind::Value {
            message: message.into(),
            got,
        })
    }

    pub fn aggregate(message: impl Into<String>, errors: Vec<LoadError>) -> Self {
        Self::new(LoadErrorKind::Aggregate {
            message: message.into(),
            errors,
        })
    }

    pub fn kind(&self) -> &LoadErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> LoadErrorKind {
        *self.kind
    }

    pub fn trail(&self) -> &Trail {
        &self.trail
    }

    /// Sub-errors of an aggregate, empty for every other kind.
    pub fn sub_errors(&self) -> &[LoadError] {
        match &*self.kind {
            LoadErrorKind::Aggregate { errors, .. } => errors,
            _ => &[],
        }
    }
}

impl Trailed for LoadError {
    fn trail_mut(&mut self) -> Option<&mut Trail> {
        Some(&mut self.trail)
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.trail.is_empty() {
            write!(f, " at {}", render_trail(&self.trail))?;
        }
        if let LoadErrorKind::Aggregate { errors, .. } = &*self.kind {
            for err in errors {
                write!(f, "\n  - {err}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadError")
            .field("kind", &self.kind)
            .field("trail", &render_trail(&self.trail))
            .finish()
    }
}

impl std::error::Error for LoadError {}

#[derive(Debug, thiserror::Error)]
pub enum DumpErrorKind {
    /// Failure raised by user code: accessors, field dumpers, extractors.
    #[error("{0}")]
    Custom(BoxError),

    #[error("{message} ({} sub-errors)", .errors.len())]
    Aggregate {
        message: String,
        errors: Vec<DumpError>,
    },
}

/// A dumping failure together with the location it happened at.
pub struct DumpError {
    kind: Box<DumpErrorKind>,
    trail: Trail,
}

impl DumpError {
    pub fn new(kind: DumpErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
            trail: Trail::new(),
        }
    }

    pub fn custom(err: impl Into<BoxError>) -> Self {
        Self::new(DumpErrorKind::Custom(err.into()))
    }

    pub fn msg(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::custom(message)
    }

    pub fn aggregate(message: impl Into<String>, errors: Vec<DumpError>) -> Self {
        Self::new(DumpErrorKind::Aggregate {
            message: message.into(),
            errors,
        })
    }

    pub fn kind(&self) -> &DumpErrorKind {
        &self.kind
    }

    pub fn trail(&self) -> &Trail {
        &self.trail
    }

    pub fn sub_errors(&self) -> &[DumpError] {
        match &*self.kind {
            DumpErrorKind::Aggregate { errors, .. } => errors,
            DumpErrorKind::Custom(_) => &[],
        }
    }
}

impl Trailed for DumpError {
    fn trail_mut(&mut self) -> Option<&mut Trail> {
        Some(&mut self.trail)
    }
}

impl fmt::Display for DumpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.trail.is_empty() {
            write!(f, " at {}", render_trail(&self.trail))?;
        }
        for err in self.sub_errors() {
            write!(f, "\n  - {err}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for DumpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DumpError")
            .field("kind", &self.kind)
            .field("trail", &render_trail(&self.trail))
            .finish()
    }
}

impl std::error::Error for DumpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &*self.kind {
            DumpErrorKind::Custom(err) => Some(err.as_ref()),
            DumpErrorKind::Aggregate { .. } => None,
        }
    }
}

/// A codec can not be built for a model. Raised at configuration time only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot provide codec for `{model}`: {message}")]
pub struct CannotProvide {
    pub model: String,
    pub message: String,
}

impl CannotProvide {
    pub fn new(model: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            model: model.into(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trail::{TrailElement, append_path};
    use serde_json::json;

    #[test]
    fn display_includes_trail() {
        let err = LoadError::type_error(ValueKind::Int, json!("x"));
        let err = append_path(err, TrailElement::from("a"));
        assert_eq!(err.to_string(), r#"expected int, got "x" at ["a"]"#);
    }

    #[test]
    fn aggregate_lists_sub_errors() {
        let inner = append_path(
            LoadError::type_error(ValueKind::Int, json!(null)),
            TrailElement::Index(1),
        );
        let err = LoadError::aggregate("while loading model point", vec![inner]);
        assert_eq!(err.sub_errors().len(), 1);
        let text = err.to_string();
        assert!(text.starts_with("while loading model point (1 sub-errors)"));
        assert!(text.contains("expected int, got null at [1]"));
    }

    #[test]
    fn dump_error_keeps_custom_source() {
        let err = DumpError::msg("boom");
        assert_eq!(err.to_string(), "boom");
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.sub_errors().is_empty());
    }

    #[test]
    fn cannot_provide_names_the_model() {
        let err = CannotProvide::new("point", "field `a` is missing");
        assert_eq!(
            err.to_string(),
            "cannot provide codec for `point`: field `a` is missing"
        );
    }
}
