//! Crowns: the layout of external data around a flat set of fields.

use core::fmt;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::shape::{Extractor, Factory, Saturator, Sieve};
use crate::trail::TrailElement;
use crate::value::Value;

/// One step into external data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CrownKey {
    Key(String),
    Index(usize),
}

impl CrownKey {
    pub fn is_index(&self) -> bool {
        matches!(self, CrownKey::Index(_))
    }
}

impl From<&str> for CrownKey {
    fn from(value: &str) -> Self {
        CrownKey::Key(value.to_owned())
    }
}

impl From<String> for CrownKey {
    fn from(value: String) -> Self {
        CrownKey::Key(value)
    }
}

impl From<usize> for CrownKey {
    fn from(value: usize) -> Self {
        CrownKey::Index(value)
    }
}

impl From<&CrownKey> for TrailElement {
    fn from(value: &CrownKey) -> Self {
        match value {
            CrownKey::Key(key) => TrailElement::Key(key.clone()),
            CrownKey::Index(index) => TrailElement::Index(*index),
        }
    }
}

impl fmt::Display for CrownKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrownKey::Key(key) => write!(f, "{key:?}"),
            CrownKey::Index(index) => write!(f, "{index}"),
        }
    }
}

pub type CrownPath = SmallVec<[CrownKey; 4]>;

/// Renders a path as `["x", 0]`.
pub fn path_to_string(path: &[CrownKey]) -> String {
    let parts: Vec<String> = path.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}

pub fn path_trail(path: &[CrownKey]) -> impl DoubleEndedIterator<Item = TrailElement> + '_ {
    path.iter().map(TrailElement::from)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DictExtraPolicy {
    #[default]
    Skip,
    Forbid,
    Collect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListExtraPolicy {
    #[default]
    Skip,
    Forbid,
}

// ============================================================================
// Input crowns
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum InputCrown {
    Dict(InputDict),
    List(InputList),
    Field(String),
    /// Consumed and ignored on load.
    None,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InputDict {
    pub entries: Vec<(String, InputCrown)>,
    pub extra: DictExtraPolicy,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InputList {
    pub items: Vec<InputCrown>,
    pub extra: ListExtraPolicy,
}

impl InputCrown {
    pub fn field(id: impl Into<String>) -> Self {
        InputCrown::Field(id.into())
    }

    pub fn dict<K: Into<String>>(
        entries: impl IntoIterator<Item = (K, InputCrown)>,
        extra: DictExtraPolicy,
    ) -> Self {
        InputCrown::Dict(InputDict {
            entries: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            extra,
        })
    }

    pub fn list(items: impl IntoIterator<Item = InputCrown>, extra: ListExtraPolicy) -> Self {
        InputCrown::List(InputList {
            items: items.into_iter().collect(),
            extra,
        })
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, InputCrown::Dict(_) | InputCrown::List(_))
    }

    /// Calls `visit` for every field leaf with its path, depth first, in
    /// crown order.
    pub fn for_each_field<'a>(&'a self, visit: &mut dyn FnMut(&'a str, &CrownPath)) {
        fn walk<'a>(
            crown: &'a InputCrown,
            path: &mut CrownPath,
            visit: &mut dyn FnMut(&'a str, &CrownPath),
        ) {
            match crown {
                InputCrown::Dict(dict) => {
                    for (key, sub) in &dict.entries {
                        path.push(CrownKey::Key(key.clone()));
                        walk(sub, path, visit);
                        path.pop();
                    }
                }
                InputCrown::List(list) => {
                    for (index, sub) in list.items.iter().enumerate() {
                        path.push(CrownKey::Index(index));
                        walk(sub, path, visit);
                        path.pop();
                    }
                }
                InputCrown::Field(id) => visit(id, path),
                InputCrown::None => {}
            }
        }
        walk(self, &mut CrownPath::new(), visit);
    }

    /// True if some field leaf below satisfies `is_required`.
    pub fn has_required(&self, is_required: &dyn Fn(&str) -> bool) -> bool {
        match self {
            InputCrown::Dict(dict) => {
                dict.entries.iter().any(|(_, sub)| sub.has_required(is_required))
            }
            InputCrown::List(list) => list.items.iter().any(|sub| sub.has_required(is_required)),
            InputCrown::Field(id) => is_required(id),
            InputCrown::None => false,
        }
    }
}

// ============================================================================
// Output crowns
// ============================================================================

/// Value emitted at a position that carries no field.
#[derive(Clone)]
pub enum Filler {
    Value(Value),
    Factory(Factory),
}

impl Filler {
    pub fn produce(&self) -> Value {
        match self {
            Filler::Value(value) => value.clone(),
            Filler::Factory(factory) => factory(),
        }
    }
}

impl Default for Filler {
    fn default() -> Self {
        Filler::Value(Value::Null)
    }
}

impl fmt::Debug for Filler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filler::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Filler::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

pub enum OutputCrown<M> {
    Dict(OutputDict<M>),
    List(OutputList<M>),
    Field(String),
    None(Filler),
}

pub struct OutputDict<M> {
    pub entries: Vec<(String, OutputCrown<M>)>,
    pub sieves: BTreeMap<String, Sieve<M>>,
}

pub struct OutputList<M> {
    pub items: Vec<OutputCrown<M>>,
}

impl<M> OutputCrown<M> {
    pub fn field(id: impl Into<String>) -> Self {
        OutputCrown::Field(id.into())
    }

    pub fn dict<K: Into<String>>(entries: impl IntoIterator<Item = (K, OutputCrown<M>)>) -> Self {
        OutputCrown::Dict(OutputDict {
            entries: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            sieves: BTreeMap::new(),
        })
    }

    pub fn list(items: impl IntoIterator<Item = OutputCrown<M>>) -> Self {
        OutputCrown::List(OutputList {
            items: items.into_iter().collect(),
        })
    }

    pub fn filler(value: Value) -> Self {
        OutputCrown::None(Filler::Value(value))
    }

    /// Attaches a sieve to `key` of a dict crown. No-op for other crowns.
    pub fn with_sieve(
        mut self,
        key: impl Into<String>,
        sieve: impl Fn(&M, &Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        if let OutputCrown::Dict(dict) = &mut self {
            dict.sieves.insert(key.into(), Arc::new(sieve));
        }
        self
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, OutputCrown::Dict(_) | OutputCrown::List(_))
    }

    pub fn for_each_field<'a>(&'a self, visit: &mut dyn FnMut(&'a str, &CrownPath)) {
        fn walk<'a, M>(
            crown: &'a OutputCrown<M>,
            path: &mut CrownPath,
            visit: &mut dyn FnMut(&'a str, &CrownPath),
        ) {
            match crown {
                OutputCrown::Dict(dict) => {
                    for (key, sub) in &dict.entries {
                        path.push(CrownKey::Key(key.clone()));
                        walk(sub, path, visit);
                        path.pop();
                    }
                }
                OutputCrown::List(list) => {
                    for (index, sub) in list.items.iter().enumerate() {
                        path.push(CrownKey::Index(index));
                        walk(sub, path, visit);
                        path.pop();
                    }
                }
                OutputCrown::Field(id) => visit(id, path),
                OutputCrown::None(_) => {}
            }
        }
        walk(self, &mut CrownPath::new(), visit);
    }
}

impl<M> Clone for OutputCrown<M> {
    fn clone(&self) -> Self {
        match self {
            OutputCrown::Dict(dict) => OutputCrown::Dict(OutputDict {
                entries: dict.entries.clone(),
                sieves: dict.sieves.clone(),
            }),
            OutputCrown::List(list) => OutputCrown::List(OutputList {
                items: list.items.clone(),
            }),
            OutputCrown::Field(id) => OutputCrown::Field(id.clone()),
            OutputCrown::None(filler) => OutputCrown::None(filler.clone()),
        }
    }
}

impl<M> fmt::Debug for OutputCrown<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputCrown::Dict(dict) => f
                .debug_struct("Dict")
                .field("entries", &dict.entries)
                .field("sieves", &dict.sieves.keys().collect::<Vec<_>>())
                .finish(),
            OutputCrown::List(list) => f.debug_tuple("List").field(&list.items).finish(),
            OutputCrown::Field(id) => f.debug_tuple("Field").field(id).finish(),
            OutputCrown::None(filler) => f.debug_tuple("None").field(filler).finish(),
        }
    }
}

// ============================================================================
// Name layouts
// ============================================================================

/// Where extras collected on load are delivered.
pub enum InputExtraMove<M> {
    None,
    /// Passed to the constructor as extra keyword arguments.
    Kwargs,
    /// Each listed field receives the extras mapping.
    Targets(Vec<String>),
    /// Called with the constructed instance and the extras.
    Saturate(Saturator<M>),
}

/// Where extra output data comes from.
pub enum OutputExtraMove<M> {
    None,
    /// Listed fields hold mappings merged into the root.
    Targets(Vec<String>),
    Extract(Extractor<M>),
}

impl<M> InputExtraMove<M> {
    pub fn targets(&self) -> &[String] {
        match self {
            InputExtraMove::Targets(targets) => targets,
            _ => &[],
        }
    }

    pub fn has_sink(&self) -> bool {
        !matches!(self, InputExtraMove::None)
    }
}

impl<M> OutputExtraMove<M> {
    pub fn targets(&self) -> &[String] {
        match self {
            OutputExtraMove::Targets(targets) => targets,
            _ => &[],
        }
    }
}

impl<M> Clone for InputExtraMove<M> {
    fn clone(&self) -> Self {
        match self {
            InputExtraMove::None => InputExtraMove::None,
            InputExtraMove::Kwargs => InputExtraMove::Kwargs,
            InputExtraMove::Targets(targets) => InputExtraMove::Targets(targets.clone()),
            InputExtraMove::Saturate(f) => InputExtraMove::Saturate(f.clone()),
        }
    }
}

impl<M> Clone for OutputExtraMove<M> {
    fn clone(&self) -> Self {
        match self {
            OutputExtraMove::None => OutputExtraMove::None,
            OutputExtraMove::Targets(targets) => OutputExtraMove::Targets(targets.clone()),
            OutputExtraMove::Extract(f) => OutputExtraMove::Extract(f.clone()),
        }
    }
}

impl<M> fmt::Debug for InputExtraMove<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputExtraMove::None => f.write_str("None"),
            InputExtraMove::Kwargs => f.write_str("Kwargs"),
            InputExtraMove::Targets(targets) => f.debug_tuple("Targets").field(targets).finish(),
            InputExtraMove::Saturate(_) => f.write_str("Saturate(..)"),
        }
    }
}

impl<M> fmt::Debug for OutputExtraMove<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputExtraMove::None => f.write_str("None"),
            OutputExtraMove::Targets(targets) => f.debug_tuple("Targets").field(targets).finish(),
            OutputExtraMove::Extract(_) => f.write_str("Extract(..)"),
        }
    }
}

pub struct InputNameLayout<M> {
    pub crown: InputCrown,
    pub extra_move: InputExtraMove<M>,
}

pub struct OutputNameLayout<M> {
    pub crown: OutputCrown<M>,
    pub extra_move: OutputExtraMove<M>,
}

impl<M> InputNameLayout<M> {
    pub fn new(crown: InputCrown, extra_move: InputExtraMove<M>) -> Self {
        Self { crown, extra_move }
    }
}

impl<M> OutputNameLayout<M> {
    pub fn new(crown: OutputCrown<M>, extra_move: OutputExtraMove<M>) -> Self {
        Self { crown, extra_move }
    }
}

impl<M> Clone for InputNameLayout<M> {
    fn clone(&self) -> Self {
        Self::new(self.crown.clone(), self.extra_move.clone())
    }
}

impl<M> Clone for OutputNameLayout<M> {
    fn clone(&self) -> Self {
        Self::new(self.crown.clone(), self.extra_move.clone())
    }
}

impl<M> fmt::Debug for InputNameLayout<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputNameLayout")
            .field("crown", &self.crown)
            .field("extra_move", &self.extra_move)
            .finish()
    }
}

impl<M> fmt::Debug for OutputNameLayout<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputNameLayout")
            .field("crown", &self.crown)
            .field("extra_move", &self.extra_move)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn paths_render_keys_and_indices() {
        let path: CrownPath = smallvec![CrownKey::from("x"), CrownKey::from(0usize)];
        assert_eq!(path_to_string(&path), r#"["x", 0]"#);
        assert_eq!(path_to_string(&[]), "[]");
    }

    #[test]
    fn input_fields_are_visited_in_crown_order() {
        let crown = InputCrown::dict(
            [
                (
                    "x",
                    InputCrown::list(
                        [InputCrown::field("a"), InputCrown::None, InputCrown::field("b")],
                        ListExtraPolicy::Skip,
                    ),
                ),
                ("c", InputCrown::field("c")),
            ],
            DictExtraPolicy::Forbid,
        );
        let mut seen = Vec::new();
        crown.for_each_field(&mut |id, path| seen.push((id.to_owned(), path_to_string(path))));
        assert_eq!(
            seen,
            vec![
                ("a".to_owned(), r#"["x", 0]"#.to_owned()),
                ("b".to_owned(), r#"["x", 2]"#.to_owned()),
                ("c".to_owned(), r#"["c"]"#.to_owned()),
            ]
        );
        assert!(crown.has_required(&|id| id == "b"));
        assert!(!crown.has_required(&|_| false));
    }

    #[test]
    fn sieves_only_attach_to_dicts() {
        let dict = OutputCrown::<Value>::dict([("a", OutputCrown::field("a"))])
            .with_sieve("a", |_, value| !value.is_null());
        let OutputCrown::Dict(dict) = &dict else {
            panic!("expected dict crown");
        };
        assert!(dict.sieves.contains_key("a"));

        let list =
            OutputCrown::<Value>::list([OutputCrown::field("a")]).with_sieve("a", |_, _| true);
        assert!(matches!(list, OutputCrown::List(_)));
    }

    #[test]
    fn default_filler_is_null() {
        assert_eq!(Filler::default().produce(), Value::Null);
    }
}
