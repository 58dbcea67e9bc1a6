//! Debug trails: where inside nested data a failure happened.
//!
//! A trail is built inside out. The failing operation names itself and each
//! enclosing frame pushes its own element to the front, so the finished trail
//! reads from the root of the data down to the failure.

use core::fmt;
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// One step of a debug trail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrailElement {
    /// Mapping key.
    Key(String),
    /// Sequence position.
    Index(usize),
    /// Attribute read by an attribute accessor.
    Attr(String),
    /// Opaque marker supplied by a custom accessor.
    Marker(String),
}

impl From<&str> for TrailElement {
    fn from(value: &str) -> Self {
        TrailElement::Key(value.to_owned())
    }
}

impl From<String> for TrailElement {
    fn from(value: String) -> Self {
        TrailElement::Key(value)
    }
}

impl From<usize> for TrailElement {
    fn from(value: usize) -> Self {
        TrailElement::Index(value)
    }
}

impl fmt::Display for TrailElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrailElement::Key(key) => write!(f, "{key:?}"),
            TrailElement::Index(index) => write!(f, "{index}"),
            TrailElement::Attr(name) => write!(f, ".{name}"),
            TrailElement::Marker(marker) => write!(f, "<{marker}>"),
        }
    }
}

pub type Trail = VecDeque<TrailElement>;

/// How much location detail compiled codecs attach to failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugTrail {
    /// No trails; the first failure is returned as is.
    Disable,
    /// The first failure is returned with its trail.
    First,
    /// Every independent failure is collected, each with its own trail.
    #[default]
    All,
}

/// Errors able to carry a trail.
///
/// `trail_mut` returns `None` for errors that cannot hold one; the path
/// helpers are then no-ops.
pub trait Trailed {
    fn trail_mut(&mut self) -> Option<&mut Trail>;
}

/// Prepends `element` to the trail of `err`.
pub fn append_path<E: Trailed>(mut err: E, element: TrailElement) -> E {
    if let Some(trail) = err.trail_mut() {
        trail.push_front(element);
    }
    err
}

/// Prepends all `elements` to the trail of `err`, keeping their order.
pub fn extend_path<E, I>(mut err: E, elements: I) -> E
where
    E: Trailed,
    I: IntoIterator<Item = TrailElement>,
    I::IntoIter: DoubleEndedIterator,
{
    if let Some(trail) = err.trail_mut() {
        for element in elements.into_iter().rev() {
            trail.push_front(element);
        }
    }
    err
}

/// Renders a trail as `["x", 0, .attr]`.
pub fn render_trail(trail: &Trail) -> String {
    let mut out = String::from("[");
    for (idx, element) in trail.iter().enumerate() {
        if idx > 0 {
            out.push_str(", ");
        }
        out.push_str(&element.to_string());
    }
    out.push(']');
    out
}
