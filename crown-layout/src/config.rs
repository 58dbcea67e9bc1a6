//! Layered layout configuration.
//!
//! A [`LayoutConfig`] sets only the options it mentions. Layers are merged in
//! order into a [`LayoutSchema`]: later layers override scalar options and
//! their `map` rules are tried before the rules of earlier layers.

use std::fmt;
use std::sync::Arc;

use crown_ir::{DumpError, Extractor, LoadError, Map, Saturator, Value};

use crate::mapping::{FieldPredicate, MapResult, NameMapEntry};
use crate::name_style::NameStyle;

/// Where unknown input keys go.
pub enum ExtraIn<M> {
    Skip,
    Forbid,
    /// Passed to the constructor as extra keyword arguments.
    Kwargs,
    /// Collected and loaded into the named fields.
    Targets(Vec<String>),
    /// Collected and handed to a function after construction.
    Saturate(Saturator<M>),
}

/// Where extra output keys come from.
pub enum ExtraOut<M> {
    Skip,
    /// Merged from the dumped values of the named fields.
    Targets(Vec<String>),
    Extract(Extractor<M>),
}

impl<M> ExtraIn<M> {
    pub fn target(id: impl Into<String>) -> Self {
        ExtraIn::Targets(vec![id.into()])
    }

    pub fn saturate(
        f: impl Fn(&mut M, Map<String, Value>) -> Result<(), LoadError> + Send + Sync + 'static,
    ) -> Self {
        ExtraIn::Saturate(Arc::new(f))
    }
}

impl<M> ExtraOut<M> {
    pub fn target(id: impl Into<String>) -> Self {
        ExtraOut::Targets(vec![id.into()])
    }

    pub fn extract(
        f: impl Fn(&M) -> Result<Map<String, Value>, DumpError> + Send + Sync + 'static,
    ) -> Self {
        ExtraOut::Extract(Arc::new(f))
    }
}

impl<M> Clone for ExtraIn<M> {
    fn clone(&self) -> Self {
        match self {
            ExtraIn::Skip => ExtraIn::Skip,
            ExtraIn::Forbid => ExtraIn::Forbid,
            ExtraIn::Kwargs => ExtraIn::Kwargs,
            ExtraIn::Targets(targets) => ExtraIn::Targets(targets.clone()),
            ExtraIn::Saturate(f) => ExtraIn::Saturate(f.clone()),
        }
    }
}

impl<M> Clone for ExtraOut<M> {
    fn clone(&self) -> Self {
        match self {
            ExtraOut::Skip => ExtraOut::Skip,
            ExtraOut::Targets(targets) => ExtraOut::Targets(targets.clone()),
            ExtraOut::Extract(f) => ExtraOut::Extract(f.clone()),
        }
    }
}

impl<M> fmt::Debug for ExtraIn<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtraIn::Skip => f.write_str("Skip"),
            ExtraIn::Forbid => f.write_str("Forbid"),
            ExtraIn::Kwargs => f.write_str("Kwargs"),
            ExtraIn::Targets(targets) => f.debug_tuple("Targets").field(targets).finish(),
            ExtraIn::Saturate(_) => f.write_str("Saturate(..)"),
        }
    }
}

impl<M> fmt::Debug for ExtraOut<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtraOut::Skip => f.write_str("Skip"),
            ExtraOut::Targets(targets) => f.debug_tuple("Targets").field(targets).finish(),
            ExtraOut::Extract(_) => f.write_str("Extract(..)"),
        }
    }
}

/// One configuration layer.
pub struct LayoutConfig<M> {
    pub skip: Option<FieldPredicate>,
    pub only: Option<FieldPredicate>,
    pub map: Vec<NameMapEntry>,
    pub trim_trailing_underscore: Option<bool>,
    pub name_style: Option<Option<NameStyle>>,
    pub as_list: Option<bool>,
    pub omit_default: Option<FieldPredicate>,
    pub extra_in: Option<ExtraIn<M>>,
    pub extra_out: Option<ExtraOut<M>>,
}

impl<M> Default for LayoutConfig<M> {
    fn default() -> Self {
        Self {
            skip: None,
            only: None,
            map: Vec::new(),
            trim_trailing_underscore: None,
            name_style: None,
            as_list: None,
            omit_default: None,
            extra_in: None,
            extra_out: None,
        }
    }
}

impl<M> Clone for LayoutConfig<M> {
    fn clone(&self) -> Self {
        Self {
            skip: self.skip.clone(),
            only: self.only.clone(),
            map: self.map.clone(),
            trim_trailing_underscore: self.trim_trailing_underscore,
            name_style: self.name_style,
            as_list: self.as_list,
            omit_default: self.omit_default.clone(),
            extra_in: self.extra_in.clone(),
            extra_out: self.extra_out.clone(),
        }
    }
}

impl<M> fmt::Debug for LayoutConfig<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayoutConfig")
            .field("skip", &self.skip)
            .field("only", &self.only)
            .field("map", &self.map)
            .field("trim_trailing_underscore", &self.trim_trailing_underscore)
            .field("name_style", &self.name_style)
            .field("as_list", &self.as_list)
            .field("omit_default", &self.omit_default)
            .field("extra_in", &self.extra_in)
            .field("extra_out", &self.extra_out)
            .finish()
    }
}

impl<M> LayoutConfig<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip(mut self, predicate: FieldPredicate) -> Self {
        self.skip = Some(predicate);
        self
    }

    pub fn only(mut self, predicate: FieldPredicate) -> Self {
        self.only = Some(predicate);
        self
    }

    /// Adds a mapping rule. Within one layer, earlier rules win.
    pub fn map(mut self, predicate: FieldPredicate, result: MapResult) -> Self {
        self.map.push(NameMapEntry::new(predicate, result));
        self
    }

    pub fn map_id(self, id: &str, result: MapResult) -> Self {
        self.map(FieldPredicate::id(id), result)
    }

    pub fn trim_trailing_underscore(mut self, trim: bool) -> Self {
        self.trim_trailing_underscore = Some(trim);
        self
    }

    /// `None` keeps ids as they are.
    pub fn name_style(mut self, style: Option<NameStyle>) -> Self {
        self.name_style = Some(style);
        self
    }

    pub fn as_list(mut self, as_list: bool) -> Self {
        self.as_list = Some(as_list);
        self
    }

    pub fn omit_default(mut self, predicate: FieldPredicate) -> Self {
        self.omit_default = Some(predicate);
        self
    }

    pub fn extra_in(mut self, extra: ExtraIn<M>) -> Self {
        self.extra_in = Some(extra);
        self
    }

    pub fn extra_out(mut self, extra: ExtraOut<M>) -> Self {
        self.extra_out = Some(extra);
        self
    }
}

/// Fully resolved layout options.
pub struct LayoutSchema<M> {
    pub skip: FieldPredicate,
    pub only: FieldPredicate,
    pub map: Vec<NameMapEntry>,
    pub trim_trailing_underscore: bool,
    pub name_style: Option<NameStyle>,
    pub as_list: bool,
    pub omit_default: FieldPredicate,
    pub extra_in: ExtraIn<M>,
    pub extra_out: ExtraOut<M>,
}

impl<M> Default for LayoutSchema<M> {
    fn default() -> Self {
        Self {
            skip: FieldPredicate::Nothing,
            only: FieldPredicate::Any,
            map: Vec::new(),
            trim_trailing_underscore: true,
            name_style: None,
            as_list: false,
            omit_default: FieldPredicate::Nothing,
            extra_in: ExtraIn::Skip,
            extra_out: ExtraOut::Skip,
        }
    }
}

impl<M> fmt::Debug for LayoutSchema<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayoutSchema")
            .field("skip", &self.skip)
            .field("only", &self.only)
            .field("map", &self.map)
            .field("trim_trailing_underscore", &self.trim_trailing_underscore)
            .field("name_style", &self.name_style)
            .field("as_list", &self.as_list)
            .field("omit_default", &self.omit_default)
            .field("extra_in", &self.extra_in)
            .field("extra_out", &self.extra_out)
            .finish()
    }
}

impl<M> LayoutSchema<M> {
    /// Folds `layers` over the defaults, first layer first.
    pub fn merge<'a>(layers: impl IntoIterator<Item = &'a LayoutConfig<M>>) -> Self
    where
        M: 'a,
    {
        let mut schema = Self::default();
        for layer in layers {
            schema.apply(layer);
        }
        schema
    }

    pub fn apply(&mut self, layer: &LayoutConfig<M>) {
        if let Some(skip) = &layer.skip {
            self.skip = skip.clone();
        }
        if let Some(only) = &layer.only {
            self.only = only.clone();
        }
        if !layer.map.is_empty() {
            let mut map = layer.map.clone();
            map.append(&mut self.map);
            self.map = map;
        }
        if let Some(trim) = layer.trim_trailing_underscore {
            self.trim_trailing_underscore = trim;
        }
        if let Some(style) = layer.name_style {
            self.name_style = style;
        }
        if let Some(as_list) = layer.as_list {
            self.as_list = as_list;
        }
        if let Some(omit_default) = &layer.omit_default {
            self.omit_default = omit_default.clone();
        }
        if let Some(extra_in) = &layer.extra_in {
            self.extra_in = extra_in.clone();
        }
        if let Some(extra_out) = &layer.extra_out {
            self.extra_out = extra_out.clone();
        }
    }
}
