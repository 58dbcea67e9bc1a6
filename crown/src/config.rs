//! Retort-wide settings.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crown_ir::DebugTrail;
use crown_layout::{ExtraIn, ExtraOut, FieldPredicate, LayoutConfig, NameStyle};
use serde::{Deserialize, Serialize};

/// Global policy for unknown input keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtraInPolicy {
    #[default]
    Skip,
    Forbid,
    Kwargs,
}

/// Global policy for extra output keys.
///
/// Only `skip` exists at this level: the other output policies name fields
/// or functions of a particular model and are set per model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtraOutPolicy {
    #[default]
    Skip,
}

/// Settings shared by every codec a retort compiles.
///
/// Layout options here form the bottom layer; per-model layers registered
/// with a [`ModelEntry`](crate::ModelEntry) override them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetortConfig {
    pub debug_trail: DebugTrail,
    pub strict_coercion: bool,
    pub use_default_for_omitted: bool,
    pub name_style: Option<NameStyle>,
    pub trim_trailing_underscore: bool,
    pub as_list: bool,
    pub omit_default: bool,
    pub extra_in: ExtraInPolicy,
    pub extra_out: ExtraOutPolicy,
}

impl Default for RetortConfig {
    fn default() -> Self {
        Self {
            debug_trail: DebugTrail::All,
            strict_coercion: true,
            use_default_for_omitted: false,
            name_style: None,
            trim_trailing_underscore: true,
            as_list: false,
            omit_default: false,
            extra_in: ExtraInPolicy::Skip,
            extra_out: ExtraOutPolicy::Skip,
        }
    }
}

impl RetortConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Cache key component: equal configs share compiled codecs.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// The layout layer every model starts from.
    pub fn layout_layer<M>(&self) -> LayoutConfig<M> {
        let extra_in = match self.extra_in {
            ExtraInPolicy::Skip => ExtraIn::Skip,
            ExtraInPolicy::Forbid => ExtraIn::Forbid,
            ExtraInPolicy::Kwargs => ExtraIn::Kwargs,
        };
        let extra_out = match self.extra_out {
            ExtraOutPolicy::Skip => ExtraOut::Skip,
        };
        let omit_default = if self.omit_default {
            FieldPredicate::Any
        } else {
            FieldPredicate::Nothing
        };
        LayoutConfig::new()
            .name_style(self.name_style)
            .trim_trailing_underscore(self.trim_trailing_underscore)
            .as_list(self.as_list)
            .omit_default(omit_default)
            .extra_in(extra_in)
            .extra_out(extra_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crown_layout::LayoutSchema;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = RetortConfig::from_json(
            r#"{"debug_trail": "first", "name_style": "camelCase", "extra_in": "forbid"}"#,
        )
        .unwrap();
        assert_eq!(config.debug_trail, DebugTrail::First);
        assert_eq!(config.name_style, Some(NameStyle::Camel));
        assert_eq!(config.extra_in, ExtraInPolicy::Forbid);
        assert!(config.strict_coercion);
        assert!(config.trim_trailing_underscore);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(RetortConfig::from_json(r#"{"debug": "all"}"#).is_err());
    }

    #[test]
    fn fingerprint_follows_content() {
        let base = RetortConfig::default();
        let same = RetortConfig::default();
        let other = RetortConfig {
            strict_coercion: false,
            ..RetortConfig::default()
        };
        assert_eq!(base.fingerprint(), same.fingerprint());
        assert_ne!(base.fingerprint(), other.fingerprint());
    }

    #[test]
    fn layer_sets_every_global_option() {
        let config = RetortConfig {
            name_style: Some(NameStyle::UpperSnake),
            as_list: true,
            omit_default: true,
            extra_in: ExtraInPolicy::Kwargs,
            ..RetortConfig::default()
        };
        let layer = config.layout_layer::<()>();
        let schema = LayoutSchema::merge([&layer]);
        assert_eq!(schema.name_style, Some(NameStyle::UpperSnake));
        assert!(schema.as_list);
        assert!(matches!(schema.omit_default, FieldPredicate::Any));
        assert!(matches!(schema.extra_in, ExtraIn::Kwargs));
    }
}
