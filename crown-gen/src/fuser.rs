//! Validation of a shape against a name layout.
//!
//! Fusing checks that the crown and the extra move fit the shape and strips
//! the shape down to the fields the layout actually uses.

use std::collections::{BTreeSet, HashMap, HashSet};

use crown_ir::{
    CrownKey, CrownPath, DictExtraPolicy, InputCrown, InputExtraMove, InputField, InputNameLayout,
    InputShape, OutputCrown, OutputExtraMove, OutputField, OutputNameLayout, OutputShape, Param,
    ParamKind, path_to_string,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FuseError {
    #[error("required field `{0}` is neither placed in the crown nor an extra target")]
    UnreachableRequired(String),
    #[error("extra target `{0}` is not a field of the shape")]
    ExtraTargetNotAField(String),
    #[error("field `{0}` is an extra target and is also placed in the crown")]
    ExtraTargetInCrown(String),
    #[error("extra data is collected at {path} but the model has nowhere to put it")]
    CollectWithoutSink { path: String },
    #[error("fields `{first}` and `{second}` point to the same path {path}")]
    DuplicatePath {
        first: String,
        second: String,
        path: String,
    },
    #[error(
        "field `{prefix}` points to {prefix_path} which is a prefix of {field_path} of field `{field}`"
    )]
    PrefixPath {
        prefix: String,
        prefix_path: String,
        field: String,
        field_path: String,
    },
    #[error("inconsistent path elements at {path}: got string and integer keys (field `{field}`)")]
    InconsistentBranch { field: String, path: String },
    #[error("field `{0}` points to an empty path")]
    EmptyPath(String),
    #[error("optional field `{field}` can not be placed at list position {path}")]
    OptionalInList { field: String, path: String },
    #[error("sieve is attached to key `{key}` which is absent from the dict at {path}")]
    SieveOnAbsentKey { key: String, path: String },
    #[error("key `{key}` appears more than once in the dict at {path}")]
    RepeatedKey { key: String, path: String },
    #[error("field `{0}` is placed in the crown more than once")]
    DuplicatedField(String),
    #[error("crown refers to unknown field `{0}`")]
    UnknownField(String),
    #[error("crown root must be a dict or a list")]
    RootNotBranch,
    #[error("extra data collected at {path} can not reach the root")]
    DetachedCollect { path: String },
    #[error("param `{skipped}` is skipped, so positional-only param `{used}` can not be passed")]
    SkippedPositional { skipped: String, used: String },
    #[error("extra data requires a dict at the crown root")]
    ExtraWithoutMappingRoot,
    #[error("extra data is passed as keyword arguments but the constructor takes none")]
    KwargsNotAccepted,
    #[error("param `{0}` may collide with collected keyword arguments: it is not a key of the root dict")]
    KwargsShadowParam(String),
}

/// Checks a flat `(field id, path)` list for duplicate paths, prefix paths,
/// and branches mixing string keys with indices.
pub fn check_paths(paths: &[(&str, CrownPath)]) -> Result<(), FuseError> {
    let mut sorted: Vec<&(&str, CrownPath)> = paths.iter().collect();
    sorted.sort_by(|a, b| a.1.cmp(&b.1));

    for pair in sorted.windows(2) {
        let (first, second) = (pair[0], pair[1]);
        if first.1 == second.1 {
            return Err(FuseError::DuplicatePath {
                first: first.0.to_owned(),
                second: second.0.to_owned(),
                path: path_to_string(&first.1),
            });
        }
    }
    // a prefix sorts right before the paths it starts
    for pair in sorted.windows(2) {
        let (prefix, field) = (pair[0], pair[1]);
        if field.1.starts_with(&prefix.1) {
            return Err(FuseError::PrefixPath {
                prefix: prefix.0.to_owned(),
                prefix_path: path_to_string(&prefix.1),
                field: field.0.to_owned(),
                field_path: path_to_string(&field.1),
            });
        }
    }

    let mut branch_kinds: HashMap<&[CrownKey], bool> = HashMap::new();
    for (id, path) in paths {
        for depth in 0..path.len() {
            let is_index = path[depth].is_index();
            let parent = &path[..depth];
            match branch_kinds.get(parent) {
                Some(&seen) if seen != is_index => {
                    return Err(FuseError::InconsistentBranch {
                        field: (*id).to_owned(),
                        path: path_to_string(parent),
                    });
                }
                Some(_) => {}
                None => {
                    branch_kinds.insert(parent, is_index);
                }
            }
        }
    }

    match paths.iter().find(|(_, path)| path.is_empty()) {
        Some((id, _)) => Err(FuseError::EmptyPath((*id).to_owned())),
        None => Ok(()),
    }
}

/// Input shape restricted to the fields a layout uses.
#[derive(Debug)]
pub struct StrippedInputShape<'a> {
    /// Used fields, in shape order.
    pub fields: Vec<&'a InputField>,
    /// Params of the used fields, in shape order.
    pub params: Vec<&'a Param>,
    /// Ids of fields the layout leaves out.
    pub skipped: Vec<&'a str>,
}

impl StrippedInputShape<'_> {
    pub fn contains(&self, id: &str) -> bool {
        self.fields.iter().any(|field| field.id == id)
    }
}

#[derive(Debug)]
pub struct StrippedOutputShape<'a, M> {
    pub fields: Vec<&'a OutputField<M>>,
    pub skipped: Vec<&'a str>,
}

fn collect_leaves<'a>(
    visit: impl FnOnce(&mut dyn FnMut(&'a str, &CrownPath)),
    has_field: impl Fn(&str) -> bool,
) -> Result<Vec<(&'a str, CrownPath)>, FuseError> {
    let mut leaves = Vec::new();
    visit(&mut |id: &'a str, path: &CrownPath| leaves.push((id, path.clone())));

    let mut seen = HashSet::new();
    for (id, _) in &leaves {
        if !has_field(id) {
            return Err(FuseError::UnknownField((*id).to_owned()));
        }
        if !seen.insert(*id) {
            return Err(FuseError::DuplicatedField((*id).to_owned()));
        }
    }
    check_paths(&leaves)?;
    Ok(leaves)
}

fn check_targets(
    targets: &[String],
    placed: &HashSet<&str>,
    has_field: impl Fn(&str) -> bool,
) -> Result<(), FuseError> {
    for target in targets {
        if !has_field(target) {
            return Err(FuseError::ExtraTargetNotAField(target.clone()));
        }
        if placed.contains(target.as_str()) {
            return Err(FuseError::ExtraTargetInCrown(target.clone()));
        }
    }
    Ok(())
}

fn check_unique_keys<'a, C: 'a>(
    entries: impl IntoIterator<Item = &'a (String, C)>,
    path: &CrownPath,
) -> Result<(), FuseError> {
    let mut seen: HashSet<&'a str> = HashSet::new();
    for (key, _) in entries {
        if !seen.insert(key.as_str()) {
            return Err(FuseError::RepeatedKey {
                key: key.clone(),
                path: path_to_string(path),
            });
        }
    }
    Ok(())
}

fn check_input_branches(
    crown: &InputCrown,
    path: &mut CrownPath,
    parent_collects: Option<bool>,
    has_sink: bool,
    is_optional: &dyn Fn(&str) -> bool,
) -> Result<(), FuseError> {
    match crown {
        InputCrown::Dict(dict) => {
            check_unique_keys(&dict.entries, path)?;
            let collects = dict.extra == DictExtraPolicy::Collect;
            if collects {
                if !has_sink {
                    return Err(FuseError::CollectWithoutSink {
                        path: path_to_string(path),
                    });
                }
                // extras nest into the parent's extras, so every ancestor must collect
                if parent_collects == Some(false) {
                    return Err(FuseError::DetachedCollect {
                        path: path_to_string(path),
                    });
                }
            }
            for (key, sub) in &dict.entries {
                path.push(CrownKey::Key(key.clone()));
                check_input_branches(sub, path, Some(collects), has_sink, is_optional)?;
                path.pop();
            }
        }
        InputCrown::List(list) => {
            for (index, sub) in list.items.iter().enumerate() {
                path.push(CrownKey::Index(index));
                if let InputCrown::Field(id) = sub
                    && is_optional(id)
                {
                    return Err(FuseError::OptionalInList {
                        field: id.clone(),
                        path: path_to_string(path),
                    });
                }
                check_input_branches(sub, path, Some(false), has_sink, is_optional)?;
                path.pop();
            }
        }
        InputCrown::Field(_) | InputCrown::None => {}
    }
    Ok(())
}

/// Validates an input layout against its shape.
pub fn fuse_input<'a, M>(
    shape: &'a InputShape<M>,
    layout: &InputNameLayout<M>,
) -> Result<StrippedInputShape<'a>, FuseError> {
    if !layout.crown.is_branch() {
        return Err(FuseError::RootNotBranch);
    }
    let has_field = |id: &str| shape.field(id).is_some();
    let leaves = collect_leaves(|visit| layout.crown.for_each_field(visit), has_field)?;
    let placed: HashSet<&str> = leaves.iter().map(|(id, _)| *id).collect();

    let targets = layout.extra_move.targets();
    check_targets(targets, &placed, has_field)?;

    let is_optional = |id: &str| shape.field(id).is_some_and(InputField::is_optional);
    check_input_branches(
        &layout.crown,
        &mut CrownPath::new(),
        None,
        layout.extra_move.has_sink(),
        &is_optional,
    )?;

    let used = |id: &str| placed.contains(id) || targets.iter().any(|t| t == id);
    if let Some(field) = shape.fields().iter().find(|f| f.required && !used(&f.id)) {
        return Err(FuseError::UnreachableRequired(field.id.clone()));
    }

    let mut skipped_param: Option<&Param> = None;
    for param in shape.params() {
        if !used(&param.field_id) {
            skipped_param.get_or_insert(param);
        } else if let Some(skipped) = skipped_param
            && param.kind == ParamKind::PositionalOnly
        {
            return Err(FuseError::SkippedPositional {
                skipped: skipped.name.clone(),
                used: param.name.clone(),
            });
        }
    }

    if let InputExtraMove::Kwargs = layout.extra_move {
        if shape.kwargs().is_none() {
            return Err(FuseError::KwargsNotAccepted);
        }
        if let InputCrown::Dict(root) = &layout.crown {
            let root_keys: BTreeSet<&str> = root.entries.iter().map(|(k, _)| k.as_str()).collect();
            if let Some(param) = shape
                .params()
                .iter()
                .find(|p| used(&p.field_id) && !root_keys.contains(p.name.as_str()))
            {
                return Err(FuseError::KwargsShadowParam(param.name.clone()));
            }
        }
    }

    Ok(StrippedInputShape {
        fields: shape.fields().iter().filter(|f| used(&f.id)).collect(),
        params: shape.params().iter().filter(|p| used(&p.field_id)).collect(),
        skipped: shape
            .fields()
            .iter()
            .filter(|f| !used(&f.id))
            .map(|f| f.id.as_str())
            .collect(),
    })
}

fn check_output_branches<M>(
    crown: &OutputCrown<M>,
    path: &mut CrownPath,
    is_optional: &dyn Fn(&str) -> bool,
) -> Result<(), FuseError> {
    match crown {
        OutputCrown::Dict(dict) => {
            check_unique_keys(&dict.entries, path)?;
            let keys: BTreeSet<&str> = dict.entries.iter().map(|(k, _)| k.as_str()).collect();
            if let Some(key) = dict.sieves.keys().find(|key| !keys.contains(key.as_str())) {
                return Err(FuseError::SieveOnAbsentKey {
                    key: key.clone(),
                    path: path_to_string(path),
                });
            }
            for (key, sub) in &dict.entries {
                path.push(CrownKey::Key(key.clone()));
                check_output_branches(sub, path, is_optional)?;
                path.pop();
            }
        }
        OutputCrown::List(list) => {
            for (index, sub) in list.items.iter().enumerate() {
                path.push(CrownKey::Index(index));
                if let OutputCrown::Field(id) = sub
                    && is_optional(id)
                {
                    return Err(FuseError::OptionalInList {
                        field: id.clone(),
                        path: path_to_string(path),
                    });
                }
                check_output_branches(sub, path, is_optional)?;
                path.pop();
            }
        }
        OutputCrown::Field(_) | OutputCrown::None(_) => {}
    }
    Ok(())
}

/// Validates an output layout against its shape.
pub fn fuse_output<'a, M>(
    shape: &'a OutputShape<M>,
    layout: &OutputNameLayout<M>,
) -> Result<StrippedOutputShape<'a, M>, FuseError> {
    if !layout.crown.is_branch() {
        return Err(FuseError::RootNotBranch);
    }
    let has_field = |id: &str| shape.field(id).is_some();
    let leaves = collect_leaves(|visit| layout.crown.for_each_field(visit), has_field)?;
    let placed: HashSet<&str> = leaves.iter().map(|(id, _)| *id).collect();

    let targets = layout.extra_move.targets();
    check_targets(targets, &placed, has_field)?;
    if !matches!(layout.extra_move, OutputExtraMove::None)
        && !matches!(layout.crown, OutputCrown::Dict(_))
    {
        return Err(FuseError::ExtraWithoutMappingRoot);
    }

    let is_optional = |id: &str| shape.field(id).is_some_and(OutputField::is_optional);
    check_output_branches(&layout.crown, &mut CrownPath::new(), &is_optional)?;

    let used = |id: &str| placed.contains(id) || targets.iter().any(|t| t == id);
    Ok(StrippedOutputShape {
        fields: shape.fields().iter().filter(|f| used(&f.id)).collect(),
        skipped: shape
            .fields()
            .iter()
            .filter(|f| !used(&f.id))
            .map(|f| f.id.as_str())
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crown_ir::{
        ConstructorArgs, FieldDefault, ListExtraPolicy, LoadError, TypeHint, Value,
    };
    use serde_json::json;
    use smallvec::smallvec;

    fn unit(_: ConstructorArgs) -> Result<Value, LoadError> {
        Ok(Value::Null)
    }

    fn ab_shape() -> InputShape<Value> {
        InputShape::builder(unit)
            .bound_field(InputField::required("a", TypeHint::Int), ParamKind::PositionalOrKeyword)
            .bound_field(
                InputField::optional("b", TypeHint::Int, FieldDefault::Value(json!(0))),
                ParamKind::PositionalOrKeyword,
            )
            .kwargs(TypeHint::Any)
            .build()
            .expect("valid shape")
    }

    fn flat_layout(
        extra: DictExtraPolicy,
        extra_move: InputExtraMove<Value>,
    ) -> InputNameLayout<Value> {
        InputNameLayout::new(
            InputCrown::dict(
                [("a", InputCrown::field("a")), ("b", InputCrown::field("b"))],
                extra,
            ),
            extra_move,
        )
    }

    #[test]
    fn check_paths_reports_duplicates_and_prefixes() {
        let err = check_paths(&[
            ("a", smallvec![CrownKey::from("x")]),
            ("b", smallvec![CrownKey::from("x")]),
        ])
        .expect_err("duplicate");
        assert!(matches!(err, FuseError::DuplicatePath { .. }));

        let err = check_paths(&[
            ("a", smallvec![CrownKey::from("x"), CrownKey::from("y")]),
            ("b", smallvec![CrownKey::from("x")]),
        ])
        .expect_err("prefix");
        let message = err.to_string();
        assert!(message.contains("`a`"));
        assert!(message.contains("`b`"));
    }

    #[test]
    fn check_paths_reports_mixed_branches() {
        let err = check_paths(&[
            ("a", smallvec![CrownKey::from("x"), CrownKey::from(0usize)]),
            ("b", smallvec![CrownKey::from("x"), CrownKey::from("y")]),
        ])
        .expect_err("inconsistent");
        assert_eq!(
            err,
            FuseError::InconsistentBranch {
                field: "b".into(),
                path: r#"["x"]"#.into()
            }
        );
        check_paths(&[
            ("a", smallvec![CrownKey::from("x"), CrownKey::from(0usize)]),
            ("b", smallvec![CrownKey::from("x"), CrownKey::from(1usize)]),
        ])
        .expect("consistent");
    }

    #[test]
    fn strips_unused_optional_fields() {
        let shape = ab_shape();
        let layout = InputNameLayout::new(
            InputCrown::dict([("a", InputCrown::field("a"))], DictExtraPolicy::Skip),
            InputExtraMove::None,
        );
        let stripped = fuse_input(&shape, &layout).expect("fuses");
        assert!(stripped.contains("a"));
        assert_eq!(stripped.skipped, vec!["b"]);
        assert_eq!(stripped.params.len(), 1);
    }

    #[test]
    fn rejects_unreachable_required() {
        let shape = ab_shape();
        let layout = InputNameLayout::new(
            InputCrown::dict([("b", InputCrown::field("b"))], DictExtraPolicy::Skip),
            InputExtraMove::None,
        );
        assert_eq!(
            fuse_input(&shape, &layout).expect_err("a is required"),
            FuseError::UnreachableRequired("a".into())
        );
    }

    #[test]
    fn collect_needs_a_sink() {
        let shape = ab_shape();
        let err = fuse_input(&shape, &flat_layout(DictExtraPolicy::Collect, InputExtraMove::None))
            .expect_err("no sink");
        assert!(matches!(err, FuseError::CollectWithoutSink { .. }));
        fuse_input(&shape, &flat_layout(DictExtraPolicy::Collect, InputExtraMove::Kwargs))
            .expect("kwargs is a sink");
    }

    #[test]
    fn kwargs_rejects_params_outside_root_keys() {
        let shape = ab_shape();
        let layout = InputNameLayout::new(
            InputCrown::dict(
                [("A", InputCrown::field("a")), ("b", InputCrown::field("b"))],
                DictExtraPolicy::Collect,
            ),
            InputExtraMove::Kwargs,
        );
        assert_eq!(
            fuse_input(&shape, &layout).expect_err("shadowing"),
            FuseError::KwargsShadowParam("a".into())
        );
    }

    #[test]
    fn rejects_bad_extra_targets() {
        let shape = ab_shape();
        let err = fuse_input(
            &shape,
            &flat_layout(DictExtraPolicy::Collect, InputExtraMove::Targets(vec!["zz".into()])),
        )
        .expect_err("unknown target");
        assert_eq!(err, FuseError::ExtraTargetNotAField("zz".into()));

        let err = fuse_input(
            &shape,
            &flat_layout(DictExtraPolicy::Collect, InputExtraMove::Targets(vec!["b".into()])),
        )
        .expect_err("target in crown");
        assert_eq!(err, FuseError::ExtraTargetInCrown("b".into()));
    }

    #[test]
    fn rejects_optional_fields_in_lists_and_leaf_roots() {
        let shape = ab_shape();
        let layout = InputNameLayout::new(
            InputCrown::list(
                [InputCrown::field("a"), InputCrown::field("b")],
                ListExtraPolicy::Skip,
            ),
            InputExtraMove::None,
        );
        assert!(matches!(
            fuse_input(&shape, &layout).expect_err("optional in list"),
            FuseError::OptionalInList { .. }
        ));

        let layout = InputNameLayout::new(InputCrown::field("a"), InputExtraMove::None);
        assert_eq!(
            fuse_input(&shape, &layout).expect_err("leaf root"),
            FuseError::RootNotBranch
        );
    }

    #[test]
    fn rejects_collect_below_non_collecting_dict() {
        let shape = ab_shape();
        let layout = InputNameLayout::new(
            InputCrown::dict(
                [
                    ("a", InputCrown::field("a")),
                    (
                        "x",
                        InputCrown::dict([("b", InputCrown::field("b"))], DictExtraPolicy::Collect),
                    ),
                ],
                DictExtraPolicy::Skip,
            ),
            InputExtraMove::Kwargs,
        );
        assert!(matches!(
            fuse_input(&shape, &layout).expect_err("detached"),
            FuseError::DetachedCollect { .. }
        ));
    }

    #[test]
    fn rejects_repeated_keys_in_input_dicts() {
        let shape = ab_shape();
        let layout = InputNameLayout::new(
            InputCrown::dict(
                [
                    ("x", InputCrown::dict([("y", InputCrown::field("a"))], DictExtraPolicy::Skip)),
                    ("x", InputCrown::dict([("z", InputCrown::field("b"))], DictExtraPolicy::Skip)),
                ],
                DictExtraPolicy::Skip,
            ),
            InputExtraMove::None,
        );
        assert_eq!(
            fuse_input(&shape, &layout).expect_err("repeated key"),
            FuseError::RepeatedKey {
                key: "x".into(),
                path: "[]".into()
            }
        );
    }

    #[test]
    fn rejects_repeated_keys_in_output_dicts() {
        let shape = OutputShape::new(vec![
            OutputField::<Value>::attribute("a", TypeHint::Int, true),
            OutputField::<Value>::attribute("b", TypeHint::Int, true),
        ])
        .expect("valid shape");
        let layout = OutputNameLayout::new(
            OutputCrown::dict([
                ("x", OutputCrown::dict([("y", OutputCrown::field("a"))])),
                ("x", OutputCrown::dict([("z", OutputCrown::field("b"))])),
            ]),
            OutputExtraMove::None,
        );
        assert_eq!(
            fuse_output(&shape, &layout).expect_err("repeated key"),
            FuseError::RepeatedKey {
                key: "x".into(),
                path: "[]".into()
            }
        );

        let layout = OutputNameLayout::new(
            OutputCrown::dict([(
                "x",
                OutputCrown::dict([
                    ("y", OutputCrown::field("a")),
                    ("y", OutputCrown::filler(json!(null))),
                    ("z", OutputCrown::field("b")),
                ]),
            )]),
            OutputExtraMove::None,
        );
        assert_eq!(
            fuse_output(&shape, &layout).expect_err("repeated nested key"),
            FuseError::RepeatedKey {
                key: "y".into(),
                path: r#"["x"]"#.into()
            }
        );
    }

    #[test]
    fn output_checks_sieves_and_duplicates() {
        let shape = OutputShape::new(vec![
            OutputField::<Value>::attribute("a", TypeHint::Int, true),
            OutputField::<Value>::attribute("b", TypeHint::Int, false),
        ])
        .expect("valid shape");

        let layout = OutputNameLayout::new(
            OutputCrown::dict([("a", OutputCrown::field("a"))]).with_sieve("a", |_, _| true),
            OutputExtraMove::None,
        );
        let stripped = fuse_output(&shape, &layout).expect("fuses");
        assert_eq!(stripped.skipped, vec!["b"]);

        let mut crown = OutputCrown::dict([("a", OutputCrown::field("a"))]);
        if let OutputCrown::Dict(dict) = &mut crown {
            dict.sieves.insert("zz".into(), std::sync::Arc::new(|_: &Value, _: &Value| true));
        }
        let layout = OutputNameLayout::new(crown, OutputExtraMove::None);
        assert!(matches!(
            fuse_output(&shape, &layout).expect_err("absent key"),
            FuseError::SieveOnAbsentKey { .. }
        ));

        let layout = OutputNameLayout::new(
            OutputCrown::dict([("x", OutputCrown::field("a")), ("y", OutputCrown::field("a"))]),
            OutputExtraMove::None,
        );
        assert_eq!(
            fuse_output(&shape, &layout).expect_err("twice"),
            FuseError::DuplicatedField("a".into())
        );

        let layout = OutputNameLayout::new(
            OutputCrown::list([OutputCrown::field("a"), OutputCrown::field("b")]),
            OutputExtraMove::None,
        );
        assert!(matches!(
            fuse_output(&shape, &layout).expect_err("optional in list"),
            FuseError::OptionalInList { .. }
        ));

        let layout = OutputNameLayout::new(
            OutputCrown::list([OutputCrown::field("a")]),
            OutputExtraMove::Targets(vec!["b".into()]),
        );
        assert_eq!(
            fuse_output(&shape, &layout).expect_err("list root"),
            FuseError::ExtraWithoutMappingRoot
        );
    }
}
