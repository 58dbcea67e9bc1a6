//! Assembles crowns from per-field paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crown_gen::{FuseError, check_paths};
use crown_ir::{
    CrownKey, CrownPath, DictExtraPolicy, FieldDefault, Filler, InputCrown, InputDict,
    InputExtraMove, InputList, InputNameLayout, InputShape, ListExtraPolicy, OutputCrown,
    OutputDict, OutputExtraMove, OutputList, OutputNameLayout, OutputShape, Sieve, Value,
    path_to_string,
};
use smallvec::smallvec;

use crate::config::{ExtraIn, ExtraOut, LayoutSchema};
use crate::mapping::{FieldInfo, substitute};
use crate::name_style::{NameStyleError, convert_snake_style};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("required fields {0:?} are skipped")]
    SkippedRequired(Vec<String>),
    #[error("cannot use collecting extra_in with mapping to list")]
    CollectWithList,
    #[error("invalid key for field `{field}`: {source}")]
    NameStyle {
        field: String,
        source: NameStyleError,
    },
    #[error(transparent)]
    Fuse(#[from] FuseError),
}

/// The key a field gets when no `map` rule places it.
pub fn generated_key<M>(
    schema: &LayoutSchema<M>,
    field: &FieldInfo<'_>,
) -> Result<CrownKey, LayoutError> {
    if schema.as_list {
        return Ok(CrownKey::Index(field.index));
    }
    let mut name = field.id;
    if schema.trim_trailing_underscore && name.ends_with('_') && !name.ends_with("__") {
        name = &name[..name.len() - 1];
    }
    let name = match schema.name_style {
        Some(style) => convert_snake_style(name, style).map_err(|source| LayoutError::NameStyle {
            field: field.id.to_owned(),
            source,
        })?,
        None => name.to_owned(),
    };
    Ok(CrownKey::Key(name))
}

/// Path of one field, `None` if the field is left out.
pub fn field_path<M>(
    schema: &LayoutSchema<M>,
    field: &FieldInfo<'_>,
) -> Result<Option<CrownPath>, LayoutError> {
    let mapped = schema
        .map
        .iter()
        .find(|entry| entry.predicate.matches(field));
    let path = match mapped {
        Some(entry) => match entry.result.resolve(field) {
            Some(keys) => substitute(&keys, || generated_key(schema, field))?,
            None => return Ok(None),
        },
        None => smallvec![generated_key(schema, field)?],
    };
    if schema.skip.matches(field) || !schema.only.matches(field) {
        return Ok(None);
    }
    Ok(Some(path))
}

// ============================================================================
// Tree assembly
// ============================================================================

enum Node {
    Leaf(String),
    Dict(Vec<(String, Node)>),
    List(BTreeMap<usize, Node>),
}

impl Node {
    fn branch_for(key: &CrownKey) -> Node {
        match key {
            CrownKey::Key(_) => Node::Dict(Vec::new()),
            CrownKey::Index(_) => Node::List(BTreeMap::new()),
        }
    }

    /// Inserts a leaf. `check_paths` already rejected overlapping and
    /// inconsistent paths, so conflicts here are reported as such.
    fn insert(&mut self, path: &[CrownKey], id: &str) -> Result<(), FuseError> {
        let Some((key, rest)) = path.split_first() else {
            return Err(FuseError::EmptyPath(id.to_owned()));
        };
        let conflict = || FuseError::InconsistentBranch {
            field: id.to_owned(),
            path: path_to_string(path),
        };
        let make = || match rest.first() {
            Some(next) => Node::branch_for(next),
            None => Node::Leaf(id.to_owned()),
        };
        let child = match (self, key) {
            (Node::Dict(entries), CrownKey::Key(key)) => {
                match entries.iter().position(|(k, _)| k == key) {
                    Some(pos) => &mut entries[pos].1,
                    None => {
                        entries.push((key.clone(), make()));
                        let last = entries.len() - 1;
                        &mut entries[last].1
                    }
                }
            }
            (Node::List(items), CrownKey::Index(index)) => items.entry(*index).or_insert_with(make),
            _ => return Err(conflict()),
        };
        if rest.is_empty() {
            return match child {
                Node::Leaf(leaf) if leaf.as_str() == id => Ok(()),
                _ => Err(conflict()),
            };
        }
        child.insert(rest, id)
    }

    fn has_list(&self) -> bool {
        match self {
            Node::Leaf(_) => false,
            Node::List(_) => true,
            Node::Dict(entries) => entries.iter().any(|(_, node)| node.has_list()),
        }
    }
}

fn assemble(paths: &[(&str, CrownPath)], as_list: bool) -> Result<Node, LayoutError> {
    let mut root = match paths.first() {
        Some((_, path)) => match path.first() {
            Some(key) => Node::branch_for(key),
            None => return Err(FuseError::EmptyPath(paths[0].0.to_owned()).into()),
        },
        None if as_list => Node::List(BTreeMap::new()),
        None => Node::Dict(Vec::new()),
    };
    for (id, path) in paths {
        root.insert(path, id)?;
    }
    Ok(root)
}

fn collect_paths<'a, M>(
    schema: &LayoutSchema<M>,
    fields: impl Iterator<Item = FieldInfo<'a>>,
    extra_targets: &[String],
) -> Result<(Vec<(&'a str, CrownPath)>, Vec<FieldInfo<'a>>), LayoutError> {
    let mut paths = Vec::new();
    let mut skipped = Vec::new();
    for field in fields {
        if extra_targets.iter().any(|target| target == field.id) {
            continue;
        }
        match field_path(schema, &field)? {
            Some(path) => paths.push((field.id, path)),
            None => skipped.push(field),
        }
    }
    check_paths(&paths)?;
    Ok((paths, skipped))
}

// ============================================================================
// Input
// ============================================================================

fn input_extra_move<M>(extra: &ExtraIn<M>) -> InputExtraMove<M> {
    match extra {
        ExtraIn::Skip | ExtraIn::Forbid => InputExtraMove::None,
        ExtraIn::Kwargs => InputExtraMove::Kwargs,
        ExtraIn::Targets(targets) => InputExtraMove::Targets(targets.clone()),
        ExtraIn::Saturate(saturator) => InputExtraMove::Saturate(saturator.clone()),
    }
}

fn dict_policy<M>(extra: &ExtraIn<M>) -> DictExtraPolicy {
    match extra {
        ExtraIn::Skip => DictExtraPolicy::Skip,
        ExtraIn::Forbid => DictExtraPolicy::Forbid,
        _ => DictExtraPolicy::Collect,
    }
}

fn to_input_crown(node: Node, dict: DictExtraPolicy, list: ListExtraPolicy) -> InputCrown {
    match node {
        Node::Leaf(id) => InputCrown::Field(id),
        Node::Dict(entries) => InputCrown::Dict(InputDict {
            entries: entries
                .into_iter()
                .map(|(key, node)| (key, to_input_crown(node, dict, list)))
                .collect(),
            extra: dict,
        }),
        Node::List(mut items) => {
            let len = items.keys().next_back().map_or(0, |max| max + 1);
            InputCrown::List(InputList {
                items: (0..len)
                    .map(|index| match items.remove(&index) {
                        Some(node) => to_input_crown(node, dict, list),
                        None => InputCrown::None,
                    })
                    .collect(),
                extra: list,
            })
        }
    }
}

/// Name layout for loading `shape`, before fuser validation.
pub fn build_input_layout<M>(
    shape: &InputShape<M>,
    schema: &LayoutSchema<M>,
) -> Result<InputNameLayout<M>, LayoutError> {
    let extra_move = input_extra_move(&schema.extra_in);
    let fields = shape
        .fields()
        .iter()
        .enumerate()
        .map(|(index, field)| FieldInfo::input(index, field));
    let (paths, skipped) = collect_paths(schema, fields, extra_move.targets())?;

    let skipped_required: Vec<String> = skipped
        .iter()
        .filter(|field| field.is_required)
        .map(|field| field.id.to_owned())
        .collect();
    if !skipped_required.is_empty() {
        return Err(LayoutError::SkippedRequired(skipped_required));
    }

    let root = assemble(&paths, schema.as_list)?;
    let dict = dict_policy(&schema.extra_in);
    if dict == DictExtraPolicy::Collect && root.has_list() {
        return Err(LayoutError::CollectWithList);
    }
    let list = match dict {
        DictExtraPolicy::Forbid => ListExtraPolicy::Forbid,
        DictExtraPolicy::Skip | DictExtraPolicy::Collect => ListExtraPolicy::Skip,
    };
    Ok(InputNameLayout::new(to_input_crown(root, dict, list), extra_move))
}

// ============================================================================
// Output
// ============================================================================

fn output_extra_move<M>(extra: &ExtraOut<M>) -> OutputExtraMove<M> {
    match extra {
        ExtraOut::Skip => OutputExtraMove::None,
        ExtraOut::Targets(targets) => OutputExtraMove::Targets(targets.clone()),
        ExtraOut::Extract(extractor) => OutputExtraMove::Extract(extractor.clone()),
    }
}

/// Sieve dropping a value equal to `default`. Factories run on every call.
pub fn default_sieve<M: 'static>(default: &FieldDefault<M>) -> Option<Sieve<M>> {
    match default {
        FieldDefault::None => None,
        FieldDefault::Value(default) => {
            let default = default.clone();
            Some(Arc::new(move |_: &M, value: &Value| value != &default))
        }
        FieldDefault::Factory(factory) => {
            let factory = factory.clone();
            Some(Arc::new(move |_: &M, value: &Value| value != &factory()))
        }
        FieldDefault::FactoryWithSelf(factory) => {
            let factory = factory.clone();
            Some(Arc::new(move |model: &M, value: &Value| value != &factory(model)))
        }
    }
}

fn to_output_crown<M>(
    node: Node,
    path: &mut CrownPath,
    sieves: &mut HashMap<CrownPath, Sieve<M>>,
) -> OutputCrown<M> {
    match node {
        Node::Leaf(id) => OutputCrown::Field(id),
        Node::Dict(entries) => {
            let mut dict = OutputDict {
                entries: Vec::with_capacity(entries.len()),
                sieves: BTreeMap::new(),
            };
            for (key, node) in entries {
                path.push(CrownKey::Key(key.clone()));
                if let Some(sieve) = sieves.remove(path) {
                    dict.sieves.insert(key.clone(), sieve);
                }
                dict.entries.push((key, to_output_crown(node, path, sieves)));
                path.pop();
            }
            OutputCrown::Dict(dict)
        }
        Node::List(mut items) => {
            let len = items.keys().next_back().map_or(0, |max| max + 1);
            let mut out = Vec::with_capacity(len);
            for index in 0..len {
                path.push(CrownKey::Index(index));
                out.push(match items.remove(&index) {
                    Some(node) => to_output_crown(node, path, sieves),
                    None => OutputCrown::None(Filler::Value(Value::Null)),
                });
                path.pop();
            }
            OutputCrown::List(OutputList { items: out })
        }
    }
}

/// Name layout for dumping `shape`, before fuser validation.
pub fn build_output_layout<M: 'static>(
    shape: &OutputShape<M>,
    schema: &LayoutSchema<M>,
) -> Result<OutputNameLayout<M>, LayoutError> {
    let extra_move = output_extra_move(&schema.extra_out);
    let fields = shape
        .fields()
        .iter()
        .enumerate()
        .map(|(index, field)| FieldInfo::output(index, field));
    let (paths, _) = collect_paths(schema, fields, extra_move.targets())?;

    let mut sieves = HashMap::new();
    for (id, path) in &paths {
        let Some((index, field)) = shape
            .fields()
            .iter()
            .enumerate()
            .find(|(_, field)| field.id == *id)
        else {
            continue;
        };
        if !matches!(path.last(), Some(CrownKey::Key(_)))
            || !schema.omit_default.matches(&FieldInfo::output(index, field))
        {
            continue;
        }
        if let Some(sieve) = default_sieve(&field.default) {
            sieves.insert(path.clone(), sieve);
        }
    }

    let root = assemble(&paths, schema.as_list)?;
    let crown = to_output_crown(root, &mut CrownPath::new(), &mut sieves);
    Ok(OutputNameLayout::new(crown, extra_move))
}
