//! Load program generation: an input crown walked into instructions, then a
//! construction plan for the model.

use std::collections::{BTreeMap, HashMap};

use crown_ir::{
    ArgBinding, CannotProvide, Capture, ConstructExtra, CrownKey, CrownPath, DataReg, DebugTrail,
    DictExtraPolicy, ExtraReg, FieldDefault, FieldLoader, FieldTarget, InputCrown,
    InputExtraMove, InputField, InputNameLayout, InputShape, LoadConstruction, LoadInstr,
    LoadProgram, Namespace, OnAbsent, PROGRAM_ABI_V1, ParamKind, PathId, Sym,
};

use crate::binder::{Entity, VarBinder};
use crate::fuser::{StrippedInputShape, fuse_input};

/// Toggles fixed at loader generation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LoaderProps {
    pub debug_trail: DebugTrail,
    pub strict_coercion: bool,
    /// Optional fields with a default are filled from it when absent and
    /// passed like required ones.
    pub use_default_for_omitted: bool,
}

/// A load program together with the captures its symbols name.
#[derive(Debug)]
pub struct GeneratedLoader<M> {
    pub program: LoadProgram,
    pub namespace: Namespace<M>,
}

struct LoaderGen<'a, M> {
    model: &'a str,
    shape: &'a InputShape<M>,
    field_loaders: &'a HashMap<String, FieldLoader>,
    props: LoaderProps,
    binder: VarBinder,
    namespace: Namespace<M>,
    paths: Vec<CrownPath>,
    path_ids: BTreeMap<CrownPath, PathId>,
    instructions: Vec<LoadInstr>,
    targets: HashMap<&'a str, FieldTarget>,
    data_count: usize,
    extra_count: usize,
}

impl<'a, M> LoaderGen<'a, M> {
    fn cannot_provide(&self, message: impl std::fmt::Display) -> CannotProvide {
        CannotProvide::new(self.model, message)
    }

    fn path_id(&mut self, path: &CrownPath) -> PathId {
        if let Some(id) = self.path_ids.get(path) {
            return *id;
        }
        let id = PathId(self.paths.len());
        self.paths.push(path.clone());
        self.path_ids.insert(path.clone(), id);
        id
    }

    fn new_data(&mut self) -> DataReg {
        let reg = DataReg(self.data_count);
        self.data_count += 1;
        reg
    }

    fn new_extra(&mut self) -> ExtraReg {
        let reg = ExtraReg(self.extra_count);
        self.extra_count += 1;
        reg
    }

    fn capture(&mut self, entity: Entity<'_>, capture: Capture<M>) -> Sym {
        let sym = self.binder.symbol(entity);
        let name = self.binder.name(sym).to_owned();
        if !self.namespace.contains(&name) {
            self.namespace.insert(name, capture);
        }
        sym
    }

    fn loader_sym(&mut self, id: &str) -> Result<Sym, CannotProvide> {
        let Some(loader) = self.field_loaders.get(id) else {
            return Err(self.cannot_provide(format_args!("no loader for field `{id}`")));
        };
        let loader = loader.clone();
        Ok(self.capture(Entity::FieldLoader(id), Capture::FieldLoader(loader)))
    }

    fn is_required(&self, id: &str) -> bool {
        self.shape.field(id).is_some_and(|field| field.required)
    }

    /// Decides where each used field's value goes.
    fn assign_targets(&mut self, stripped: &StrippedInputShape<'a>) {
        for field in &stripped.fields {
            let Some(param) = self.shape.param_for(&field.id) else {
                continue;
            };
            let target = if field.required || self.fills_default(field) {
                FieldTarget::Local(self.binder.local(&field.id))
            } else {
                FieldTarget::Packed(param.name.clone())
            };
            self.targets.insert(field.id.as_str(), target);
        }
    }

    fn fills_default(&self, field: &InputField) -> bool {
        self.props.use_default_for_omitted && !field.default.is_none()
    }

    fn on_absent(&mut self, field: &InputField) -> OnAbsent {
        if field.required {
            return OnAbsent::Required;
        }
        if !self.fills_default(field) {
            return OnAbsent::Skip;
        }
        let capture = match &field.default {
            FieldDefault::Value(value) => Capture::Value(value.clone()),
            FieldDefault::Factory(factory) => Capture::Factory(factory.clone()),
            FieldDefault::None | FieldDefault::FactoryWithSelf(_) => return OnAbsent::Skip,
        };
        OnAbsent::Default(self.capture(Entity::Default(&field.id), capture))
    }

    fn walk(
        &mut self,
        crown: &InputCrown,
        data: DataReg,
        path: &mut CrownPath,
        parent_extra: Option<(ExtraReg, &str)>,
    ) -> Result<Option<ExtraReg>, CannotProvide> {
        let path_id = self.path_id(path);
        match crown {
            InputCrown::Dict(dict) => {
                self.instructions.push(LoadInstr::ExpectMapping {
                    data,
                    path: path_id,
                });
                let known: Vec<String> = dict.entries.iter().map(|(k, _)| k.clone()).collect();
                let sink = match dict.extra {
                    DictExtraPolicy::Skip => None,
                    DictExtraPolicy::Forbid => {
                        self.instructions.push(LoadInstr::CheckExtraKeys {
                            data,
                            path: path_id,
                            known,
                            policy: DictExtraPolicy::Forbid,
                            sink: None,
                        });
                        None
                    }
                    DictExtraPolicy::Collect => {
                        let sink = self.new_extra();
                        self.instructions.push(LoadInstr::CheckExtraKeys {
                            data,
                            path: path_id,
                            known,
                            policy: DictExtraPolicy::Collect,
                            sink: Some(sink),
                        });
                        Some(sink)
                    }
                };

                let required: Vec<String> = dict
                    .entries
                    .iter()
                    .filter(|(_, sub)| sub.has_required(&|id| self.is_required(id)))
                    .map(|(key, _)| key.clone())
                    .collect();
                if !required.is_empty() {
                    self.instructions.push(LoadInstr::CheckRequiredKeys {
                        data,
                        path: path_id,
                        required,
                    });
                }

                for (key, sub) in &dict.entries {
                    let key_parent = sink.map(|sink| (sink, key.as_str()));
                    path.push(CrownKey::Key(key.clone()));
                    self.walk_child(sub, data, CrownKey::Key(key.clone()), path, key_parent)?;
                    path.pop();
                }

                if let (Some(child), Some((parent, key))) = (sink, parent_extra) {
                    self.instructions.push(LoadInstr::NestExtra {
                        child,
                        parent,
                        key: key.to_owned(),
                    });
                }
                Ok(sink)
            }
            InputCrown::List(list) => {
                self.instructions.push(LoadInstr::ExpectSequence {
                    data,
                    path: path_id,
                });
                self.instructions.push(LoadInstr::CheckLength {
                    data,
                    path: path_id,
                    expected: list.items.len(),
                    policy: list.extra,
                });
                for (index, sub) in list.items.iter().enumerate() {
                    path.push(CrownKey::Index(index));
                    self.walk_child(sub, data, CrownKey::Index(index), path, None)?;
                    path.pop();
                }
                Ok(None)
            }
            InputCrown::Field(_) | InputCrown::None => {
                Err(self.cannot_provide("crown root must be a dict or a list"))
            }
        }
    }

    fn walk_child(
        &mut self,
        crown: &InputCrown,
        data: DataReg,
        key: CrownKey,
        path: &mut CrownPath,
        parent_extra: Option<(ExtraReg, &str)>,
    ) -> Result<(), CannotProvide> {
        match crown {
            InputCrown::Field(id) => {
                let Some(field) = self.shape.field(id) else {
                    return Err(self.cannot_provide(format_args!("unknown field `{id}`")));
                };
                let Some(target) = self.targets.get(id.as_str()).cloned() else {
                    return Err(self.cannot_provide(format_args!("field `{id}` has no param")));
                };
                let loader = self.loader_sym(id)?;
                let on_absent = self.on_absent(field);
                let path_id = self.path_id(path);
                self.instructions.push(LoadInstr::LoadField {
                    data,
                    key,
                    path: path_id,
                    loader,
                    target,
                    on_absent,
                });
            }
            InputCrown::None => {}
            InputCrown::Dict(_) | InputCrown::List(_) => {
                let dst = self.new_data();
                let required = crown.has_required(&|id| self.is_required(id));
                self.instructions.push(LoadInstr::Enter {
                    data,
                    key,
                    dst,
                    required,
                });
                self.walk(crown, dst, path, parent_extra)?;
            }
        }
        Ok(())
    }

    fn construction(
        &mut self,
        stripped: &StrippedInputShape<'a>,
        extra_move: &InputExtraMove<M>,
        root_extra: Option<ExtraReg>,
    ) -> Result<LoadConstruction, CannotProvide> {
        let constructor = self.capture(
            Entity::Constructor,
            Capture::Constructor(self.shape.constructor().clone()),
        );

        let mut args = Vec::with_capacity(stripped.params.len());
        let mut packed = false;
        let mut keyword_only = false;
        for param in self.shape.params() {
            match self.targets.get(param.field_id.as_str()) {
                None => keyword_only = true,
                Some(FieldTarget::Packed(_)) => {
                    packed = true;
                    keyword_only = true;
                }
                Some(FieldTarget::Local(reg)) => {
                    let by_keyword = keyword_only || param.kind == ParamKind::KeywordOnly;
                    if by_keyword && param.kind == ParamKind::PositionalOnly {
                        return Err(self.cannot_provide(format_args!(
                            "positional-only param `{}` can not be passed after a skipped param",
                            param.name
                        )));
                    }
                    args.push(if by_keyword {
                        ArgBinding::Keyword {
                            name: param.name.clone(),
                            field: *reg,
                        }
                    } else {
                        ArgBinding::Positional(*reg)
                    });
                }
            }
        }

        let extra = match extra_move {
            InputExtraMove::None | InputExtraMove::Targets(_) => ConstructExtra::None,
            InputExtraMove::Kwargs => ConstructExtra::Kwargs(root_extra),
            InputExtraMove::Saturate(saturator) => ConstructExtra::Saturate {
                saturator: self.capture(Entity::Saturator, Capture::Saturator(saturator.clone())),
                source: root_extra,
            },
        };
        Ok(LoadConstruction {
            constructor,
            args,
            packed,
            extra,
        })
    }
}

/// Generates the load program of a model.
///
/// `field_loaders` must hold a loader for every field the layout uses.
pub fn generate_loader<M>(
    model: &str,
    shape: &InputShape<M>,
    layout: &InputNameLayout<M>,
    field_loaders: &HashMap<String, FieldLoader>,
    props: LoaderProps,
) -> Result<GeneratedLoader<M>, CannotProvide> {
    let used = fuse_input(shape, layout).map_err(|err| CannotProvide::new(model, err))?;
    generate_fused_loader(model, shape, layout, &used, field_loaders, props)
}

/// Like [`generate_loader`] for a layout already fused into `used`.
pub fn generate_fused_loader<'a, M>(
    model: &'a str,
    shape: &'a InputShape<M>,
    layout: &InputNameLayout<M>,
    stripped: &StrippedInputShape<'a>,
    field_loaders: &'a HashMap<String, FieldLoader>,
    props: LoaderProps,
) -> Result<GeneratedLoader<M>, CannotProvide> {
    let mut generator = LoaderGen {
        model,
        shape,
        field_loaders,
        props,
        binder: VarBinder::new(),
        namespace: Namespace::new(),
        paths: Vec::new(),
        path_ids: BTreeMap::new(),
        instructions: Vec::new(),
        targets: HashMap::new(),
        data_count: 0,
        extra_count: 0,
    };
    generator.assign_targets(stripped);

    let root = generator.new_data();
    let root_extra = generator.walk(&layout.crown, root, &mut CrownPath::new(), None)?;

    for target in layout.extra_move.targets() {
        let Some(field_target) = generator.targets.get(target.as_str()).cloned() else {
            return Err(
                generator.cannot_provide(format_args!("extra target `{target}` has no param")),
            );
        };
        // nothing to load into an optional target without collection
        if root_extra.is_none() && matches!(field_target, FieldTarget::Packed(_)) {
            continue;
        }
        let loader = generator.loader_sym(target)?;
        generator.instructions.push(LoadInstr::LoadExtraTarget {
            loader,
            target: field_target,
            source: root_extra,
        });
    }

    let construction = generator.construction(stripped, &layout.extra_move, root_extra)?;
    let (symbols, locals) = generator.binder.into_tables();
    let program = LoadProgram {
        abi_version: PROGRAM_ABI_V1,
        model: model.to_owned(),
        debug_trail: props.debug_trail,
        strict_coercion: props.strict_coercion,
        data_count: generator.data_count,
        extra_count: generator.extra_count,
        locals,
        paths: generator.paths,
        symbols,
        instructions: generator.instructions,
        construction,
    };
    tracing::debug!(
        model,
        instructions = program.instructions.len(),
        captures = generator.namespace.len(),
        "generated load program"
    );
    Ok(GeneratedLoader {
        program,
        namespace: generator.namespace,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crown_ir::{ConstructorArgs, FieldReg, ListExtraPolicy, LoadError, TypeHint, Value};
    use serde_json::json;
    use std::sync::Arc;

    fn identity() -> FieldLoader {
        Arc::new(|value: &Value| Ok(value.clone()))
    }

    fn loaders(ids: &[&str]) -> HashMap<String, FieldLoader> {
        ids.iter().map(|id| ((*id).to_owned(), identity())).collect()
    }

    fn echo(args: ConstructorArgs) -> Result<Value, LoadError> {
        Ok(json!({"positional": args.positional, "keyword": args.keyword}))
    }

    fn shape() -> InputShape<Value> {
        InputShape::builder(echo)
            .bound_field(InputField::required("a", TypeHint::Int), ParamKind::PositionalOrKeyword)
            .bound_field(
                InputField::optional("b", TypeHint::Int, FieldDefault::Value(json!(0))),
                ParamKind::PositionalOrKeyword,
            )
            .bound_field(InputField::required("c", TypeHint::Int), ParamKind::KeywordOnly)
            .build()
            .expect("valid shape")
    }

    fn flat() -> InputNameLayout<Value> {
        InputNameLayout::new(
            InputCrown::dict(
                [
                    ("a", InputCrown::field("a")),
                    ("b", InputCrown::field("b")),
                    ("c", InputCrown::field("c")),
                ],
                DictExtraPolicy::Forbid,
            ),
            InputExtraMove::None,
        )
    }

    #[test]
    fn flat_dict_program() {
        let generated = generate_loader(
            "abc",
            &shape(),
            &flat(),
            &loaders(&["a", "b", "c"]),
            LoaderProps::default(),
        )
        .expect("generates");
        let program = &generated.program;
        assert!(matches!(
            program.instructions[0],
            LoadInstr::ExpectMapping { data: DataReg(0), .. }
        ));
        assert!(matches!(
            &program.instructions[1],
            LoadInstr::CheckExtraKeys { policy: DictExtraPolicy::Forbid, sink: None, .. }
        ));
        assert!(matches!(
            &program.instructions[2],
            LoadInstr::CheckRequiredKeys { required, .. }
                if required == &vec!["a".to_owned(), "c".to_owned()]
        ));
        assert!(program.construction.packed);
        assert_eq!(
            program.construction.args,
            vec![
                ArgBinding::Positional(FieldReg(0)),
                ArgBinding::Keyword {
                    name: "c".into(),
                    field: FieldReg(1)
                },
            ]
        );
        assert!(generated.namespace.contains("constructor"));
        assert!(generated.namespace.contains("loader_b"));
    }

    #[test]
    fn defaults_for_omitted_become_locals() {
        let props = LoaderProps {
            use_default_for_omitted: true,
            ..LoaderProps::default()
        };
        let generated =
            generate_loader("abc", &shape(), &flat(), &loaders(&["a", "b", "c"]), props)
                .expect("generates");
        assert!(!generated.program.construction.packed);
        assert!(generated.namespace.contains("default_b"));
        assert_eq!(generated.program.construction.args.len(), 3);
    }

    #[test]
    fn missing_field_loader_is_reported() {
        let err =
            generate_loader("abc", &shape(), &flat(), &loaders(&["a"]), LoaderProps::default())
                .expect_err("no loader for b");
        assert_eq!(err.model, "abc");
        assert!(err.message.contains("`b`"));
    }

    #[test]
    fn nested_branches_get_their_own_registers() {
        let layout = InputNameLayout::new(
            InputCrown::dict(
                [
                    (
                        "x",
                        InputCrown::list(
                            [InputCrown::field("a"), InputCrown::None, InputCrown::field("c")],
                            ListExtraPolicy::Forbid,
                        ),
                    ),
                    ("b", InputCrown::field("b")),
                ],
                DictExtraPolicy::Skip,
            ),
            InputExtraMove::None,
        );
        let loaders = loaders(&["a", "b", "c"]);
        let generated = generate_loader("abc", &shape(), &layout, &loaders, LoaderProps::default())
            .expect("generates");
        let program = &generated.program;
        assert_eq!(program.data_count, 2);
        assert!(program.instructions.iter().any(|instr| matches!(
            instr,
            LoadInstr::Enter { dst: DataReg(1), required: true, .. }
        )));
        assert!(program.instructions.iter().any(|instr| matches!(
            instr,
            LoadInstr::CheckLength { expected: 3, policy: ListExtraPolicy::Forbid, .. }
        )));
        let rendered = program.render().string();
        assert!(rendered.contains(r#"# p2 -> ["x", 0]"#));
    }

    #[test]
    fn collected_extras_nest_and_feed_targets() {
        let shape = InputShape::builder(echo)
            .bound_field(InputField::required("a", TypeHint::Int), ParamKind::PositionalOrKeyword)
            .bound_field(
                InputField::required("rest", TypeHint::dict(TypeHint::Any)),
                ParamKind::PositionalOrKeyword,
            )
            .build()
            .expect("valid shape");
        let layout = InputNameLayout::new(
            InputCrown::dict(
                [(
                    "x",
                    InputCrown::dict([("a", InputCrown::field("a"))], DictExtraPolicy::Collect),
                )],
                DictExtraPolicy::Collect,
            ),
            InputExtraMove::Targets(vec!["rest".into()]),
        );
        let generated =
            generate_loader("m", &shape, &layout, &loaders(&["a", "rest"]), LoaderProps::default())
                .expect("generates");
        let program = &generated.program;
        assert_eq!(program.extra_count, 2);
        assert!(program.instructions.iter().any(|instr| matches!(
            instr,
            LoadInstr::NestExtra { child: ExtraReg(1), parent: ExtraReg(0), key } if key == "x"
        )));
        assert!(matches!(
            program.instructions.last(),
            Some(LoadInstr::LoadExtraTarget { source: Some(ExtraReg(0)), .. })
        ));
    }
}
