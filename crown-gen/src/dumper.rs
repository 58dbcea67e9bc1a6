//! Dump program generation: field extraction in shape order, then a build
//! tree mirroring the output crown.

use std::collections::{HashMap, HashSet};

use crown_ir::{
    BuildEntry, BuildNode, CannotProvide, Capture, CrownKey, CrownPath, DebugTrail, DumpInstr,
    DumpProgram, EntryGuard, FieldDumper, FieldReg, Filler, Namespace, OutputCrown,
    OutputExtraMove, OutputNameLayout, OutputShape, PROGRAM_ABI_V1, Sieve, Sym,
};

use crate::binder::{Entity, VarBinder};
use crate::fuser::{StrippedOutputShape, fuse_output};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DumperProps {
    pub debug_trail: DebugTrail,
}

#[derive(Debug)]
pub struct GeneratedDumper<M> {
    pub program: DumpProgram,
    pub namespace: Namespace<M>,
}

struct DumperGen<'a, M> {
    model: &'a str,
    binder: VarBinder,
    namespace: Namespace<M>,
    locals: HashMap<&'a str, FieldReg>,
    optional: HashSet<&'a str>,
    /// Sieves on keys holding a field directly; they see the raw value.
    field_sieves: HashMap<&'a str, (CrownPath, Sieve<M>)>,
}

impl<'a, M> DumperGen<'a, M> {
    fn cannot_provide(&self, message: impl std::fmt::Display) -> CannotProvide {
        CannotProvide::new(self.model, message)
    }

    fn capture(&mut self, entity: Entity<'_>, capture: Capture<M>) -> Sym {
        let sym = self.binder.symbol(entity);
        let name = self.binder.name(sym).to_owned();
        if !self.namespace.contains(&name) {
            self.namespace.insert(name, capture);
        }
        sym
    }

    fn collect_field_sieves(&mut self, crown: &'a OutputCrown<M>, path: &mut CrownPath) {
        match crown {
            OutputCrown::Dict(dict) => {
                for (key, sub) in &dict.entries {
                    path.push(CrownKey::Key(key.clone()));
                    if let OutputCrown::Field(id) = sub
                        && let Some(sieve) = dict.sieves.get(key)
                    {
                        self.field_sieves
                            .insert(id.as_str(), (path.clone(), sieve.clone()));
                    }
                    self.collect_field_sieves(sub, path);
                    path.pop();
                }
            }
            OutputCrown::List(list) => {
                for (index, sub) in list.items.iter().enumerate() {
                    path.push(CrownKey::Index(index));
                    self.collect_field_sieves(sub, path);
                    path.pop();
                }
            }
            OutputCrown::Field(_) | OutputCrown::None(_) => {}
        }
    }

    fn local(&self, id: &str) -> Result<FieldReg, CannotProvide> {
        self.locals
            .get(id)
            .copied()
            .ok_or_else(|| self.cannot_provide(format_args!("field `{id}` is not extracted")))
    }

    fn build(
        &mut self,
        crown: &OutputCrown<M>,
        path: &mut CrownPath,
    ) -> Result<BuildNode, CannotProvide> {
        match crown {
            OutputCrown::Field(id) => Ok(BuildNode::Field(self.local(id)?)),
            OutputCrown::None(filler) => {
                let capture = match filler {
                    Filler::Value(value) => Capture::Value(value.clone()),
                    Filler::Factory(factory) => Capture::Factory(factory.clone()),
                };
                Ok(BuildNode::Filler(self.capture(Entity::Filler(path), capture)))
            }
            OutputCrown::List(list) => {
                let mut items = Vec::with_capacity(list.items.len());
                for (index, sub) in list.items.iter().enumerate() {
                    path.push(CrownKey::Index(index));
                    items.push(self.build(sub, path)?);
                    path.pop();
                }
                Ok(BuildNode::List(items))
            }
            OutputCrown::Dict(dict) => {
                let mut required = Vec::new();
                let mut optional = Vec::new();
                for (key, sub) in &dict.entries {
                    path.push(CrownKey::Key(key.clone()));
                    let node = self.build(sub, path)?;
                    let guard = match (sub, dict.sieves.get(key)) {
                        (OutputCrown::Field(_), Some(_)) => EntryGuard::IfPresent,
                        (OutputCrown::Field(id), None) if self.optional.contains(id.as_str()) => {
                            EntryGuard::IfPresent
                        }
                        (_, Some(sieve)) => EntryGuard::Sieve(
                            self.capture(Entity::Sieve(path), Capture::Sieve(sieve.clone())),
                        ),
                        (_, None) => EntryGuard::Always,
                    };
                    path.pop();
                    let entry = BuildEntry {
                        key: key.clone(),
                        node,
                        guard,
                    };
                    if guard == EntryGuard::Always {
                        required.push(entry);
                    } else {
                        optional.push(entry);
                    }
                }
                required.extend(optional);
                Ok(BuildNode::Dict(required))
            }
        }
    }
}

/// Generates the dump program of a model.
///
/// `field_dumpers` must hold a dumper for every field the layout uses.
pub fn generate_dumper<M>(
    model: &str,
    shape: &OutputShape<M>,
    layout: &OutputNameLayout<M>,
    field_dumpers: &HashMap<String, FieldDumper>,
    props: DumperProps,
) -> Result<GeneratedDumper<M>, CannotProvide> {
    let used = fuse_output(shape, layout).map_err(|err| CannotProvide::new(model, err))?;
    generate_fused_dumper(model, shape, layout, &used, field_dumpers, props)
}

/// Like [`generate_dumper`] for a layout already fused into `used`.
pub fn generate_fused_dumper<M>(
    model: &str,
    shape: &OutputShape<M>,
    layout: &OutputNameLayout<M>,
    stripped: &StrippedOutputShape<'_, M>,
    field_dumpers: &HashMap<String, FieldDumper>,
    props: DumperProps,
) -> Result<GeneratedDumper<M>, CannotProvide> {
    let mut generator = DumperGen {
        model,
        binder: VarBinder::new(),
        namespace: Namespace::new(),
        locals: HashMap::new(),
        optional: HashSet::new(),
        field_sieves: HashMap::new(),
    };
    generator.collect_field_sieves(&layout.crown, &mut CrownPath::new());

    let mut instructions = Vec::with_capacity(stripped.fields.len() + 1);
    for field in &stripped.fields {
        let Some(dumper) = field_dumpers.get(&field.id) else {
            return Err(
                generator.cannot_provide(format_args!("no dumper for field `{}`", field.id)),
            );
        };
        let reg = generator.binder.local(&field.id);
        generator.locals.insert(field.id.as_str(), reg);
        if field.is_optional() {
            generator.optional.insert(field.id.as_str());
        }

        let accessor = generator.capture(
            Entity::Accessor(&field.id),
            Capture::Accessor(field.accessor.clone()),
        );
        let sieve = match generator.field_sieves.get(field.id.as_str()).cloned() {
            Some((path, sieve)) => {
                Some(generator.capture(Entity::Sieve(&path), Capture::Sieve(sieve)))
            }
            None => None,
        };
        let dumper = generator.capture(
            Entity::FieldDumper(&field.id),
            Capture::FieldDumper(dumper.clone()),
        );
        instructions.push(DumpInstr::ExtractField {
            field: reg,
            accessor,
            required: field.is_required(),
            sieve,
            dumper,
        });
    }

    match &layout.extra_move {
        OutputExtraMove::None => {}
        OutputExtraMove::Targets(targets) => {
            for target in targets {
                let Some(field) = shape.field(target) else {
                    return Err(generator
                        .cannot_provide(format_args!("unknown extra target `{target}`")));
                };
                instructions.push(DumpInstr::MergeExtraTarget {
                    field: generator.local(target)?,
                    trail: field.accessor.trail_element().clone(),
                });
            }
        }
        OutputExtraMove::Extract(extractor) => {
            let extractor =
                generator.capture(Entity::Extractor, Capture::Extractor(extractor.clone()));
            instructions.push(DumpInstr::ExtractExtra { extractor });
        }
    }

    let root = generator.build(&layout.crown, &mut CrownPath::new())?;
    let (symbols, locals) = generator.binder.into_tables();
    let program = DumpProgram {
        abi_version: PROGRAM_ABI_V1,
        model: model.to_owned(),
        debug_trail: props.debug_trail,
        locals,
        symbols,
        instructions,
        root,
        has_extra: !matches!(layout.extra_move, OutputExtraMove::None),
    };
    tracing::debug!(
        model,
        instructions = program.instructions.len(),
        captures = generator.namespace.len(),
        "generated dump program"
    );
    Ok(GeneratedDumper {
        program,
        namespace: generator.namespace,
    })
}
