use crown_ir::{
    AccessError, Accessor, DebugTrail, DumpError, Extractor, Factory, FieldDumper, FieldReg, Map,
    Record, Sieve, TrailElement, Value, append_path,
};

pub(crate) enum LinkedFiller {
    Value(Value),
    Factory(Factory),
}

pub(crate) enum LinkedGuard<M> {
    Always,
    IfPresent,
    Sieve(Sieve<M>),
}

pub(crate) struct LinkedEntry<M> {
    pub key: String,
    pub node: LinkedNode<M>,
    pub guard: LinkedGuard<M>,
}

pub(crate) enum LinkedNode<M> {
    Dict(Vec<LinkedEntry<M>>),
    List(Vec<LinkedNode<M>>),
    Field(FieldReg),
    Filler(LinkedFiller),
}

pub(crate) enum LinkedDumpInstr<M> {
    ExtractField {
        field: FieldReg,
        accessor: Accessor<M>,
        sieve: Option<Sieve<M>>,
        dumper: FieldDumper,
    },
    MergeExtraTarget {
        field: FieldReg,
        trail: TrailElement,
    },
    ExtractExtra {
        extractor: Extractor<M>,
    },
}

pub(crate) struct LinkedDumper<M> {
    pub model: String,
    pub debug_trail: DebugTrail,
    pub field_count: usize,
    pub instructions: Vec<LinkedDumpInstr<M>>,
    pub root: LinkedNode<M>,
    pub has_extra: bool,
}

impl<M: Record> LinkedDumper<M> {
    fn located(&self, err: DumpError, element: &TrailElement) -> DumpError {
        if self.debug_trail == DebugTrail::Disable {
            err
        } else {
            append_path(err, element.clone())
        }
    }

    pub fn run(&self, model: &M) -> Result<Value, DumpError> {
        let mut fields: Vec<Option<Value>> = vec![None; self.field_count];
        let mut extra = Map::new();
        let mut errors = Vec::new();

        for instr in &self.instructions {
            if let Err(err) = self.step(instr, model, &mut fields, &mut extra) {
                match self.debug_trail {
                    DebugTrail::Disable | DebugTrail::First => return Err(err),
                    DebugTrail::All => errors.push(err),
                }
            }
        }
        if !errors.is_empty() {
            return Err(DumpError::aggregate(
                format!("while dumping model {}", self.model),
                errors,
            ));
        }

        let built = build(&self.root, model, &mut fields);
        if !self.has_extra {
            return Ok(built);
        }
        match built {
            Value::Object(mut map) => {
                map.extend(extra);
                Ok(Value::Object(map))
            }
            _ => Err(DumpError::msg(
                "extra fields can be merged only into a mapping root",
            )),
        }
    }

    fn step(
        &self,
        instr: &LinkedDumpInstr<M>,
        model: &M,
        fields: &mut [Option<Value>],
        extra: &mut Map<String, Value>,
    ) -> Result<(), DumpError> {
        match instr {
            LinkedDumpInstr::ExtractField {
                field,
                accessor,
                sieve,
                dumper,
            } => {
                let raw = match accessor.get(model) {
                    Ok(raw) => raw,
                    Err(AccessError::Absent(kind)) if Some(kind) == accessor.access_error() => {
                        return Ok(());
                    }
                    Err(AccessError::Absent(_)) => {
                        let err = DumpError::msg(format!(
                            "cannot read required field through {}",
                            accessor.describe()
                        ));
                        return Err(self.located(err, accessor.trail_element()));
                    }
                    Err(AccessError::Failed(err)) => {
                        return Err(self.located(err, accessor.trail_element()));
                    }
                };
                if let Some(sieve) = sieve
                    && !sieve(model, &raw)
                {
                    return Ok(());
                }
                let dumped =
                    dumper(&raw).map_err(|err| self.located(err, accessor.trail_element()))?;
                if let Some(slot) = fields.get_mut(field.0) {
                    *slot = Some(dumped);
                }
                Ok(())
            }
            LinkedDumpInstr::MergeExtraTarget { field, trail } => {
                match fields.get_mut(field.0).and_then(Option::take) {
                    None => Ok(()),
                    Some(Value::Object(map)) => {
                        extra.extend(map);
                        Ok(())
                    }
                    Some(_) => {
                        let err = DumpError::msg("extra target must dump to a mapping");
                        Err(self.located(err, trail))
                    }
                }
            }
            LinkedDumpInstr::ExtractExtra { extractor } => {
                extra.extend(extractor(model)?);
                Ok(())
            }
        }
    }
}

fn build<M>(node: &LinkedNode<M>, model: &M, fields: &mut [Option<Value>]) -> Value {
    match node {
        LinkedNode::Field(reg) => fields
            .get_mut(reg.0)
            .and_then(Option::take)
            .unwrap_or(Value::Null),
        LinkedNode::Filler(LinkedFiller::Value(value)) => value.clone(),
        LinkedNode::Filler(LinkedFiller::Factory(factory)) => factory(),
        LinkedNode::List(items) => {
            Value::Array(items.iter().map(|item| build(item, model, fields)).collect())
        }
        LinkedNode::Dict(entries) => {
            let mut map = Map::new();
            for entry in entries {
                match &entry.guard {
                    LinkedGuard::Always => {
                        map.insert(entry.key.clone(), build(&entry.node, model, fields));
                    }
                    LinkedGuard::IfPresent => {
                        if let LinkedNode::Field(reg) = &entry.node
                            && fields.get(reg.0).is_none_or(Option::is_none)
                        {
                            continue;
                        }
                        map.insert(entry.key.clone(), build(&entry.node, model, fields));
                    }
                    LinkedGuard::Sieve(sieve) => {
                        let built = build(&entry.node, model, fields);
                        if sieve(model, &built) {
                            map.insert(entry.key.clone(), built);
                        }
                    }
                }
            }
            Value::Object(map)
        }
    }
}
