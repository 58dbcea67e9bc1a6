#![allow(dead_code)]

use crown::{
    ConstructorArgs, FieldDefault, InputField, InputShape, LoadError, ModelEntry, OutputField,
    OutputShape, ParamKind, TrailElement, TypeHint, Value,
};

/// One field of a mapping-backed test record.
#[derive(Debug, Clone)]
pub struct Field {
    pub id: &'static str,
    pub hint: TypeHint,
    pub default: Option<Value>,
}

pub fn required(id: &'static str, hint: TypeHint) -> Field {
    Field {
        id,
        hint,
        default: None,
    }
}

pub fn optional(id: &'static str, hint: TypeHint, default: Value) -> Field {
    Field {
        id,
        hint,
        default: Some(default),
    }
}

/// Builds a JSON object the way a record constructor would: every param is
/// set, omitted optional ones from their default, extra keywords are kept.
pub fn record_input(fields: &[Field], kwargs: bool) -> InputShape<Value> {
    let spec = fields.to_vec();
    let mut builder = InputShape::builder(move |args: ConstructorArgs| {
        let mut out = serde_json::Map::new();
        for (position, field) in spec.iter().enumerate() {
            let value = match (args.arg(position, field.id), &field.default) {
                (Some(value), _) => value.clone(),
                (None, Some(default)) => default.clone(),
                (None, None) => {
                    return Err(LoadError::value(
                        format!("missing argument `{}`", field.id),
                        Value::Null,
                    ));
                }
            };
            out.insert(field.id.to_owned(), value);
        }
        let known: Vec<&str> = spec.iter().map(|field| field.id).collect();
        for (key, value) in args.extra_keywords(&known) {
            out.insert(key.clone(), value.clone());
        }
        Ok(Value::Object(out))
    });
    for field in fields {
        let input = match &field.default {
            Some(default) => {
                InputField::optional(
                    field.id,
                    field.hint.clone(),
                    FieldDefault::Value(default.clone()),
                )
            }
            None => InputField::required(field.id, field.hint.clone()),
        };
        builder = builder.bound_field(input, ParamKind::PositionalOrKeyword);
    }
    if kwargs {
        builder = builder.kwargs(TypeHint::Any);
    }
    builder.build().expect("valid input shape")
}

pub fn record_output(fields: &[Field]) -> OutputShape<Value> {
    OutputShape::new(
        fields
            .iter()
            .map(|field| {
                let output = OutputField::attribute(field.id, field.hint.clone(), true);
                match &field.default {
                    Some(default) => output.with_default(FieldDefault::Value(default.clone())),
                    None => output,
                }
            })
            .collect(),
    )
    .expect("valid output shape")
}

pub fn record(fields: &[Field]) -> ModelEntry<Value> {
    ModelEntry::new()
        .input(record_input(fields, false))
        .output(record_output(fields))
}

pub fn trail(err: &LoadError) -> Vec<TrailElement> {
    err.trail().iter().cloned().collect()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
