mod common;

use std::collections::BTreeSet;

use common::{init_tracing, record, required, trail};
use crown::{
    ConstructorArgs, DebugTrail, ExtraInPolicy, FieldDefault, InputField, InputShape,
    LayoutConfig, LoadError, LoadErrorKind, MapKey, MapResult, ModelEntry, NameStyle,
    OutputField, OutputShape, ParamKind, Record, Retort, RetortConfig, TypeHint, Value, ValueKind,
};
use serde_json::json;

#[derive(Debug, Clone, PartialEq)]
struct Pair {
    a: i64,
    b: i64,
}

impl Record for Pair {
    fn attr(&self, name: &str) -> Option<Value> {
        match name {
            "a" => Some(json!(self.a)),
            "b" => Some(json!(self.b)),
            _ => None,
        }
    }
}

fn int_arg(args: &ConstructorArgs, position: usize, name: &str) -> Result<Option<i64>, LoadError> {
    match args.arg(position, name) {
        None => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| LoadError::type_error(ValueKind::Int, value.clone())),
    }
}

fn pair_entry() -> ModelEntry<Pair> {
    let input = InputShape::builder(|args: ConstructorArgs| {
        let a = int_arg(&args, 0, "a")?
            .ok_or_else(|| LoadError::value("missing argument `a`", Value::Null))?;
        let b = int_arg(&args, 1, "b")?.unwrap_or(0);
        Ok(Pair { a, b })
    })
    .bound_field(InputField::required("a", TypeHint::Int), ParamKind::PositionalOrKeyword)
    .bound_field(
        InputField::optional("b", TypeHint::Int, FieldDefault::Value(json!(0))),
        ParamKind::PositionalOrKeyword,
    )
    .build()
    .unwrap();
    let output = OutputShape::new(vec![
        OutputField::attribute("a", TypeHint::Int, true),
        OutputField::attribute("b", TypeHint::Int, true)
            .with_default(FieldDefault::Value(json!(0))),
    ])
    .unwrap();
    ModelEntry::new().input(input).output(output)
}

fn retort_with(config: RetortConfig) -> Retort {
    init_tracing();
    Retort::builder().config(config).build()
}

#[test]
fn flat_model_with_default() {
    let mut retort = retort_with(RetortConfig {
        omit_default: true,
        ..RetortConfig::default()
    });
    retort.register("pair", pair_entry());
    let loader = retort.loader::<Pair>("pair").unwrap();

    assert_eq!(loader.load(&json!({"a": 1, "b": 2})).unwrap(), Pair { a: 1, b: 2 });
    assert_eq!(loader.load(&json!({"a": 1})).unwrap(), Pair { a: 1, b: 0 });

    let err = loader.load(&json!({})).unwrap_err();
    let [missing] = err.sub_errors() else {
        panic!("expected one sub error, got {err}");
    };
    match missing.kind() {
        LoadErrorKind::NoRequiredFields { missing, got } => {
            assert_eq!(missing, &BTreeSet::from(["a".to_owned()]));
            assert_eq!(got, &json!({}));
        }
        other => panic!("unexpected {other:?}"),
    }

    let dumper = retort.dumper::<Pair>("pair").unwrap();
    assert_eq!(dumper.dump(&Pair { a: 1, b: 2 }).unwrap(), json!({"a": 1, "b": 2}));
    assert_eq!(dumper.dump(&Pair { a: 1, b: 0 }).unwrap(), json!({"a": 1}));
}

#[test]
fn list_layout_with_swapped_positions() {
    let mut retort = retort_with(RetortConfig::default());
    retort.register(
        "pair",
        record(&[required("a", TypeHint::Int), required("b", TypeHint::Int)]).layout(
            LayoutConfig::new()
                .as_list(true)
                .map_id("a", MapResult::key(1usize))
                .map_id("b", MapResult::key(0usize)),
        ),
    );
    let loaded: Value = retort.load("pair", &json!([10, 20])).unwrap();
    assert_eq!(loaded, json!({"a": 20, "b": 10}));
    assert_eq!(retort.dump("pair", &loaded).unwrap(), json!([10, 20]));
}

#[test]
fn nested_flattening_round_trips() {
    let mut retort = retort_with(RetortConfig {
        name_style: Some(NameStyle::LowerSnake),
        ..RetortConfig::default()
    });
    let fields = ["a", "b", "c", "d", "e"].map(|id| required(id, TypeHint::Int));
    retort.register(
        "flat",
        record(&fields).layout(
            LayoutConfig::new()
                .map_id("a", MapResult::path([MapKey::from("x"), "y".into(), 0usize.into()]))
                .map_id("b", MapResult::path([MapKey::from("x"), "y".into(), 1usize.into()]))
                .map_id("c", MapResult::path(["x", "z"]))
                .map_id("d", MapResult::path([MapKey::from("w"), 0usize.into()]))
                .map_id("e", MapResult::path([MapKey::from("x"), MapKey::Generated])),
        ),
    );

    let data = json!({"x": {"y": [1, 2], "z": 3, "e": 5}, "w": [4]});
    let loaded: Value = retort.load("flat", &data).unwrap();
    assert_eq!(loaded, json!({"a": 1, "b": 2, "c": 3, "d": 4, "e": 5}));
    assert_eq!(retort.dump("flat", &loaded).unwrap(), data);
}

#[test]
fn forbidden_extra_keys() {
    for debug_trail in [DebugTrail::Disable, DebugTrail::First, DebugTrail::All] {
        let mut retort = retort_with(RetortConfig {
            extra_in: ExtraInPolicy::Forbid,
            debug_trail,
            ..RetortConfig::default()
        });
        retort.register("one", record(&[required("a", TypeHint::Int)]));
        let err = retort
            .loader::<Value>("one")
            .unwrap()
            .load(&json!({"a": 1, "x": 9}))
            .unwrap_err();
        let extra = match debug_trail {
            DebugTrail::All => {
                assert!(matches!(err.kind(), LoadErrorKind::Aggregate { .. }));
                &err.sub_errors()[0]
            }
            _ => &err,
        };
        match extra.kind() {
            LoadErrorKind::ExtraFields { extras, got } => {
                assert_eq!(extras, &BTreeSet::from(["x".to_owned()]));
                assert_eq!(got, &json!({"a": 1, "x": 9}));
            }
            other => panic!("unexpected {other:?} under {debug_trail:?}"),
        }
        assert!(trail(extra).is_empty());
    }
}

fn pair_list(retort: &mut Retort) {
    retort.register(
        "pair",
        record(&[required("a", TypeHint::Str), required("b", TypeHint::Str)])
            .layout(LayoutConfig::new().as_list(true)),
    );
}

#[test]
fn list_length_is_checked() {
    let mut retort = retort_with(RetortConfig {
        extra_in: ExtraInPolicy::Forbid,
        debug_trail: DebugTrail::First,
        ..RetortConfig::default()
    });
    pair_list(&mut retort);
    let loader = retort.loader::<Value>("pair").unwrap();

    let err = loader.load(&json!(["1", "2", "3"])).unwrap_err();
    assert!(matches!(
        err.kind(),
        LoadErrorKind::ExtraItems { expected_len: 2, got } if got == &json!(["1", "2", "3"])
    ));
    let err = loader.load(&json!(["1"])).unwrap_err();
    assert!(matches!(
        err.kind(),
        LoadErrorKind::NoRequiredItems { expected_len: 2, got } if got == &json!(["1"])
    ));
}

#[test]
fn extra_items_are_ignored_unless_forbidden() {
    let mut retort = retort_with(RetortConfig::default());
    pair_list(&mut retort);
    let loaded: Value = retort.load("pair", &json!(["1", "2", "3"])).unwrap();
    assert_eq!(loaded, json!({"a": "1", "b": "2"}));
}

#[test]
fn strings_at_list_positions() {
    let mut strict = retort_with(RetortConfig {
        debug_trail: DebugTrail::First,
        ..RetortConfig::default()
    });
    pair_list(&mut strict);
    let err = strict.loader::<Value>("pair").unwrap().load(&json!("ab")).unwrap_err();
    assert!(matches!(
        err.kind(),
        LoadErrorKind::ExcludedType {
            expected: ValueKind::Sequence,
            excluded: ValueKind::Str,
            got,
        } if got == &json!("ab")
    ));

    let mut lax = retort_with(RetortConfig {
        strict_coercion: false,
        ..RetortConfig::default()
    });
    pair_list(&mut lax);
    let loaded: Value = lax.load("pair", &json!("ab")).unwrap();
    assert_eq!(loaded, json!({"a": "a", "b": "b"}));
}
