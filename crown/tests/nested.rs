mod common;

use std::thread;
use std::time::Duration;

use common::{init_tracing, optional, record, required, trail};
use crown::{
    BuiltinCodecs, CannotProvide, DebugTrail, FieldCodecProvider, FieldDumper, FieldLoader,
    FieldRequest, LoadErrorKind, ModelEntry, Retort, RetortConfig, TrailElement, TypeHint, Value,
    ValueKind,
};
use serde_json::json;

fn people(config: RetortConfig) -> Retort {
    init_tracing();
    let mut retort = Retort::builder().config(config).build();
    retort
        .register(
            "address",
            record(&[
                required("street", TypeHint::Str),
                optional("zip", TypeHint::optional(TypeHint::Str), Value::Null),
            ]),
        )
        .register(
            "person",
            record(&[
                required("name", TypeHint::Str),
                required("address", TypeHint::model("address")),
                optional("tags", TypeHint::list(TypeHint::Str), json!([])),
            ]),
        );
    retort
}

#[test]
fn nested_models_load_and_dump() {
    let retort = people(RetortConfig::default());
    let loaded: Value = retort
        .load("person", &json!({"name": "Ann", "address": {"street": "Main"}}))
        .unwrap();
    let expected = json!({
        "name": "Ann",
        "address": {"street": "Main", "zip": null},
        "tags": [],
    });
    assert_eq!(loaded, expected);
    assert_eq!(retort.dump("person", &loaded).unwrap(), expected);
}

#[test]
fn nested_failures_carry_the_full_path() {
    let retort = people(RetortConfig {
        debug_trail: DebugTrail::First,
        ..RetortConfig::default()
    });
    let loader = retort.loader::<Value>("person").unwrap();

    let err = loader
        .load(&json!({"name": "Ann", "address": {"street": 5}}))
        .unwrap_err();
    assert_eq!(trail(&err), vec![TrailElement::from("address"), TrailElement::from("street")]);
    assert!(matches!(err.kind(), LoadErrorKind::Type { expected: ValueKind::Str, .. }));

    let err = loader
        .load(&json!({"name": "Ann", "address": {"street": "Main"}, "tags": ["a", 1]}))
        .unwrap_err();
    assert_eq!(trail(&err), vec![TrailElement::from("tags"), TrailElement::from(1usize)]);
}

#[test]
fn every_failure_is_collected() {
    let retort = people(RetortConfig::default());
    let err = retort
        .loader::<Value>("person")
        .unwrap()
        .load(&json!({"name": 1, "address": {"street": 5}}))
        .unwrap_err();
    let trails: Vec<_> = err.sub_errors().iter().map(trail).collect();
    assert_eq!(
        trails,
        vec![vec![TrailElement::from("name")], vec![TrailElement::from("address")]]
    );
    let nested = &err.sub_errors()[1];
    assert_eq!(trail(&nested.sub_errors()[0]), vec![TrailElement::from("street")]);
}

#[test]
fn recursive_models_are_compiled_once() {
    init_tracing();
    let mut retort = Retort::new();
    retort.register(
        "node",
        record(&[
            required("value", TypeHint::Int),
            optional("children", TypeHint::list(TypeHint::model("node")), json!([])),
        ]),
    );
    let data = json!({"value": 1, "children": [{"value": 2, "children": [{"value": 3}]}]});
    let loaded: Value = retort.load("node", &data).unwrap();
    assert_eq!(
        loaded,
        json!({"value": 1, "children": [
            {"value": 2, "children": [{"value": 3, "children": []}]}
        ]})
    );
    assert_eq!(retort.dump("node", &loaded).unwrap(), loaded);

    let err = retort
        .loader::<Value>("node")
        .unwrap()
        .load(&json!({"value": 1, "children": [{"value": "x"}]}))
        .unwrap_err();
    assert_eq!(err.sub_errors().len(), 1);
}

#[test]
fn nested_models_must_be_mapping_backed() {
    init_tracing();
    let mut retort = Retort::new();
    retort
        .register("typed", ModelEntry::<String>::new())
        .register("holder", record(&[required("inner", TypeHint::model("typed"))]));
    let err = retort.loader::<Value>("holder").unwrap_err();
    assert_eq!(err.model, "typed");
}

#[test]
fn codecs_are_shared_between_threads() {
    let retort = people(RetortConfig::default());
    let names: Vec<String> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    let loader = retort.loader::<Value>("person").unwrap();
                    loader
                        .load(&json!({"name": "Bo", "address": {"street": "Side"}}))
                        .unwrap();
                    loader.name().to_owned()
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });
    assert!(names.iter().all(|name| name == &names[0]), "{names:?}");
}

/// Builtin codecs that take a while to hand out a loader, and optionally
/// refuse to.
struct SlowCodecs {
    delay: Duration,
    refuse: bool,
}

impl FieldCodecProvider for SlowCodecs {
    fn field_loader(
        &self,
        retort: &Retort,
        request: &FieldRequest<'_>,
    ) -> Result<FieldLoader, CannotProvide> {
        thread::sleep(self.delay);
        if self.refuse {
            return Err(CannotProvide::new(request.model, "refused"));
        }
        BuiltinCodecs.field_loader(retort, request)
    }

    fn field_dumper(
        &self,
        retort: &Retort,
        request: &FieldRequest<'_>,
    ) -> Result<FieldDumper, CannotProvide> {
        BuiltinCodecs.field_dumper(retort, request)
    }
}

fn slow_retort(refuse: bool) -> Retort {
    init_tracing();
    let mut retort = Retort::builder()
        .field_codecs(SlowCodecs {
            delay: Duration::from_millis(300),
            refuse,
        })
        .build();
    retort.register("m", record(&[required("a", TypeHint::Int)]));
    retort
}

#[test]
fn concurrent_requests_wait_for_a_finished_codec() {
    let retort = slow_retort(false);
    let (first, second) = thread::scope(|scope| {
        let first = scope.spawn(|| retort.loader::<Value>("m").unwrap());
        thread::sleep(Duration::from_millis(100));
        let second = retort.loader::<Value>("m").unwrap();
        (first.join().unwrap(), second)
    });

    assert!(!second.name().contains("deferred"), "{}", second.name());
    assert_eq!(second.load(&json!({"a": 1})).unwrap(), json!({"a": 1}));
    assert_eq!(first.load(&json!({"a": 2})).unwrap(), json!({"a": 2}));
    assert_eq!(first.name(), second.name());
}

#[test]
fn concurrent_requests_see_a_failed_compile() {
    let retort = slow_retort(true);
    let (first, second) = thread::scope(|scope| {
        let first = scope.spawn(|| retort.loader::<Value>("m").map(|_| ()));
        thread::sleep(Duration::from_millis(100));
        let second = retort.loader::<Value>("m").map(|_| ());
        (first.join().unwrap(), second)
    });

    assert_eq!(first.unwrap_err().message, "refused");
    assert_eq!(second.unwrap_err().message, "refused");
}
