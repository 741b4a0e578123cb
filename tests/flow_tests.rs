//! End-to-end coverage of flow setup and execution: base/link resolution,
//! cycle detection, memoization and the sync/agent push-pull protocol.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use camino::Utf8PathBuf;
use sluice_config::Flow;
use sluice_exec::{sync::SyncContext, Executor};
use sluice_value::{
    registry::{Param, ParamKind, Signature},
    FuncRegistry, FuncShape, NodeFunc, Value,
};

fn json(s: &str) -> Value {
    Value::from(serde_json::from_str::<serde_json::Value>(s).unwrap())
}

fn scratch_dir(label: &str) -> Utf8PathBuf {
    let pid = std::process::id();
    let dir = std::env::temp_dir().join(format!("sluice-test-{label}-{pid}"));
    let _ = std::fs::remove_dir_all(&dir);
    Utf8PathBuf::try_from(dir).unwrap()
}

fn param(name: &str, default: Option<Value>) -> Param {
    Param { name: name.to_string(), kind: ParamKind::PositionalOrKeyword, default }
}

/// `function.foo(a, b, d="default")`, mirroring a node whose declared
/// parameters include a required one with no default.
fn registry_with_foo() -> FuncRegistry {
    let mut reg = FuncRegistry::new();
    reg.register(NodeFunc::new(
        "function.foo",
        Signature::new(vec![
            param("a", None),
            param("b", None),
            param("d", Some(Value::String("default".into()))),
        ]),
        FuncShape::Plain,
        |args| {
            Ok(Value::List(vec![
                args.positional.get("a").cloned().unwrap_or(Value::Null),
                args.positional.get("b").cloned().unwrap_or(Value::Null),
                args.positional.get("d").cloned().unwrap_or(Value::Null),
            ]))
        },
    ));
    reg
}

#[test]
fn required_argument_missing_fails_the_call() {
    let conf = json(r#"{"test": {"foo@function.foo": {"a": "a", "d": "d"}}}"#);
    let flow = Flow::from_conf(None, &conf, &BTreeMap::new(), &registry_with_foo()).unwrap();
    let executor = Executor::new(scratch_dir("missing-arg"), Some(1)).unwrap();
    let err = executor.call(&flow, "test.foo").unwrap_err();
    assert!(err.to_string().contains("missing required arguments"), "{err}");
    assert!(err.to_string().contains("b"), "{err}");
}

#[test]
fn declared_defaults_are_applied_when_omitted() {
    let conf = json(r#"{"test": {"foo@function.foo": {"a": "a", "b": "b"}}}"#);
    let flow = Flow::from_conf(None, &conf, &BTreeMap::new(), &registry_with_foo()).unwrap();
    let executor = Executor::new(scratch_dir("defaults"), Some(1)).unwrap();
    let value = executor.call(&flow, "test.foo").unwrap();
    assert_eq!(value, Value::List(vec![Value::String("a".into()), Value::String("b".into()), Value::String("default".into())]));

    // The default never survives into the pretty args view (I-invariant:
    // declared defaults are dropped from `args_conf`).
    let node = flow.node("test.foo").unwrap();
    let args_map = node.args_conf.as_map().cloned().unwrap_or_default();
    assert!(!args_map.contains_key("d"));
}

#[test]
fn by_value_link_feeds_producer_result_into_consumer() {
    let mut reg = registry_with_foo();
    reg.register(NodeFunc::new(
        "function.upper",
        Signature::new(vec![param("value", None)]),
        FuncShape::Plain,
        |args| match args.positional.get("value") {
            Some(Value::String(s)) => Ok(Value::String(s.to_uppercase())),
            _ => Ok(Value::Null),
        },
    ));
    let conf = json(
        r#"{"test": {
            "src@function.upper": {"value": "hello"},
            "dst@function.upper": {"value": "@src"}
        }}"#,
    );
    let flow = Flow::from_conf(None, &conf, &BTreeMap::new(), &reg).unwrap();
    let executor = Executor::new(scratch_dir("by-value-link"), Some(2)).unwrap();
    let value = executor.call(&flow, "test.dst").unwrap();
    assert_eq!(value, Value::String("HELLO".into()));
}

#[test]
fn by_reference_link_defers_materialization_to_the_consumer() {
    let mut reg = FuncRegistry::new();
    reg.register(NodeFunc::new(
        "function.tokenize",
        Signature::new(vec![param("text", None)]),
        FuncShape::Plain,
        |args| match args.positional.get("text") {
            Some(Value::String(s)) => Ok(Value::List(s.split_whitespace().map(|w| Value::String(w.to_string())).collect())),
            _ => Ok(Value::List(vec![])),
        },
    ));
    reg.register(NodeFunc::new(
        "function.analyzer",
        Signature::new(vec![param("tokenize", None), param("input", None)]),
        FuncShape::Plain,
        // `tokenize` arrives as a deferred `Opaque::Callable`, not an
        // already-materialized value: the function chooses to call it.
        |args| {
            let tokenize = args.positional.get("tokenize").cloned().unwrap_or(Value::Null);
            tokenize.call_ref()
        },
    ));
    let conf = json(
        r#"{"test": {
            "tokenize@function.tokenize": {"text": "hello world"},
            "analyzer@function.analyzer": {"tokenize": "&tokenize", "input": "hello world"}
        }}"#,
    );
    let flow = Flow::from_conf(None, &conf, &BTreeMap::new(), &reg).unwrap();
    let executor = Executor::new(scratch_dir("by-ref-link"), Some(2)).unwrap();
    let value = executor.call(&flow, "test.analyzer").unwrap();
    assert_eq!(value, Value::List(vec![Value::String("hello".into()), Value::String("world".into())]));
}

#[test]
fn node_base_cycle_is_rejected_with_the_standard_message() {
    let conf = json(r#"{"test": {"a@dict": {"a": "@b"}, "b@dict": {"b": "@a"}}}"#);
    let err = Flow::from_conf(None, &conf, &BTreeMap::new(), &FuncRegistry::new()).unwrap_err();
    assert_eq!(err.to_string(), "Loop detected: [test.a] @ test.b @ [test.a]");
}

#[test]
fn generator_is_reinvoked_fresh_for_every_consumer() {
    let mut reg = FuncRegistry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    reg.register(NodeFunc::new(
        "function.numbers",
        Signature::new(vec![param("count", Some(Value::Int(3)))]),
        FuncShape::Generator,
        move |args| {
            counted.fetch_add(1, Ordering::SeqCst);
            let n = match args.positional.get("count") {
                Some(Value::Int(n)) => *n,
                _ => 3,
            };
            Ok(Value::List((0..n).map(Value::Int).collect()))
        },
    ));
    reg.register(NodeFunc::new(
        "function.pair",
        Signature::new(vec![param("first", None), param("second", None)]),
        FuncShape::Plain,
        |args| {
            Ok(Value::List(vec![
                args.positional.get("first").cloned().unwrap_or(Value::Null),
                args.positional.get("second").cloned().unwrap_or(Value::Null),
            ]))
        },
    ));
    let conf = json(
        r#"{"test": {
            "numbers@function.numbers": {},
            "consumer_a@function.pair": {"first": "@numbers", "second": "@numbers"},
            "consumer_b@function.pair": {"first": "@numbers", "second": "@numbers"}
        }}"#,
    );
    let flow = Flow::from_conf(None, &conf, &BTreeMap::new(), &reg).unwrap();
    let executor = Executor::new(scratch_dir("generator-reuse"), Some(2)).unwrap();

    let a = executor.call(&flow, "test.consumer_a").unwrap();
    let b = executor.call(&flow, "test.consumer_b").unwrap();
    let expected = Value::List(vec![Value::Int(0), Value::Int(1), Value::Int(2)]);
    assert_eq!(a, Value::List(vec![expected.clone(), expected.clone()]));
    assert_eq!(b, Value::List(vec![expected.clone(), expected]));
    // Never cached: each of the two `call()`s re-invoked the generator.
    assert!(calls.load(Ordering::SeqCst) >= 2);
}

#[test]
fn dumpable_node_round_trips_through_its_data_file() {
    let mut reg = FuncRegistry::new();
    reg.register(NodeFunc::new(
        "function.foobar",
        Signature::new(vec![]),
        FuncShape::Plain,
        |_| Ok(Value::String("foobar".into())),
    ));
    let conf = json(r#"{"test": {"foobar@function.foobar": {"_dumpable": true}}}"#);
    let flow = Flow::from_conf(None, &conf, &BTreeMap::new(), &reg).unwrap();
    let data_dir = scratch_dir("dump-round-trip");
    let executor = Executor::new(data_dir.clone(), Some(1)).unwrap();

    let value = executor.call(&flow, "test.foobar").unwrap();
    assert_eq!(value, Value::String("foobar".into()));

    let node = flow.node("test.foobar").unwrap();
    let data_file = data_dir.join(&node.scope).join(format!("{}.data", node.slug));
    assert!(data_file.exists(), "expected a dumped data file at {data_file}");
    let reloaded = std::fs::read_to_string(&data_file).unwrap();
    assert!(reloaded.contains("foobar"));
}

#[test]
fn hash_is_deterministic_and_order_independent() {
    let reg = {
        let mut reg = FuncRegistry::new();
        reg.register(NodeFunc::new(
            "test.function.foo",
            Signature::new(vec![param("a", None), param("b", None), param("d", None)]),
            FuncShape::Plain,
            |_| Ok(Value::Null),
        ));
        reg
    };
    let conf_a = json(r#"{"test": {"foo@test.function.foo": {"a": "a", "b": "b", "d": "d"}}}"#);
    let conf_b = json(r#"{"test": {"foo@test.function.foo": {"d": "d", "a": "a", "b": "b"}}}"#);
    let flow_a = Flow::from_conf(None, &conf_a, &BTreeMap::new(), &reg).unwrap();
    let flow_b = Flow::from_conf(None, &conf_b, &BTreeMap::new(), &reg).unwrap();
    assert_eq!(flow_a.node("test.foo").unwrap().hash, flow_b.node("test.foo").unwrap().hash);
}

#[test]
fn push_then_pull_is_idempotent() {
    let mut reg = FuncRegistry::new();
    reg.register(NodeFunc::new(
        "function.value",
        Signature::new(vec![]),
        FuncShape::Plain,
        |_| Ok(Value::String("persisted".into())),
    ));
    let conf = json(r#"{"test": {"node@function.value": {"_dumpable": true}}}"#);
    let flow = Flow::from_conf(None, &conf, &BTreeMap::new(), &reg).unwrap();

    let data_dir = scratch_dir("sync-push-data");
    let sync_dir = scratch_dir("sync-push-sync");
    let executor = Executor::new(data_dir.clone(), Some(1)).unwrap();
    executor.call(&flow, "test.node").unwrap();

    let ctx = SyncContext { data_dir: &data_dir, sync_dir: &sync_dir };
    ctx.push(&flow, "test.node").unwrap();

    std::fs::remove_dir_all(&data_dir).unwrap();
    ctx.pull(&flow, "test.node").unwrap();

    let node = flow.node("test.node").unwrap();
    let data_file = data_dir.join(&node.scope).join(format!("{}.data", node.slug));
    assert!(data_file.exists());
}
