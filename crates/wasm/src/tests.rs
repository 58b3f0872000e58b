use crate::{Input, WasmError, WasmModule, WasmRuntime};
use std::sync::Arc;
use tributary_primitives::{Clock, ModuleHash, UpdatePolicy, ValueType};
use tributary_storage::MemoryStore;
use tributary_store::{Store, StoreConfig, StoreHandle};

fn clock() -> Clock {
    Clock { number: 42, id: "block-42".to_owned(), timestamp: 1_600_000_000 }
}

fn new_store(policy: UpdatePolicy, value_type: ValueType) -> StoreHandle {
    let config = StoreConfig::new(
        "store_totals",
        ModuleHash::new("hash.store"),
        0,
        100,
        policy,
        value_type,
    );
    StoreHandle::new(Store::new(config, Arc::new(MemoryStore::new())))
}

/// Echo mapper: logs a line, then returns its input bytes as output.
const ECHO_MAPPER: &str = r#"
(module
  (import "env" "output" (func $output (param i32 i32)))
  (import "logger" "println" (func $println (param i32 i32)))
  (memory (export "memory") 1)
  (global $heap (mut i32) (i32.const 4096))
  (data (i32.const 16) "processed one block")
  (func (export "alloc") (param $len i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $heap))
    (global.set $heap (i32.add (global.get $heap) (local.get $len)))
    (local.get $ptr))
  (func (export "dealloc") (param i32 i32))
  (func (export "map_echo") (param $ptr i32) (param $len i32)
    (call $println (i32.const 16) (i32.const 19))
    (call $output (local.get $ptr) (local.get $len))))
"#;

/// Store writer: sets "key" = "value" at ordinal 7.
const STORE_WRITER: &str = r#"
(module
  (import "state" "set" (func $set (param i64 i32 i32 i32 i32)))
  (memory (export "memory") 1)
  (global $heap (mut i32) (i32.const 4096))
  (data (i32.const 16) "key")
  (data (i32.const 32) "value")
  (func (export "alloc") (param $len i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $heap))
    (global.set $heap (i32.add (global.get $heap) (local.get $len)))
    (local.get $ptr))
  (func (export "dealloc") (param i32 i32))
  (func (export "build_store")
    (call $set (i64.const 7) (i32.const 16) (i32.const 3) (i32.const 32) (i32.const 5))))
"#;

/// Store misuser: calls `append` against whatever store it is given.
const STORE_APPENDER: &str = r#"
(module
  (import "state" "append" (func $append (param i64 i32 i32 i32 i32)))
  (memory (export "memory") 1)
  (data (i32.const 16) "key")
  (data (i32.const 32) "x")
  (func (export "alloc") (param i32) (result i32) (i32.const 1024))
  (func (export "dealloc") (param i32 i32))
  (func (export "misbehave")
    (call $append (i64.const 0) (i32.const 16) (i32.const 3) (i32.const 32) (i32.const 1))))
"#;

/// Store reader: looks up "key" in input store 0 and outputs the value the
/// host wrote back through the out-parameter.
const STORE_READER: &str = r#"
(module
  (import "state" "get_at" (func $get_at (param i32 i64 i32 i32 i32) (result i32)))
  (import "env" "output" (func $output (param i32 i32)))
  (memory (export "memory") 1)
  (global $heap (mut i32) (i32.const 4096))
  (data (i32.const 16) "key")
  (func $alloc (export "alloc") (param $len i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $heap))
    (global.set $heap (i32.add (global.get $heap) (local.get $len)))
    (local.get $ptr))
  (func (export "dealloc") (param i32 i32))
  (func (export "read_store") (param $idx i32)
    (local $out i32)
    (local.set $out (call $alloc (i32.const 8)))
    (if (i32.eq
          (call $get_at (local.get $idx) (i64.const 0) (i32.const 16) (i32.const 3) (local.get $out))
          (i32.const 1))
      (then
        (call $output
          (i32.load (local.get $out))
          (i32.load offset=4 (local.get $out)))))))
"#;

/// Panicker: registers a structured panic, then hits unreachable.
const PANICKER: &str = r#"
(module
  (import "env" "register_panic" (func $register_panic (param i32 i32 i32 i32 i32 i32)))
  (memory (export "memory") 1)
  (data (i32.const 16) "boom")
  (data (i32.const 32) "src/lib.rs")
  (func (export "alloc") (param i32) (result i32) (i32.const 1024))
  (func (export "dealloc") (param i32 i32))
  (func (export "explode") (param i32 i32)
    (call $register_panic
      (i32.const 16) (i32.const 4)
      (i32.const 32) (i32.const 10)
      (i32.const 7) (i32.const 3))
    unreachable))
"#;

#[test]
fn mapper_echoes_input_and_logs() {
    let runtime = WasmRuntime::new().unwrap();
    let module =
        WasmModule::compile(&runtime, "map_echo", "map_echo", ECHO_MAPPER.as_bytes()).unwrap();

    let mut instance = module
        .new_instance(
            &clock(),
            vec![Input::Data { name: "sf.blocks".to_owned(), bytes: b"block payload".to_vec() }],
        )
        .unwrap();

    instance.execute().unwrap();
    assert_eq!(instance.output(), Some(b"block payload".as_slice()));
    assert_eq!(instance.logs(), ["processed one block"]);
    assert!(!instance.logs_truncated());
    instance.clear_heap().unwrap();
}

#[test]
fn store_writes_reach_the_output_store() {
    let runtime = WasmRuntime::new().unwrap();
    let module =
        WasmModule::compile(&runtime, "store_totals", "build_store", STORE_WRITER.as_bytes())
            .unwrap();
    let handle = new_store(UpdatePolicy::Set, ValueType::Bytes);

    let mut instance = module
        .new_instance(&clock(), vec![Input::OutputStore { store: handle.clone() }])
        .unwrap();
    instance.execute().unwrap();

    let store = handle.read();
    assert_eq!(store.get_at(7, "key"), Some(&b"value".to_vec()));
    assert_eq!(store.deltas().len(), 1);
    assert_eq!(store.deltas()[0].ordinal, 7);
    assert_eq!(store.last_ordinal(), 7);
}

#[test]
fn guest_reads_upstream_store_through_out_parameter() {
    let runtime = WasmRuntime::new().unwrap();
    let module =
        WasmModule::compile(&runtime, "map_reader", "read_store", STORE_READER.as_bytes()).unwrap();

    let upstream = new_store(UpdatePolicy::Set, ValueType::Bytes);
    upstream.write().set(0, "key", b"forty-two".to_vec()).unwrap();

    let mut instance = module
        .new_instance(
            &clock(),
            vec![Input::Store { name: "store_totals".to_owned(), reader: Arc::new(upstream) }],
        )
        .unwrap();
    instance.execute().unwrap();

    assert_eq!(instance.output(), Some(b"forty-two".as_slice()));
}

#[test]
fn missing_key_reports_not_found() {
    let runtime = WasmRuntime::new().unwrap();
    let module =
        WasmModule::compile(&runtime, "map_reader", "read_store", STORE_READER.as_bytes()).unwrap();
    let upstream = new_store(UpdatePolicy::Set, ValueType::Bytes);

    let mut instance = module
        .new_instance(
            &clock(),
            vec![Input::Store { name: "store_totals".to_owned(), reader: Arc::new(upstream) }],
        )
        .unwrap();
    instance.execute().unwrap();

    // found == 0, so the guest never called `output`.
    assert_eq!(instance.output(), None);
}

#[test]
fn registered_panic_is_surfaced_with_location() {
    let runtime = WasmRuntime::new().unwrap();
    let module =
        WasmModule::compile(&runtime, "map_explode", "explode", PANICKER.as_bytes()).unwrap();

    let mut instance = module
        .new_instance(&clock(), vec![Input::Data { name: "in".to_owned(), bytes: vec![1] }])
        .unwrap();

    let err = instance.execute().unwrap_err();
    match err {
        WasmError::Panic { module, panic } => {
            assert_eq!(module, "map_explode");
            assert_eq!(panic.message, "boom");
            assert_eq!(panic.file, "src/lib.rs");
            assert_eq!((panic.line, panic.column), (7, 3));
        }
        other => panic!("expected panic error, got {other}"),
    }
}

#[test]
fn policy_violation_unwinds_execution() {
    let runtime = WasmRuntime::new().unwrap();
    let module =
        WasmModule::compile(&runtime, "store_bad", "misbehave", STORE_APPENDER.as_bytes()).unwrap();
    let handle = new_store(UpdatePolicy::Set, ValueType::Bytes);

    let mut instance = module
        .new_instance(&clock(), vec![Input::OutputStore { store: handle.clone() }])
        .unwrap();

    let err = instance.execute().unwrap_err();
    assert!(matches!(
        err,
        WasmError::Store(tributary_store::StoreError::PolicyViolation { .. })
    ));
    // The failed write recorded nothing.
    assert!(handle.read().deltas().is_empty());
}

#[test]
fn interrupt_stops_execution() {
    let runtime = WasmRuntime::new().unwrap();
    let module =
        WasmModule::compile(&runtime, "map_echo", "map_echo", ECHO_MAPPER.as_bytes()).unwrap();

    let mut instance = module
        .new_instance(
            &clock(),
            vec![Input::Data { name: "sf.blocks".to_owned(), bytes: vec![0] }],
        )
        .unwrap();

    runtime.interrupt();
    let err = instance.execute().unwrap_err();
    assert!(matches!(err, WasmError::Cancelled), "got {err}");
}

#[test]
fn trap_without_panic_slot_is_a_trap_error() {
    let runtime = WasmRuntime::new().unwrap();
    let wat = r#"
    (module
      (memory (export "memory") 1)
      (func (export "alloc") (param i32) (result i32) (i32.const 1024))
      (func (export "dealloc") (param i32 i32))
      (func (export "die") (param i32 i32) unreachable))
    "#;
    let module = WasmModule::compile(&runtime, "map_die", "die", wat.as_bytes()).unwrap();

    let mut instance = module
        .new_instance(&clock(), vec![Input::Data { name: "in".to_owned(), bytes: vec![] }])
        .unwrap();
    let err = instance.execute().unwrap_err();
    assert!(matches!(err, WasmError::Trap { .. }), "got {err}");
}
