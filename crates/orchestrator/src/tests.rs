use crate::{
    maps_split_work, stores_split_work, LocalWorker, Orchestrator, OrchestratorConfig,
    OrchestratorError, Squasher, WorkPlan, Worker, WorkerError,
};
use assert_matches::assert_matches;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tributary_primitives::{
    BlockRange, Input, ModuleDescriptor, ModuleGraph, ModuleHash, ModuleKind, Ranges,
    UpdatePolicy, ValueType,
};
use tributary_pipeline::TestBlocks;
use tributary_storage::{MemoryStore, ObjectStore, SharedStore};
use tributary_store::{snapshot, Snapshots, Store, StoreConfig};

fn range(start: u64, end: u64) -> BlockRange {
    BlockRange::new(start, end)
}

// Planning with no complete snapshot and one partial present on storage.
#[test]
fn planning_classifies_present_and_missing() {
    let snapshots =
        Snapshots::new(Ranges::default(), vec![range(1000, 2000)].into());

    let unit = stores_split_work("store_totals", 1000, 0, 3500, &snapshots).unwrap();

    assert_eq!(unit.initial_store_file, None);
    assert_eq!(
        unit.partials_missing.0,
        vec![range(0, 1000), range(2000, 3000), range(3000, 3500)]
    );
    assert_eq!(unit.partials_present.0, vec![range(1000, 2000)]);
}

#[test]
fn planning_resumes_from_latest_complete_snapshot() {
    let snapshots = Snapshots::new(
        vec![range(0, 1000), range(0, 2000)].into(),
        Ranges::default(),
    );

    let unit = stores_split_work("store_totals", 1000, 0, 3500, &snapshots).unwrap();

    assert_eq!(unit.initial_store_file, Some(range(0, 2000)));
    assert_eq!(unit.partials_missing.0, vec![range(2000, 3000), range(3000, 3500)]);
    assert!(unit.partials_present.is_empty());
}

#[test]
fn planning_is_empty_when_snapshot_reaches_request_start() {
    let snapshots = Snapshots::new(vec![range(0, 3000)].into(), Ranges::default());

    let unit = stores_split_work("store_totals", 1000, 0, 3000, &snapshots).unwrap();

    assert_eq!(unit.initial_store_file, Some(range(0, 3000)));
    assert!(unit.partials_missing.is_empty());
}

#[test]
fn planning_is_empty_before_module_initial_block() {
    let unit = stores_split_work("store_totals", 1000, 5000, 3000, &Snapshots::default()).unwrap();
    assert_eq!(unit.initial_store_file, None);
    assert!(unit.partials_missing.is_empty());
    assert!(unit.partials_present.is_empty());
}

#[test]
fn planning_respects_unaligned_module_start() {
    let unit = stores_split_work("store_totals", 1000, 500, 2500, &Snapshots::default()).unwrap();
    assert_eq!(
        unit.partials_missing.0,
        vec![range(500, 1000), range(1000, 2000), range(2000, 2500)]
    );
}

// The mapper variant treats the contiguous run of sealed cache chunks from
// the module's initial block as the "initial" file; stray later chunks are
// present partials.
#[test]
fn mapper_planning_uses_cache_chunks() {
    let cached: Ranges =
        vec![range(0, 1000), range(1000, 2000), range(3000, 4000)].into();

    let unit = maps_split_work("map_things", 1000, 0, 4500, &cached).unwrap();

    assert_eq!(unit.initial_store_file, Some(range(0, 2000)));
    assert_eq!(unit.partials_missing.0, vec![range(2000, 3000), range(4000, 4500)]);
    assert_eq!(unit.partials_present.0, vec![range(3000, 4000)]);
}

#[test]
fn sub_requests_group_missing_ranges() {
    let snapshots = Snapshots::new(Ranges::default(), vec![range(1000, 2000)].into());
    let unit = stores_split_work("store_totals", 1000, 0, 3500, &snapshots).unwrap();

    // [0,1000) and [2000,3500) do not coalesce across the present range.
    assert_eq!(
        unit.batch_requests(2000).0,
        vec![range(0, 1000), range(2000, 3500)]
    );
}

async fn write_partial_file(
    storage: &MemoryStore,
    hash: &str,
    r: BlockRange,
    entries: &[(&str, &str)],
) {
    let mut kv = HashMap::new();
    for (k, v) in entries {
        kv.insert((*k).to_owned(), v.as_bytes().to_vec());
    }
    let name = format!(
        "states/{hash}/{}-{}.partial",
        r.start_block, r.exclusive_end_block
    );
    storage.put(&name, snapshot::encode_kv(&kv)).await.unwrap();
}

fn sum_store(storage: SharedStore) -> Store {
    let config = StoreConfig::new(
        "store_sums",
        ModuleHash::new("hash.store_sums"),
        0,
        1000,
        UpdatePolicy::Add,
        ValueType::Int64,
    );
    Store::new(config, storage)
}

// Out-of-order delivery: the second partial waits in the pending queue
// until the first arrives, then both merge and the complete snapshot is
// written.
#[tokio::test]
async fn squasher_merges_out_of_order_partials() {
    let storage = Arc::new(MemoryStore::new());
    write_partial_file(&storage, "hash.store_sums", range(0, 1000), &[("a", "3"), ("b", "1")])
        .await;
    write_partial_file(&storage, "hash.store_sums", range(1000, 2000), &[("a", "4"), ("c", "2")])
        .await;

    let squasher = Squasher::new(
        vec![sum_store(storage.clone())],
        &WorkPlan::default(),
        2000,
    )
    .await
    .unwrap();

    squasher.squash("store_sums", &vec![range(1000, 2000)].into()).await.unwrap();
    assert_matches!(
        squasher.ensure_done().await,
        Err(OrchestratorError::Incomplete { reached: 0, target: 2000, .. })
    );

    squasher.squash("store_sums", &vec![range(0, 1000)].into()).await.unwrap();
    squasher.ensure_done().await.unwrap();

    let complete = storage.read("states/hash.store_sums/0-2000.kv").await.unwrap();
    let kv = snapshot::decode_kv(&complete).unwrap();
    assert_eq!(kv.get("a").unwrap(), b"7");
    assert_eq!(kv.get("b").unwrap(), b"1");
    assert_eq!(kv.get("c").unwrap(), b"2");
}

// --- end-to-end back-processing against the in-process worker -------------

const ECHO_MAPPER: &str = r#"
(module
  (import "env" "output" (func $output (param i32 i32)))
  (memory (export "memory") 1)
  (global $heap (mut i32) (i32.const 4096))
  (func (export "alloc") (param $len i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $heap))
    (global.set $heap (i32.add (global.get $heap) (local.get $len)))
    (local.get $ptr))
  (func (export "dealloc") (param i32 i32))
  (func (export "map_echo") (param $ptr i32) (param $len i32)
    (call $output (local.get $ptr) (local.get $len))))
"#;

const LENGTH_STORE: &str = r#"
(module
  (import "state" "add_int64" (func $add (param i64 i32 i32 i64)))
  (memory (export "memory") 1)
  (global $heap (mut i32) (i32.const 4096))
  (data (i32.const 16) "total")
  (func (export "alloc") (param $len i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $heap))
    (global.set $heap (i32.add (global.get $heap) (local.get $len)))
    (local.get $ptr))
  (func (export "dealloc") (param i32 i32))
  (func (export "store_lengths") (param $ptr i32) (param $len i32)
    (call $add (i64.const 0) (i32.const 16) (i32.const 5) (i64.extend_i32_u (local.get $len)))))
"#;

fn test_graph() -> ModuleGraph {
    ModuleGraph::new(vec![
        ModuleDescriptor {
            name: "map_echo".to_owned(),
            hash: ModuleHash::new("hash.map_echo"),
            initial_block: 0,
            kind: ModuleKind::Map,
            inputs: vec![Input::Source { name: "sf.blocks".to_owned() }],
            output_type: Some("proto:test.Echo".to_owned()),
            update_policy: None,
            value_type: None,
            entrypoint: "map_echo".to_owned(),
        },
        ModuleDescriptor {
            name: "store_lengths".to_owned(),
            hash: ModuleHash::new("hash.store_lengths"),
            initial_block: 0,
            kind: ModuleKind::Store,
            inputs: vec![Input::Map { module: "map_echo".to_owned() }],
            output_type: None,
            update_policy: Some(UpdatePolicy::Add),
            value_type: Some(ValueType::Int64),
            entrypoint: "store_lengths".to_owned(),
        },
    ])
    .unwrap()
}

fn test_codes() -> HashMap<String, Vec<u8>> {
    let mut codes = HashMap::new();
    codes.insert("map_echo".to_owned(), ECHO_MAPPER.as_bytes().to_vec());
    codes.insert("store_lengths".to_owned(), LENGTH_STORE.as_bytes().to_vec());
    codes
}

fn local_worker(storage: SharedStore) -> Arc<LocalWorker> {
    Arc::new(LocalWorker::new(
        test_graph(),
        test_codes(),
        storage,
        Arc::new(TestBlocks::new("sf.blocks")),
        100,
    ))
}

#[tokio::test]
async fn back_processing_produces_complete_snapshot() {
    let storage: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::new(100, 200, 4),
        test_graph(),
        storage.clone(),
        local_worker(storage.clone()),
    );

    let plan = orchestrator.back_process(250, CancellationToken::new()).await.unwrap();

    // Nothing existed, so everything was missing.
    assert_eq!(plan.0["store_lengths"].partials_missing.len(), 3);
    assert!(plan.progress_messages().is_empty());

    let complete = storage.read("states/hash.store_lengths/0-250.kv").await.unwrap();
    let kv = snapshot::decode_kv(&complete).unwrap();
    // "payload-N" lengths over blocks 0..250.
    let expected = 10 * 9 + 90 * 10 + 150 * 11;
    assert_eq!(kv.get("total").unwrap(), &expected.to_string().into_bytes());
}

#[tokio::test]
async fn back_processing_reuses_present_partials() {
    let storage: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    // Pretend [100,200) was computed by an earlier run, with a sentinel
    // value proving it was reused rather than recomputed.
    write_partial_file(&storage, "hash.store_lengths", range(100, 200), &[("total", "100000")])
        .await;

    let orchestrator = Orchestrator::new(
        OrchestratorConfig::new(100, 1000, 4),
        test_graph(),
        storage.clone(),
        local_worker(storage.clone()),
    );
    let plan = orchestrator.back_process(250, CancellationToken::new()).await.unwrap();

    assert_eq!(plan.0["store_lengths"].partials_present.0, vec![range(100, 200)]);
    let progress = plan.progress_messages();
    assert_eq!(progress.len(), 1);
    assert_eq!(progress[0].name, "store_lengths");

    let complete = storage.read("states/hash.store_lengths/0-250.kv").await.unwrap();
    let kv = snapshot::decode_kv(&complete).unwrap();
    let expected = (10 * 9 + 90 * 10 + 100_000 + 50 * 11).to_string();
    assert_eq!(kv.get("total").unwrap(), &expected.into_bytes());
}

/// Fails each bucket's first attempt with a transient error.
struct FlakyWorker {
    inner: Arc<LocalWorker>,
    attempts: AtomicUsize,
    failures_per_bucket: usize,
}

#[async_trait::async_trait]
impl Worker for FlakyWorker {
    async fn process(
        &self,
        range: BlockRange,
        cancel: CancellationToken,
    ) -> Result<(), WorkerError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures_per_bucket {
            return Err(WorkerError::Transient("injected".to_owned()));
        }
        self.inner.process(range, cancel).await
    }
}

#[tokio::test]
async fn transient_sub_request_failures_are_retried() {
    let storage: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let worker = Arc::new(FlakyWorker {
        inner: local_worker(storage.clone()),
        attempts: AtomicUsize::new(0),
        failures_per_bucket: 1,
    });

    let mut config = OrchestratorConfig::new(100, 1000, 2);
    config.retry_base_delay = Duration::from_millis(1);
    let orchestrator = Orchestrator::new(config, test_graph(), storage.clone(), worker);

    orchestrator.back_process(200, CancellationToken::new()).await.unwrap();
    assert!(storage.read("states/hash.store_lengths/0-200.kv").await.is_ok());
}

#[tokio::test]
async fn exhausted_retries_fail_the_request() {
    let storage: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let worker = Arc::new(FlakyWorker {
        inner: local_worker(storage.clone()),
        attempts: AtomicUsize::new(0),
        failures_per_bucket: usize::MAX,
    });

    let mut config = OrchestratorConfig::new(100, 1000, 2);
    config.max_attempts = 2;
    config.retry_base_delay = Duration::from_millis(1);
    let orchestrator = Orchestrator::new(config, test_graph(), storage, worker);

    let err = orchestrator.back_process(200, CancellationToken::new()).await.unwrap_err();
    assert_matches!(
        err,
        OrchestratorError::SubRequest { attempts: 2, source: WorkerError::Transient(_), .. }
    );
}
