use crate::{
    BlockSource, BlockStream, EventSender, Pipeline, PipelineConfig, PipelineError,
    PipelineEvent, SourceError, SourcedBlock, TestBlocks,
};
use assert_matches::assert_matches;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio_util::sync::CancellationToken;
use tributary_primitives::{
    BlockRange, Clock, Input, ModuleDescriptor, ModuleGraph, ModuleHash, ModuleKind, UpdatePolicy,
    ValueType,
};
use tributary_storage::{MemoryStore, ObjectStore};

/// Echo mapper: forwards its source payload as output.
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

/// Length accumulator: adds its input length to the int64 sum under "total".
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

fn mapper_descriptor() -> ModuleDescriptor {
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
    }
}

fn store_descriptor() -> ModuleDescriptor {
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
    }
}

fn test_graph() -> ModuleGraph {
    ModuleGraph::new(vec![mapper_descriptor(), store_descriptor()]).unwrap()
}

fn test_codes() -> HashMap<String, Vec<u8>> {
    let mut codes = HashMap::new();
    codes.insert("map_echo".to_owned(), ECHO_MAPPER.as_bytes().to_vec());
    codes.insert("store_lengths".to_owned(), LENGTH_STORE.as_bytes().to_vec());
    codes
}

/// Wraps a source and counts how many leg streams were opened.
struct CountingSource {
    inner: TestBlocks,
    opened: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl BlockSource for CountingSource {
    async fn blocks(&self, range: BlockRange) -> Result<BlockStream, SourceError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.inner.blocks(range).await
    }
}

/// Cancels the token as soon as a leg at or past `cancel_at` is requested.
struct CancellingSource {
    inner: TestBlocks,
    cancel_at: u64,
    token: CancellationToken,
}

#[async_trait::async_trait]
impl BlockSource for CancellingSource {
    async fn blocks(&self, range: BlockRange) -> Result<BlockStream, SourceError> {
        if range.start_block >= self.cancel_at {
            self.token.cancel();
        }
        self.inner.blocks(range).await
    }
}

/// Delivers blocks with one height missing.
struct GappySource;

#[async_trait::async_trait]
impl BlockSource for GappySource {
    async fn blocks(&self, range: BlockRange) -> Result<BlockStream, SourceError> {
        let start_block = range.start_block;
        let blocks = (range.start_block..range.exclusive_end_block)
            .filter(move |n| *n != start_block + 1)
            .map(|number| {
                Ok::<_, SourceError>(SourcedBlock {
                    clock: Clock::with_number(number),
                    ..Default::default()
                })
            });
        Ok(Box::pin(futures_util::stream::iter(blocks)))
    }
}

#[tokio::test]
async fn pipeline_executes_graph_and_seals_interval() {
    let storage = Arc::new(MemoryStore::new());
    let graph = test_graph();
    let (tx, mut rx) = tokio::sync::mpsc::channel(256);

    let mut pipeline = Pipeline::new(
        PipelineConfig::live(100, vec!["map_echo".to_owned()]),
        &graph,
        &test_codes(),
        storage.clone(),
        EventSender::new(tx),
    )
    .unwrap();

    pipeline
        .run(&TestBlocks::new("sf.blocks"), BlockRange::new(0, 100), CancellationToken::new())
        .await
        .unwrap();

    // "payload-N": 9 bytes for one-digit heights, 10 for two-digit ones.
    let total = 10 * 9 + 90 * 10;
    let store = pipeline.stores()[0].read();
    assert_eq!(store.get_last("total"), Some(&total.to_string().into_bytes()));
    drop(store);

    // Snapshot and both cache chunks were sealed.
    assert!(storage.read("states/hash.store_lengths/0-100.kv").await.is_ok());
    assert!(storage.read("outputs/hash.map_echo/0-100.output").await.is_ok());
    assert!(storage.read("outputs/hash.store_lengths/0-100.output").await.is_ok());

    // Every block streamed one event carrying the mapper output.
    let mut processed = 0;
    let mut sealed = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            PipelineEvent::BlockProcessed { outputs, .. } => {
                processed += 1;
                assert_eq!(outputs.len(), 1);
                assert_eq!(outputs[0].name, "map_echo");
            }
            PipelineEvent::IntervalSaved { boundary } => {
                sealed += 1;
                assert_eq!(boundary, 100);
            }
        }
    }
    assert_eq!(processed, 100);
    assert_eq!(sealed, 1);
}

// Re-running a fully cached range never touches the block source: outputs
// replay from sealed chunks and store state is rebuilt from cached deltas.
#[tokio::test]
async fn cached_rerun_skips_source_and_rebuilds_state() {
    let storage = Arc::new(MemoryStore::new());
    let graph = test_graph();

    let mut first = Pipeline::new(
        PipelineConfig::live(100, vec![]),
        &graph,
        &test_codes(),
        storage.clone(),
        EventSender::disabled(),
    )
    .unwrap();
    first
        .run(&TestBlocks::new("sf.blocks"), BlockRange::new(100, 200), CancellationToken::new())
        .await
        .unwrap();
    let expected_kv = first.stores()[0].read().kv().clone();
    assert!(!expected_kv.is_empty());

    let opened = Arc::new(AtomicUsize::new(0));
    let counting =
        CountingSource { inner: TestBlocks::new("sf.blocks"), opened: opened.clone() };
    let mut second = Pipeline::new(
        PipelineConfig::live(100, vec![]),
        &graph,
        &test_codes(),
        storage,
        EventSender::disabled(),
    )
    .unwrap();
    second
        .run(&counting, BlockRange::new(100, 200), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(opened.load(Ordering::SeqCst), 0, "source must not be fetched");
    assert_eq!(second.stores()[0].read().kv(), &expected_kv);
}

// Cancellation keeps everything sealed up to the last boundary and nothing
// after it.
#[tokio::test]
async fn cancellation_leaves_sealed_intervals_only() {
    let storage = Arc::new(MemoryStore::new());
    let graph = ModuleGraph::new(vec![mapper_descriptor()]).unwrap();
    let token = CancellationToken::new();
    let source = CancellingSource {
        inner: TestBlocks::new("sf.blocks"),
        cancel_at: 200,
        token: token.clone(),
    };

    let mut pipeline = Pipeline::new(
        PipelineConfig::live(100, vec![]),
        &graph,
        &test_codes(),
        storage.clone(),
        EventSender::disabled(),
    )
    .unwrap();

    let err = pipeline.run(&source, BlockRange::new(0, 300), token).await.unwrap_err();
    assert_matches!(err, PipelineError::Cancelled);

    let chunks = storage.list("outputs/hash.map_echo/").await.unwrap();
    assert_eq!(
        chunks,
        vec!["outputs/hash.map_echo/0-100.output", "outputs/hash.map_echo/100-200.output"]
    );
}

#[tokio::test]
async fn source_gap_is_fatal() {
    let storage = Arc::new(MemoryStore::new());
    let graph = ModuleGraph::new(vec![mapper_descriptor()]).unwrap();

    let mut pipeline = Pipeline::new(
        PipelineConfig::live(100, vec![]),
        &graph,
        &test_codes(),
        storage,
        EventSender::disabled(),
    )
    .unwrap();

    let err = pipeline
        .run(&GappySource, BlockRange::new(0, 100), CancellationToken::new())
        .await
        .unwrap_err();
    assert_matches!(err, PipelineError::SourceGap { expected: 1, got: 2 });
}

// Back-processing writes one self-contained partial per leg and no
// complete snapshots.
#[tokio::test]
async fn back_processing_writes_partials_per_leg() {
    let storage = Arc::new(MemoryStore::new());
    let graph = test_graph();

    let mut pipeline = Pipeline::new(
        PipelineConfig::back_processing(100),
        &graph,
        &test_codes(),
        storage.clone(),
        EventSender::disabled(),
    )
    .unwrap();
    pipeline
        .run(&TestBlocks::new("sf.blocks"), BlockRange::new(200, 450), CancellationToken::new())
        .await
        .unwrap();

    let files = storage.list("states/hash.store_lengths/").await.unwrap();
    assert_eq!(
        files,
        vec![
            "states/hash.store_lengths/200-300.partial",
            "states/hash.store_lengths/300-400.partial",
            "states/hash.store_lengths/400-450.partial",
        ]
    );

    // Self-contained: each partial only accumulates its own leg.
    let partial = storage.read("states/hash.store_lengths/400-450.partial").await.unwrap();
    let kv = tributary_store::snapshot::decode_kv(&partial).unwrap();
    // 50 blocks of "payload-4xx" (11 bytes each).
    assert_eq!(kv.get("total").unwrap(), &(50 * 11).to_string().into_bytes());
}

#[tokio::test]
async fn missing_module_code_is_rejected() {
    let storage = Arc::new(MemoryStore::new());
    let graph = ModuleGraph::new(vec![mapper_descriptor()]).unwrap();

    let err = Pipeline::new(
        PipelineConfig::live(100, vec![]),
        &graph,
        &HashMap::new(),
        storage,
        EventSender::disabled(),
    )
    .unwrap_err();
    assert_matches!(err, PipelineError::MissingModuleCode { module } if module == "map_echo");
}
