use crate::{
    event::{EventSender, PipelineEvent},
    executor::{BaseExecutor, InputBinding, MapperExecutor, ModuleExecutor, StoreExecutor},
    BlockSource, PipelineError, SourcedBlock,
};
use bytes::Bytes;
use futures_util::StreamExt;
use prost::Message;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tributary_cache::OutputCache;
use tributary_primitives::{
    BlockRange, Clock, Input, ModuleGraph, ModuleKind, StoreMode,
};
use tributary_store::{Snapshots, Store, StoreConfig, StoreHandle, DEFAULT_MAX_APPEND_SIZE};
use tributary_storage::SharedStore;
use tributary_wasm::{WasmModule, WasmRuntime};

/// The reserved source name under which the encoded block clock is bound.
pub const CLOCK_INPUT: &str = "clock";

/// Whether a pipeline streams to subscribers or produces partials for the
/// orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    /// Stream outputs, write complete snapshots at save boundaries.
    Live,
    /// Write partial store files per processed leg, stream nothing.
    BackProcessing,
}

/// Static pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Blocks per snapshot and cache chunk.
    pub save_interval: u64,
    /// Per-key cap on `append` store values.
    pub max_append_size: usize,
    /// Live or back-processing.
    pub mode: PipelineMode,
    /// Modules whose outputs are streamed to subscribers.
    pub outputs: Vec<String>,
}

impl PipelineConfig {
    /// A live configuration with default limits.
    pub fn live(save_interval: u64, outputs: Vec<String>) -> Self {
        Self {
            save_interval,
            max_append_size: DEFAULT_MAX_APPEND_SIZE,
            mode: PipelineMode::Live,
            outputs,
        }
    }

    /// A back-processing configuration with default limits.
    pub fn back_processing(save_interval: u64) -> Self {
        Self {
            save_interval,
            max_append_size: DEFAULT_MAX_APPEND_SIZE,
            mode: PipelineMode::BackProcessing,
            outputs: Vec::new(),
        }
    }
}

/// Block-level orchestration across all module executors.
///
/// The pipeline advances block by block, runs every executor in topological
/// order, threads mapper outputs through the per-block `values` map, and
/// seals snapshots and cache chunks at save-interval boundaries. Execution
/// within a block is strictly sequential; delta ordering and cache coherence
/// rely on it.
pub struct Pipeline {
    config: PipelineConfig,
    executors: Vec<ModuleExecutor>,
    stores: Vec<StoreHandle>,
    /// Per store, whether its image is rooted at the module's initial block
    /// (started there, or rehydrated from a snapshot reaching the range
    /// start). Only rooted stores may write complete snapshots.
    rooted: Vec<bool>,
    values: HashMap<String, Bytes>,
    runtime: WasmRuntime,
    events: EventSender,
    storage: SharedStore,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("modules", &self.executors.len())
            .field("stores", &self.stores.len())
            .field("mode", &self.config.mode)
            .finish()
    }
}

impl Pipeline {
    /// Builds executors for every module of the graph, compiling the WASM
    /// binaries provided in `codes` (module name → code).
    pub fn new(
        config: PipelineConfig,
        graph: &ModuleGraph,
        codes: &HashMap<String, Vec<u8>>,
        storage: SharedStore,
        events: EventSender,
    ) -> Result<Self, PipelineError> {
        let runtime = WasmRuntime::new()?;

        let mut executors = Vec::new();
        let mut stores = Vec::new();
        let mut handles: HashMap<String, StoreHandle> = HashMap::new();

        for desc in graph.modules() {
            let code = codes.get(&desc.name).ok_or_else(|| PipelineError::MissingModuleCode {
                module: desc.name.clone(),
            })?;
            let wasm_module =
                WasmModule::compile(&runtime, desc.name.clone(), desc.entrypoint.clone(), code)?;
            let cache = OutputCache::new(
                desc.name.clone(),
                desc.hash.clone(),
                config.save_interval,
                storage.clone(),
            );

            let mut inputs = Vec::with_capacity(desc.inputs.len());
            for input in &desc.inputs {
                inputs.push(match input {
                    Input::Source { name } => InputBinding::Value { name: name.clone() },
                    Input::Map { module } => InputBinding::Value { name: module.clone() },
                    Input::Store { module, mode } => {
                        let handle = handles
                            .get(module)
                            .cloned()
                            .expect("graph validation orders stores before their readers");
                        match mode {
                            StoreMode::Get => InputBinding::StoreGet { handle },
                            StoreMode::Deltas => InputBinding::StoreDeltas { handle },
                        }
                    }
                });
            }

            let base = BaseExecutor::new(
                desc.name.clone(),
                desc.initial_block,
                wasm_module,
                inputs,
                cache,
                config.outputs.contains(&desc.name),
            );

            let executor = match desc.kind {
                ModuleKind::Map => ModuleExecutor::Mapper(MapperExecutor::new(base)),
                ModuleKind::Store => {
                    let (update_policy, value_type) =
                        match (desc.update_policy, desc.value_type) {
                            (Some(policy), Some(value_type)) => (policy, value_type),
                            _ => {
                                return Err(PipelineError::InvalidModule {
                                    module: desc.name.clone(),
                                    reason: "store module without update policy or value type"
                                        .to_owned(),
                                })
                            }
                        };
                    let mut store_config = StoreConfig::new(
                        desc.name.clone(),
                        desc.hash.clone(),
                        desc.initial_block,
                        config.save_interval,
                        update_policy,
                        value_type,
                    );
                    store_config.max_append_size = config.max_append_size;
                    let handle = StoreHandle::new(Store::new(store_config, storage.clone()));
                    handles.insert(desc.name.clone(), handle.clone());
                    stores.push(handle.clone());
                    ModuleExecutor::Store(StoreExecutor::new(base, handle))
                }
            };
            executors.push(executor);
        }

        let rooted = vec![false; stores.len()];
        Ok(Self {
            config,
            executors,
            stores,
            rooted,
            values: HashMap::new(),
            runtime,
            events,
            storage,
        })
    }

    /// The store handles owned by this pipeline, in execution order.
    pub fn stores(&self) -> &[StoreHandle] {
        &self.stores
    }

    /// Runs the pipeline over `range`, pulling blocks from `source` leg by
    /// leg. Cancellation aborts in-flight WASM execution within bounded
    /// time, discards the current block's work, and leaves every previously
    /// sealed snapshot and chunk intact.
    pub async fn run(
        &mut self,
        source: &dyn BlockSource,
        range: BlockRange,
        cancel: CancellationToken,
    ) -> Result<(), PipelineError> {
        self.initialize_stores(range).await?;
        info!(target: "pipeline", %range, mode = ?self.config.mode, "starting pipeline");

        let mut block = range.start_block;
        while block < range.exclusive_end_block {
            if cancel.is_cancelled() {
                self.runtime.interrupt();
                return Err(PipelineError::Cancelled);
            }

            let boundary = block - block % self.config.save_interval + self.config.save_interval;
            let leg = BlockRange::new(block, boundary.min(range.exclusive_end_block));

            for executor in &mut self.executors {
                executor.position(block).await?;
            }

            if self.executors.iter().all(|e| e.covers(block)) {
                // Redesigned `OptimizeExecutors`: every executor finds this
                // leg in its cache, so the source fetch is skipped and
                // outputs replay from storage.
                debug!(target: "pipeline", %leg, "all module outputs cached, skipping source fetch");
                for number in leg.start_block..leg.exclusive_end_block {
                    if cancel.is_cancelled() {
                        self.runtime.interrupt();
                        return Err(PipelineError::Cancelled);
                    }
                    self.process_block(SourcedBlock {
                        clock: Clock::with_number(number),
                        ..Default::default()
                    })
                    .await?;
                }
            } else {
                self.stream_leg(source, leg, &cancel).await?;
            }

            self.flush_leg(leg, boundary).await?;
            block = leg.exclusive_end_block;
        }

        info!(target: "pipeline", %range, "pipeline finished");
        Ok(())
    }

    async fn stream_leg(
        &mut self,
        source: &dyn BlockSource,
        leg: BlockRange,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let mut stream = source.blocks(leg).await?;
        let mut expected = leg.start_block;
        while expected < leg.exclusive_end_block {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.runtime.interrupt();
                    return Err(PipelineError::Cancelled);
                }
                item = stream.next() => item,
            };
            let block = match item {
                None => {
                    return Err(PipelineError::SourceExhausted {
                        stopped_at: expected,
                        expected_end: leg.exclusive_end_block,
                    })
                }
                Some(block) => block?,
            };
            if block.clock.number != expected {
                return Err(PipelineError::SourceGap { expected, got: block.clock.number });
            }
            self.process_block(block).await?;
            expected += 1;
        }
        Ok(())
    }

    /// Runs every executor for one block and streams the results.
    async fn process_block(&mut self, block: SourcedBlock) -> Result<(), PipelineError> {
        let SourcedBlock { clock, cursor, payloads } = block;

        self.values.clear();
        for (name, bytes) in payloads {
            self.values.insert(name, bytes);
        }
        self.values.insert(
            CLOCK_INPUT.to_owned(),
            Bytes::from(tributary_pb::v1::Clock::from(&clock).encode_to_vec()),
        );

        for executor in &mut self.executors {
            executor.run(&mut self.values, &clock, &cursor)?;
        }

        if self.config.mode == PipelineMode::Live {
            let outputs: Vec<_> =
                self.executors.iter().filter_map(|e| e.module_output()).collect();
            self.events
                .send(PipelineEvent::BlockProcessed { clock: clock.clone(), cursor, outputs })
                .await;
        }

        // Ordinals are scoped to one block: the journal has been cached and
        // streamed, drop it before the next block.
        for store in &self.stores {
            store.write().clear_deltas();
        }

        metrics::counter!("tributary_pipeline_blocks_total").increment(1);
        metrics::gauge!("tributary_pipeline_head_block").set(clock.number as f64);
        Ok(())
    }

    /// Seals what the finished leg produced: store partials in
    /// back-processing, complete snapshots on full boundaries in live mode,
    /// and the cache chunks once their range is exhausted.
    async fn flush_leg(&mut self, leg: BlockRange, boundary: u64) -> Result<(), PipelineError> {
        let on_boundary = leg.exclusive_end_block == boundary;

        match self.config.mode {
            PipelineMode::Live => {
                if !on_boundary {
                    return Ok(());
                }
                for (store, rooted) in self.stores.iter().zip(&self.rooted) {
                    if !rooted || store.read().module_initial_block() >= boundary {
                        continue;
                    }
                    let name = store.write_snapshot(boundary).await?;
                    debug!(target: "pipeline", file = %name, "wrote complete snapshot");
                }
            }
            PipelineMode::BackProcessing => {
                for store in &self.stores {
                    let initial_block = store.read().module_initial_block();
                    if initial_block >= leg.exclusive_end_block {
                        continue;
                    }
                    let partial =
                        BlockRange::new(leg.start_block.max(initial_block), leg.exclusive_end_block);
                    let name = store.write_partial(partial).await?;
                    debug!(target: "pipeline", file = %name, "wrote partial store file");
                    // Each partial is self-contained: the next leg starts
                    // from an empty image and the squasher merges.
                    store.write().replace_kv(HashMap::new());
                }
            }
        }

        if on_boundary {
            for executor in &mut self.executors {
                executor.save_cache(boundary).await?;
            }
            self.events.send(PipelineEvent::IntervalSaved { boundary }).await;
            metrics::counter!("tributary_pipeline_intervals_sealed_total").increment(1);
        }
        Ok(())
    }

    /// Rehydrates stores from the latest usable complete snapshots. Only
    /// live pipelines start from snapshots; back-processing workers build
    /// self-contained partials from empty images.
    async fn initialize_stores(&mut self, range: BlockRange) -> Result<(), PipelineError> {
        if self.config.mode != PipelineMode::Live {
            return Ok(());
        }
        for (store, rooted) in self.stores.iter().zip(self.rooted.iter_mut()) {
            let (name, hash, initial_block) = {
                let store = store.read();
                (
                    store.name().to_owned(),
                    store.module_hash().clone(),
                    store.module_initial_block(),
                )
            };
            if range.start_block <= initial_block {
                *rooted = true;
                continue;
            }

            let snapshots = Snapshots::gather(self.storage.as_ref(), &hash).await?;
            match snapshots.last_complete_snapshot_before(range.start_block) {
                Some(snapshot) => {
                    store
                        .load(&tributary_store::StateFile { range: snapshot, partial: false })
                        .await?;
                    // A snapshot ending short of the range start leaves a
                    // hole the orchestrator has not filled yet; the store
                    // runs but must not claim complete snapshots.
                    *rooted = snapshot.exclusive_end_block == range.start_block;
                    info!(
                        target: "pipeline",
                        store = %name,
                        %snapshot,
                        rooted = *rooted,
                        "initialized store from snapshot"
                    );
                }
                None => {
                    *rooted = false;
                    warn!(
                        target: "pipeline",
                        store = %name,
                        start = range.start_block,
                        "no usable snapshot; store starts empty mid-range"
                    );
                }
            }
        }
        Ok(())
    }
}
