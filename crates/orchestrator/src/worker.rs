use crate::WorkerError;
use std::{collections::HashMap, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tributary_pipeline::{
    BlockSource, EventSender, Pipeline, PipelineConfig, PipelineError, SourceError,
};
use tributary_primitives::{BlockRange, ModuleGraph};
use tributary_storage::{SharedStore, StorageError};

/// A back-processing worker: computes every module of the graph over one
/// sub-request bucket, leaving partial store files and sealed cache chunks
/// on shared storage.
///
/// Workers share nothing mutable. Remote deployments implement this trait
/// over their transport; [`LocalWorker`] runs the pipeline in-process.
#[async_trait::async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Processes one bucket.
    async fn process(&self, range: BlockRange, cancel: CancellationToken)
        -> Result<(), WorkerError>;
}

/// In-process worker: each call builds a fresh back-processing pipeline
/// with its own stores, caches and WASM instances.
pub struct LocalWorker {
    graph: ModuleGraph,
    codes: HashMap<String, Vec<u8>>,
    storage: SharedStore,
    source: Arc<dyn BlockSource>,
    save_interval: u64,
}

impl std::fmt::Debug for LocalWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWorker").field("save_interval", &self.save_interval).finish()
    }
}

impl LocalWorker {
    /// Creates a worker factory over the shared inputs.
    pub fn new(
        graph: ModuleGraph,
        codes: HashMap<String, Vec<u8>>,
        storage: SharedStore,
        source: Arc<dyn BlockSource>,
        save_interval: u64,
    ) -> Self {
        Self { graph, codes, storage, source, save_interval }
    }
}

#[async_trait::async_trait]
impl Worker for LocalWorker {
    async fn process(
        &self,
        range: BlockRange,
        cancel: CancellationToken,
    ) -> Result<(), WorkerError> {
        debug!(target: "orchestrator::worker", %range, "processing sub-request");
        let mut pipeline = Pipeline::new(
            PipelineConfig::back_processing(self.save_interval),
            &self.graph,
            &self.codes,
            self.storage.clone(),
            EventSender::disabled(),
        )
        .map_err(|err| WorkerError::Fatal(err.to_string()))?;

        pipeline.run(self.source.as_ref(), range, cancel).await.map_err(classify)
    }
}

/// Maps a pipeline failure onto the retry policy: storage and source
/// availability hiccups are worth another attempt, everything else is
/// deterministic. A malformed block is deterministic: the source will
/// deliver the same bytes on every retry.
fn classify(err: PipelineError) -> WorkerError {
    match &err {
        PipelineError::Cancelled => WorkerError::Cancelled,
        PipelineError::Source(SourceError::Unavailable(_)) => {
            WorkerError::Transient(err.to_string())
        }
        PipelineError::Source(SourceError::InvalidBlock(_)) => {
            WorkerError::Fatal(err.to_string())
        }
        PipelineError::Store(store_err) => match storage_of_store(store_err) {
            Some(storage) if storage.is_transient() => WorkerError::Transient(err.to_string()),
            _ => WorkerError::Fatal(err.to_string()),
        },
        PipelineError::Cache(tributary_cache::CacheError::Storage(storage))
            if storage.is_transient() =>
        {
            WorkerError::Transient(err.to_string())
        }
        _ => WorkerError::Fatal(err.to_string()),
    }
}

fn storage_of_store(err: &tributary_store::StoreError) -> Option<&StorageError> {
    match err {
        tributary_store::StoreError::Storage(storage) => Some(storage),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_unavailability_is_transient() {
        let err =
            classify(PipelineError::Source(SourceError::Unavailable("timeout".to_owned())));
        assert!(matches!(err, WorkerError::Transient(_)));
    }

    #[test]
    fn malformed_blocks_are_fatal() {
        let err =
            classify(PipelineError::Source(SourceError::InvalidBlock("bad header".to_owned())));
        assert!(matches!(err, WorkerError::Fatal(_)));
    }

    #[test]
    fn transient_storage_failures_are_transient() {
        let err = classify(PipelineError::Store(tributary_store::StoreError::Storage(
            StorageError::Transient { message: "503".to_owned() },
        )));
        assert!(matches!(err, WorkerError::Transient(_)));
    }

    #[test]
    fn cancellation_passes_through() {
        assert!(matches!(classify(PipelineError::Cancelled), WorkerError::Cancelled));
    }
}
