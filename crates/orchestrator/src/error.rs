use tributary_cache::CacheError;
use tributary_primitives::BlockRange;
use tributary_store::StoreError;

/// Failure of one sub-request.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The worker hit a transient condition (storage timeout, source
    /// hiccup) and the sub-request is worth retrying.
    #[error("transient worker failure: {0}")]
    Transient(String),
    /// The worker failed deterministically; retrying would fail the same
    /// way.
    #[error("worker failure: {0}")]
    Fatal(String),
    /// The worker observed cancellation.
    #[error("worker cancelled")]
    Cancelled,
}

/// A back-processing orchestration error.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Building the work plan failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Listing cache chunks failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// The snapshot chain on storage is inconsistent with the module
    /// declaration.
    #[error("module {module}: complete snapshot ending at {snapshot_end} precedes the module's initial block {initial_block}")]
    SnapshotBeforeInitialBlock {
        /// The offending module.
        module: String,
        /// End block of the bogus snapshot.
        snapshot_end: u64,
        /// The module's declared initial block.
        initial_block: u64,
    },
    /// A sub-request failed after exhausting its retries; the whole request
    /// fails with it.
    #[error("sub-request {range} failed after {attempts} attempts: {source}")]
    SubRequest {
        /// The bucket that failed.
        range: BlockRange,
        /// Attempts made.
        attempts: u32,
        /// Final failure.
        #[source]
        source: WorkerError,
    },
    /// All sub-requests completed but a module never reached the request
    /// start; partials are missing on storage.
    #[error("module {module}: squashed up to {reached}, expected {target}")]
    Incomplete {
        /// The unfinished module.
        module: String,
        /// High-water mark the squasher reached.
        reached: u64,
        /// Expected end of the squash.
        target: u64,
    },
    /// The request was cancelled.
    #[error("back-processing cancelled")]
    Cancelled,
}
