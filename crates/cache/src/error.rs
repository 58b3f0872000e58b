use tributary_storage::StorageError;

/// Errors returned by the output cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A sealed chunk failed to parse. Fatal: the operator must purge the
    /// corrupted object.
    #[error("corrupted output chunk {name}: {reason}")]
    ChunkCorrupt {
        /// Object name of the chunk.
        name: String,
        /// Parse failure detail.
        reason: String,
    },
    /// Underlying object-storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
