/// Errors returned by object-store backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The named object does not exist.
    #[error("object not found: {name}")]
    NotFound {
        /// Name of the missing object.
        name: String,
    },
    /// The backend failed in a way that is worth retrying: timeouts,
    /// connection resets, 5xx-class responses.
    #[error("transient storage error: {message}")]
    Transient {
        /// Backend-specific description.
        message: String,
    },
    /// The backend rejected the request permanently: auth failures,
    /// malformed names, 4xx-class responses.
    #[error("permanent storage error: {message}")]
    Permanent {
        /// Backend-specific description.
        message: String,
    },
    /// Local filesystem failure.
    #[error("storage i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Returns `true` for failures that a retry with backoff may resolve.
    ///
    /// `NotFound` is not retryable: callers that poll for an object to
    /// appear do so explicitly.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Io(_))
    }
}
