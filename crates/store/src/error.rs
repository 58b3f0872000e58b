use tributary_primitives::UpdatePolicy;
use tributary_storage::StorageError;

/// Errors returned by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A write was attempted that the store's update policy does not allow.
    /// This is fatal: it means the module was built against a different
    /// store definition than the one it runs with.
    #[error("store {store}: operation {operation} not allowed under policy {policy}")]
    PolicyViolation {
        /// Store (module) name.
        store: String,
        /// The attempted operation.
        operation: &'static str,
        /// The store's declared policy.
        policy: UpdatePolicy,
    },
    /// A numeric operation was attempted against a store of a different
    /// value type.
    #[error("store {store}: operation {operation} not allowed on value type {value_type}")]
    ValueTypeMismatch {
        /// Store (module) name.
        store: String,
        /// The attempted operation.
        operation: &'static str,
        /// The store's declared value type.
        value_type: &'static str,
    },
    /// An `append` would have grown the value past the per-key cap.
    #[error("store {store}: value for key {key} would reach {size} bytes, cap is {max}")]
    ValueTooLarge {
        /// Store (module) name.
        store: String,
        /// Key being appended to.
        key: String,
        /// Size the value would have reached.
        size: usize,
        /// Configured cap.
        max: usize,
    },
    /// A key exceeded the fixed key-size bound.
    #[error("store {store}: key of {size} bytes exceeds the {max} byte bound")]
    KeyTooLarge {
        /// Store (module) name.
        store: String,
        /// Size of the offending key.
        size: usize,
        /// Fixed bound.
        max: usize,
    },
    /// A stored value could not be parsed under the store's value type. Like
    /// a policy violation this indicates a malformed module.
    #[error("store {store}: invalid {value_type} value for key {key}")]
    InvalidValue {
        /// Store (module) name.
        store: String,
        /// Key whose value failed to parse.
        key: String,
        /// Expected value type.
        value_type: &'static str,
    },
    /// A snapshot or partial file failed to parse. Fatal: the operator must
    /// purge the corrupted object.
    #[error("corrupted snapshot {name}: {reason}")]
    SnapshotCorrupt {
        /// Object name of the snapshot.
        name: String,
        /// Parse failure detail.
        reason: String,
    },
    /// Underlying object-storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
