use crate::{
    snapshot::{self, StateFile},
    Store, StoreError,
};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;
use tributary_primitives::BlockRange;
use tributary_storage::{retry_transient, RetryPolicy};

/// Read access to a store, the shape consumed by downstream modules bound in
/// `get` mode.
pub trait StoreReader: Send + Sync {
    /// Reads `key` from the current `kv`.
    fn get_at(&self, ord: u64, key: &str) -> Option<Vec<u8>>;
    /// Reads `key` as of the start of the current block.
    fn get_first(&self, key: &str) -> Option<Vec<u8>>;
    /// Reads the final value of `key` after all recorded deltas.
    fn get_last(&self, key: &str) -> Option<Vec<u8>>;
}

/// A cloneable, lock-guarded handle to a [`Store`].
///
/// Executors run strictly sequentially within a block, so the lock is never
/// contended in the pipeline; it exists so the WASM host can hold read
/// handles to upstream stores while the owning executor keeps the write
/// side. Host functions hold the lock only for the duration of one
/// synchronous operation.
#[derive(Clone, Debug)]
pub struct StoreHandle(Arc<RwLock<Store>>);

impl StoreHandle {
    /// Wraps a store in a shared handle.
    pub fn new(store: Store) -> Self {
        Self(Arc::new(RwLock::new(store)))
    }

    /// Acquires shared read access.
    pub fn read(&self) -> RwLockReadGuard<'_, Store> {
        self.0.read()
    }

    /// Acquires exclusive write access.
    pub fn write(&self) -> RwLockWriteGuard<'_, Store> {
        self.0.write()
    }

    // The async persistence paths below never hold the lock across an await:
    // they snapshot what they need under a short lock, then do the I/O.

    /// Writes the complete snapshot `[module_initial_block, end_block)`.
    pub async fn write_snapshot(&self, end_block: u64) -> Result<String, StoreError> {
        let (storage, name, content) = {
            let store = self.read();
            let file = StateFile {
                range: BlockRange::new(store.module_initial_block(), end_block),
                partial: false,
            };
            let name = snapshot::state_file_name(store.module_hash(), &file);
            (store.storage(), name, snapshot::encode_kv(store.kv()))
        };
        retry_transient(RetryPolicy::default(), "write snapshot", || {
            storage.put(&name, content.clone())
        })
        .await?;
        Ok(name)
    }

    /// Writes the partial file covering `range`. Partials are written once
    /// and never mutated: when the object already exists it is left as is.
    pub async fn write_partial(&self, range: BlockRange) -> Result<String, StoreError> {
        let (storage, name, content) = {
            let store = self.read();
            let file = StateFile { range, partial: true };
            let name = snapshot::state_file_name(store.module_hash(), &file);
            (store.storage(), name, snapshot::encode_kv(store.kv()))
        };
        let exists =
            retry_transient(RetryPolicy::default(), "probe partial file", || {
                storage.exists(&name)
            })
            .await?;
        if exists {
            return Ok(name);
        }
        retry_transient(RetryPolicy::default(), "write partial file", || {
            storage.put(&name, content.clone())
        })
        .await?;
        Ok(name)
    }

    /// Replaces the store's `kv` with the contents of `file`.
    pub async fn load(&self, file: &StateFile) -> Result<(), StoreError> {
        let (storage, name) = {
            let store = self.read();
            (store.storage(), snapshot::state_file_name(store.module_hash(), file))
        };
        let content =
            retry_transient(RetryPolicy::default(), "read state file", || storage.read(&name))
                .await?;
        let kv = snapshot::decode_kv(&content)
            .map_err(|reason| StoreError::SnapshotCorrupt { name, reason })?;
        self.write().replace_kv(kv);
        Ok(())
    }
}

impl StoreReader for StoreHandle {
    fn get_at(&self, ord: u64, key: &str) -> Option<Vec<u8>> {
        self.read().get_at(ord, key).cloned()
    }

    fn get_first(&self, key: &str) -> Option<Vec<u8>> {
        self.read().get_first(key)
    }

    fn get_last(&self, key: &str) -> Option<Vec<u8>> {
        self.read().get_last(key).cloned()
    }
}
