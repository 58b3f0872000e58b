//! Flat-namespace object storage used by the tributary engine.
//!
//! Snapshots, partial store files and output-cache chunks all live in a flat
//! object namespace addressed by `/`-separated names. The engine only needs
//! three primitives from a backend: atomic `put`, `read` and
//! `list`-by-prefix. Backends for remote blob stores plug in behind
//! [`ObjectStore`]; this crate ships the local filesystem implementation and
//! an in-memory one for tests.

mod error;
mod localfs;
mod memory;
mod retry;

pub use error::StorageError;
pub use localfs::LocalStore;
pub use memory::MemoryStore;
pub use retry::{retry_transient, RetryPolicy};

use bytes::Bytes;
use std::{fmt, sync::Arc};

/// A shared handle to an object store. Handles are cheap to clone and safe
/// to use from concurrent workers.
pub type SharedStore = Arc<dyn ObjectStore>;

/// A flat namespace of immutable objects.
///
/// Writes are atomic: a concurrent reader observes either the whole object
/// or [`StorageError::NotFound`], never a torn write. Objects are written
/// once and never mutated.
#[async_trait::async_trait]
pub trait ObjectStore: fmt::Debug + Send + Sync {
    /// Atomically writes `content` under `name`, replacing any previous
    /// object of that name.
    async fn put(&self, name: &str, content: Bytes) -> Result<(), StorageError>;

    /// Reads the object stored under `name`.
    async fn read(&self, name: &str) -> Result<Bytes, StorageError>;

    /// Returns `true` if an object exists under `name`.
    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        match self.read(name).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Lists all object names starting with `prefix`, in lexicographic
    /// order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}
