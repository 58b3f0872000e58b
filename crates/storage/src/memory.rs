use crate::{ObjectStore, StorageError};
use bytes::Bytes;
use parking_lot::RwLock;
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicUsize, Ordering},
};

/// In-memory object store for tests.
///
/// Optionally injects transient failures: `fail_next(n)` makes the next `n`
/// operations return [`StorageError::Transient`], which is how retry and
/// backoff paths are exercised without a real flaky backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, Bytes>>,
    failures: AtomicUsize,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` operations fail with a transient error.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns `true` if the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    fn maybe_fail(&self) -> Result<(), StorageError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 &&
            self.failures
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(StorageError::Transient { message: "injected failure".to_owned() });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, name: &str, content: Bytes) -> Result<(), StorageError> {
        self.maybe_fail()?;
        self.objects.write().insert(name.to_owned(), content);
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Bytes, StorageError> {
        self.maybe_fail()?;
        self.objects
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound { name: name.to_owned() })
    }

    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        self.maybe_fail()?;
        Ok(self.objects.read().contains_key(name))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.maybe_fail()?;
        Ok(self
            .objects
            .read()
            .range(prefix.to_owned()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, _)| name.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = MemoryStore::new();
        store.fail_next(1);

        assert!(store.put("a", Bytes::new()).await.is_err());
        assert!(store.put("a", Bytes::new()).await.is_ok());
    }

    #[tokio::test]
    async fn list_uses_lexicographic_prefix() {
        let store = MemoryStore::new();
        for name in ["states/m/0-10.kv", "states/m/10-20.partial", "states/n/0-10.kv"] {
            store.put(name, Bytes::new()).await.unwrap();
        }
        assert_eq!(
            store.list("states/m/").await.unwrap(),
            vec!["states/m/0-10.kv", "states/m/10-20.partial"]
        );
    }
}
