use crate::{ObjectStore, StorageError};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Object store rooted at a local directory.
///
/// Object names map to paths below the root; `put` stages the content in a
/// dot-prefixed temporary file and renames it into place, which is atomic on
/// POSIX filesystems, so readers never observe partially written objects.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Creates a store rooted at `root`. The directory is created on first
    /// write, not here.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> Result<PathBuf, StorageError> {
        // Reject traversal early: names are flat identifiers, not paths.
        if name.split('/').any(|seg| seg == ".." || seg.is_empty()) {
            return Err(StorageError::Permanent {
                message: format!("invalid object name: {name:?}"),
            });
        }
        Ok(self.root.join(name))
    }
}

#[async_trait::async_trait]
impl ObjectStore for LocalStore {
    async fn put(&self, name: &str, content: Bytes) -> Result<(), StorageError> {
        let path = self.path_of(name)?;
        let parent = path.parent().expect("object path always has a parent");
        tokio::fs::create_dir_all(parent).await?;

        let file_name = path.file_name().expect("object path always has a file name");
        let tmp = parent.join(format!(".{}.tmp", file_name.to_string_lossy()));
        tokio::fs::write(&tmp, &content).await?;
        tokio::fs::rename(&tmp, &path).await?;

        trace!(target: "storage", name, bytes = content.len(), "wrote object");
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Bytes, StorageError> {
        let path = self.path_of(name)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound { name: name.to_owned() })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(tokio::fs::try_exists(self.path_of(name)?).await?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut out = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let name = path
                    .strip_prefix(&self.root)
                    .expect("entry lives under the root")
                    .to_string_lossy()
                    .replace(std::path::MAIN_SEPARATOR, "/");
                // Skip staged temporaries.
                if name.rsplit('/').next().is_some_and(|f| f.starts_with('.')) {
                    continue;
                }
                if name.starts_with(prefix) {
                    out.push(name);
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        store.put("states/abc/0-1000.kv", Bytes::from_static(b"hello")).await.unwrap();
        let read = store.read("states/abc/0-1000.kv").await.unwrap();
        assert_eq!(read, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn read_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        let err = store.read("nope").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        for name in ["outputs/m1/100-200.output", "outputs/m1/0-100.output", "states/m1/0-100.kv"] {
            store.put(name, Bytes::from_static(b"x")).await.unwrap();
        }

        let listed = store.list("outputs/m1/").await.unwrap();
        assert_eq!(listed, vec!["outputs/m1/0-100.output", "outputs/m1/100-200.output"]);
    }

    #[tokio::test]
    async fn traversal_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        let err = store.put("../escape", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, StorageError::Permanent { .. }));
    }
}
