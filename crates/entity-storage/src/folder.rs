use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::{validate_content_id, ContentStorage, StorageResult};

/// Folder-backed content storage.
///
/// Layout: `<root>/<content id>`. Writes go to a temp file in the same
/// folder and are renamed into place, so readers never observe a partial
/// file and an existing id always holds complete content.
#[derive(Debug, Clone)]
pub struct FolderContentStorage {
    root: PathBuf,
}

impl FolderContentStorage {
    /// Create a storage rooted at `root`. Creates the folder if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// The folder holding every stored file.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn content_path(&self, id: &str) -> StorageResult<PathBuf> {
        validate_content_id(id)?;
        Ok(self.root.join(id))
    }
}

#[async_trait]
impl ContentStorage for FolderContentStorage {
    async fn exist(&self, id: &str) -> StorageResult<bool> {
        let path = self.content_path(id)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn store_stream(&self, id: &str, content: Vec<u8>) -> StorageResult<()> {
        let path = self.content_path(id)?;
        let root = self.root.clone();
        let size = content.len();

        tokio::task::spawn_blocking(move || -> StorageResult<()> {
            let mut tmp = NamedTempFile::new_in(&root)?;
            tmp.write_all(&content)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Unavailable(format!("store task failed: {e}")))??;

        debug!(content_id = %id, size, "content stored");
        Ok(())
    }

    async fn retrieve(&self, id: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.content_path(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn delete(&self, ids: &[String]) -> StorageResult<()> {
        for id in ids {
            let path = self.content_path(id)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(content_id = %id, "content deleted"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::Io(e)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_store() -> (tempfile::TempDir, FolderContentStorage) {
        let dir = tempfile::tempdir().unwrap();
        let store = FolderContentStorage::new(dir.path().join("content"))
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn store_then_retrieve() {
        let (_dir, store) = make_store().await;
        store
            .store_stream("bafy-entity", b"{\"type\":\"scene\"}".to_vec())
            .await
            .unwrap();

        assert!(store.exist("bafy-entity").await.unwrap());
        let got = store.retrieve("bafy-entity").await.unwrap();
        assert_eq!(got.as_deref(), Some(&b"{\"type\":\"scene\"}"[..]));
    }

    #[tokio::test]
    async fn missing_content_is_not_an_error() {
        let (_dir, store) = make_store().await;
        assert!(!store.exist("missing").await.unwrap());
        assert!(store.retrieve("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn storing_twice_keeps_single_file() {
        let (_dir, store) = make_store().await;
        store.store_stream("dup", b"same".to_vec()).await.unwrap();
        store.store_stream("dup", b"same".to_vec()).await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(store.root()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn delete_ignores_absent_ids() {
        let (_dir, store) = make_store().await;
        store.store_stream("present", b"x".to_vec()).await.unwrap();

        store
            .delete(&["present".to_string(), "absent".to_string()])
            .await
            .unwrap();
        assert!(!store.exist("present").await.unwrap());
    }

    #[tokio::test]
    async fn path_traversal_is_rejected() {
        let (_dir, store) = make_store().await;
        let err = store
            .store_stream("../escape", b"x".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidContentId { .. }));
    }

    #[tokio::test]
    async fn exist_multiple_reports_each_id() {
        let (_dir, store) = make_store().await;
        store.store_stream("a", b"1".to_vec()).await.unwrap();

        let found = store
            .exist_multiple(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(found.get("a"), Some(&true));
        assert_eq!(found.get("b"), Some(&false));
    }
}
