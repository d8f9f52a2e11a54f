//! Storage trait definitions
//!
//! Content is keyed by its content-addressed id (an entity id or a file
//! hash). Writing the same id twice with the same bytes is harmless, so
//! implementations need no external locking for distinct or repeated keys.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Reject ids that are empty or could be interpreted as a path.
pub fn validate_content_id(id: &str) -> StorageResult<()> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0']);
    if bad {
        return Err(StorageError::InvalidContentId { id: id.to_string() });
    }
    Ok(())
}

/// Content-addressed storage backend.
///
/// Guarantees:
/// - `exist(id)` returns `Ok(false)` for absent content; errors are reserved
///   for infrastructure faults.
/// - `retrieve(id)` returns the exact bytes last stored under `id`.
/// - `delete` of an absent id is a no-op.
#[async_trait]
pub trait ContentStorage: Send + Sync {
    /// Check whether content is stored under `id`.
    async fn exist(&self, id: &str) -> StorageResult<bool>;

    /// Store bytes under `id`, replacing any previous content.
    async fn store_stream(&self, id: &str, content: Vec<u8>) -> StorageResult<()>;

    /// Retrieve bytes by id, `None` if absent.
    async fn retrieve(&self, id: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Delete every listed id. Absent ids are ignored.
    async fn delete(&self, ids: &[String]) -> StorageResult<()>;

    /// Check several ids at once.
    async fn exist_multiple(&self, ids: &[String]) -> StorageResult<HashMap<String, bool>> {
        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            found.insert(id.clone(), self.exist(id).await?);
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_content_hashes() {
        assert!(validate_content_id("bafybeihdwdcefgh4dqkjv67uzcmw7ojee6xedzdetojuzjevtenxquvyku").is_ok());
        assert!(validate_content_id("QmUsqJaHc5HQaBrojhBdjF4fr5MQc6CqhwZjqwhVRftNAo").is_ok());
    }

    #[test]
    fn rejects_path_like_ids() {
        for id in ["", ".", "..", "a/b", "..\\x", "nul\0byte"] {
            assert!(
                matches!(
                    validate_content_id(id),
                    Err(StorageError::InvalidContentId { .. })
                ),
                "{id:?} should be rejected"
            );
        }
    }
}
