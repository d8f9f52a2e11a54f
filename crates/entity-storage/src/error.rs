//! Error types for entity-storage

use thiserror::Error;

/// Errors that can occur in the content storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Content id is empty or would escape the storage root
    #[error("invalid content id: {id}")]
    InvalidContentId { id: String },

    /// Content not found
    #[error("content not found: {id}")]
    NotFound { id: String },

    /// Backend is unreachable or misbehaving
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::NotFound {
            id: "bafy123".to_string(),
        };
        assert_eq!(err.to_string(), "content not found: bafy123");

        let err = StorageError::Unavailable("bucket offline".to_string());
        assert!(err.to_string().contains("bucket offline"));
    }
}
