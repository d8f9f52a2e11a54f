//! In-memory fakes for storage traits (testing only)
//!
//! `MemoryContentStorage` satisfies the `ContentStorage` contract without
//! touching the filesystem and can be told to fail existence checks or
//! writes to exercise infrastructure-fault paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

/// In-memory content storage backed by a `HashMap<id, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryContentStorage {
    store: Mutex<HashMap<String, Vec<u8>>>,
    exist_failure: Mutex<Option<String>>,
    store_failure: Mutex<Option<String>>,
    exist_calls: AtomicUsize,
    store_calls: AtomicUsize,
}

impl MemoryContentStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate content under `id`.
    pub fn with_content(self, id: &str, content: &[u8]) -> Self {
        self.store
            .lock()
            .unwrap()
            .insert(id.to_string(), content.to_vec());
        self
    }

    /// Make every `exist` call fail with `StorageError::Unavailable`.
    pub fn fail_exist_with(&self, reason: &str) {
        *self.exist_failure.lock().unwrap() = Some(reason.to_string());
    }

    /// Make every `store_stream` call fail with `StorageError::Unavailable`.
    pub fn fail_store_with(&self, reason: &str) {
        *self.store_failure.lock().unwrap() = Some(reason.to_string());
    }

    /// Number of `exist` calls observed.
    pub fn exist_calls(&self) -> usize {
        self.exist_calls.load(Ordering::SeqCst)
    }

    /// Number of successful and failed `store_stream` calls observed.
    pub fn store_calls(&self) -> usize {
        self.store_calls.load(Ordering::SeqCst)
    }

    /// Ids currently stored, sorted.
    pub fn stored_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.store.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl ContentStorage for MemoryContentStorage {
    async fn exist(&self, id: &str) -> StorageResult<bool> {
        self.exist_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.exist_failure.lock().unwrap().clone() {
            return Err(StorageError::Unavailable(reason));
        }
        Ok(self.store.lock().unwrap().contains_key(id))
    }

    async fn store_stream(&self, id: &str, content: Vec<u8>) -> StorageResult<()> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        validate_content_id(id)?;
        if let Some(reason) = self.store_failure.lock().unwrap().clone() {
            return Err(StorageError::Unavailable(reason));
        }
        self.store.lock().unwrap().insert(id.to_string(), content);
        Ok(())
    }

    async fn retrieve(&self, id: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.store.lock().unwrap().get(id).cloned())
    }

    async fn delete(&self, ids: &[String]) -> StorageResult<()> {
        let mut store = self.store.lock().unwrap();
        for id in ids {
            store.remove(id);
        }
        Ok(())
    }
}
