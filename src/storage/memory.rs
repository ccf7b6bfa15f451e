// src/storage/memory.rs

// In-memory storage (for testing and ephemeral sessions)
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{GuardError, Result, StorageError};
use crate::storage::StorageBackend;

/// In-memory storage backend implementation.
///
/// An optional byte quota models a size-limited store: a write that would
/// push the total size past the quota is rejected.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    quota_bytes: Option<usize>,
}

impl MemoryStorage {
    /// Creates an unbounded in-memory storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an in-memory storage that holds at most `quota_bytes` of values
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            data: Arc::default(),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Total bytes currently stored
    pub fn used_bytes(&self) -> usize {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(quota) = self.quota_bytes {
            let others: usize = data
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len())
                .sum();
            if others + value.len() > quota {
                return Err(GuardError::Storage(StorageError::CapacityExceeded(format!(
                    "writing {} bytes to '{}' exceeds quota of {} bytes",
                    value.len(),
                    key,
                    quota
                ))));
            }
        }

        data.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        Ok(data.remove(key).is_some())
    }
}
