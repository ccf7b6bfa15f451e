// src/storage/mod.rs

pub mod file;
pub mod memory;
pub mod redis;

#[cfg(test)]
mod tests;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use redis::RedisStorage;

use super::error::Result;
use crate::config::StorageConfig;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// Durable key/value store the offline dataset is persisted through
#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    // Retrieves a value by key
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    // Stores a value with a key, replacing any previous value
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    // Checks if a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    // Deletes a key
    async fn delete(&self, key: &str) -> Result<bool>;
}

/// Opens the backend selected by configuration
pub async fn open(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match config {
        StorageConfig::Memory => Arc::new(MemoryStorage::new()),
        StorageConfig::File { directory } => Arc::new(FileStorage::new(directory.clone()).await?),
        StorageConfig::Redis(redis_config) => {
            Arc::new(RedisStorage::new(redis_config.clone()).await?)
        }
    };
    Ok(backend)
}
