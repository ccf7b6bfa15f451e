// src/fallback/tests/mod.rs
//! Tests for the offline fallback store


pub(crate) mod utils {
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::config::FallbackConfig;
    use crate::error::{GuardError, Result, StorageError};
    use crate::fallback::FallbackStore;
    use crate::storage::{MemoryStorage, StorageBackend};

    /// Storage wrapper that can be told to reject writes
    #[derive(Debug, Default)]
    pub struct FlakyStorage {
        pub inner: MemoryStorage,
        pub fail_writes: AtomicBool,
        pub writes: AtomicUsize,
    }

    impl FlakyStorage {
        pub fn set_fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        pub fn write_count(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StorageBackend for FlakyStorage {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(GuardError::Storage(StorageError::CapacityExceeded(
                    "Simulated quota exceeded".to_string(),
                )));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set(key, value).await
        }

        async fn exists(&self, key: &str) -> Result<bool> {
            self.inner.exists(key).await
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            self.inner.delete(key).await
        }
    }

    pub async fn create_store() -> (FallbackStore, Arc<FlakyStorage>) {
        let storage = Arc::new(FlakyStorage::default());
        let store = FallbackStore::load(storage.clone(), FallbackConfig::default())
            .await
            .unwrap();
        (store, storage)
    }

    pub fn fields(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("expected a JSON object, got {}", other),
        }
    }
}
