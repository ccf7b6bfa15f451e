// src/storage/tests/mod.rs

mod file_tests;
mod redis_tests;

// Common utilities for storage tests
pub(crate) mod common {
    use crate::error::Result;
    use crate::storage::StorageBackend;

    // Test basic storage operations that should work on any backend
    pub async fn test_basic_operations<S: StorageBackend + ?Sized>(storage: &S) -> Result<()> {
        let key = "test_basic_key";
        let value: &[u8] = b"{\"value\":1}";

        assert_eq!(storage.get(key).await?, None);
        assert!(!storage.exists(key).await?);

        storage.set(key, value).await?;
        assert_eq!(storage.get(key).await?.as_deref(), Some(value));
        assert!(storage.exists(key).await?);

        // Overwrite replaces the whole document
        let replacement: &[u8] = b"{\"value\":2}";
        storage.set(key, replacement).await?;
        assert_eq!(storage.get(key).await?.as_deref(), Some(replacement));

        assert!(storage.delete(key).await?);
        assert!(!storage.delete(key).await?);
        assert_eq!(storage.get(key).await?, None);

        Ok(())
    }
}
