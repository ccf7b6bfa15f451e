#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::config::RedisConfig;
    use crate::storage::{RedisStorage, StorageBackend};

    use super::super::common;

    // These tests need a Redis server on localhost:6379
    fn redis_config() -> RedisConfig {
        RedisConfig {
            url: "redis://localhost:6379".to_string(),
            key_prefix: format!("service_guard_test_{}", uuid::Uuid::new_v4()),
            connection_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_basic_redis_operations() {
        let storage = RedisStorage::new(redis_config()).await.unwrap();
        common::test_basic_operations(&storage).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_redis_ping() {
        let storage = RedisStorage::new(redis_config()).await.unwrap();
        storage.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_redis_fails_within_timeout() {
        let config = RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
            key_prefix: "unused".to_string(),
            connection_timeout: Duration::from_millis(200),
        };

        let started = std::time::Instant::now();
        assert!(RedisStorage::new(config).await.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
