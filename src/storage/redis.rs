// src/storage/redis.rs

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::config::RedisConfig;
use crate::error::{GuardError, Result, StorageError};
use crate::storage::StorageBackend;
use crate::storage_op;

/// Redis-backed storage for deployments that share the offline dataset
pub struct RedisStorage {
    client: Client,
    connection: Arc<tokio::sync::Mutex<ConnectionManager>>,
    config: RedisConfig,
}

// Manually implement Debug
impl fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStorage")
            .field("url", &self.config.url)
            .field("key_prefix", &self.config.key_prefix)
            .finish()
    }
}

// Manually implement Clone
impl Clone for RedisStorage {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            connection: Arc::clone(&self.connection),
            config: self.config.clone(),
        }
    }
}

fn command_error(e: redis::RedisError) -> GuardError {
    GuardError::Storage(StorageError::RedisCommand(e.to_string()))
}

impl RedisStorage {
    /// Creates a new Redis storage with the given configuration
    pub async fn new(config: RedisConfig) -> Result<Self> {
        // Open the client - this doesn't actually connect to Redis yet
        let client = Client::open(config.url.as_str())
            .map_err(|e| GuardError::Storage(StorageError::RedisConnection(e.to_string())))?;

        let connection_future = ConnectionManager::new(client.clone());

        let connection_manager =
            match tokio::time::timeout(config.connection_timeout, connection_future).await {
                Ok(result) => result.map_err(GuardError::from)?,
                Err(_) => {
                    return Err(GuardError::Storage(StorageError::RedisConnection(format!(
                        "Connection to Redis at {} timed out after {:?}",
                        config.url, config.connection_timeout
                    ))));
                }
            };

        Ok(Self {
            client,
            connection: Arc::new(tokio::sync::Mutex::new(connection_manager)),
            config,
        })
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }

    /// Ping Redis to check health with timeout
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.lock().await;

        let ping_future = redis::AsyncCommands::ping::<String>(&mut *conn);

        let result = match tokio::time::timeout(self.config.connection_timeout, ping_future).await {
            Ok(inner_result) => inner_result.map_err(command_error)?,
            Err(_) => {
                return Err(GuardError::Storage(StorageError::RedisCommand(format!(
                    "Redis PING operation timed out after {:?}",
                    self.config.connection_timeout
                ))));
            }
        };

        if result == "PONG" {
            Ok(())
        } else {
            Err(GuardError::Storage(StorageError::RedisCommand(format!(
                "Unexpected response from Redis PING: {}",
                result
            ))))
        }
    }
}

#[async_trait]
impl StorageBackend for RedisStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection.lock().await;
        let result: Option<Vec<u8>> = conn.get(self.prefixed(key)).await.map_err(command_error)?;
        Ok(result)
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let start = Instant::now();
        let mut conn = self.connection.lock().await;
        let result: Result<()> = conn
            .set(self.prefixed(key), value)
            .await
            .map_err(command_error);
        storage_op!("set", key, result, start.elapsed().as_millis() as u64);
        result
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.lock().await;
        let result: bool = conn.exists(self.prefixed(key)).await.map_err(command_error)?;
        Ok(result)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.lock().await;
        let result: i64 = conn.del(self.prefixed(key)).await.map_err(command_error)?;
        Ok(result > 0)
    }
}
