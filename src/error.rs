// for error definitions
use redis;
use std::time::Duration;
use thiserror::Error;

use chrono::{DateTime, Utc};

#[derive(Error, Debug, Clone)]
pub enum GuardError {
    /// Returned when a circuit is open and its recovery window has not elapsed
    #[error("Circuit breaker is OPEN for {service}{}", next_attempt_suffix(.next_attempt))]
    CallDenied {
        service: String,
        next_attempt: Option<DateTime<Utc>>,
    },

    /// The wrapped operation returned an error
    #[error("Operation failed: {0}")]
    OperationFailure(String),

    /// The wrapped operation did not settle within the call timeout
    #[error("Service call timeout after {0:?}")]
    TimeoutFailure(Duration),

    /// A health probe failed or timed out
    #[error("Health probe failed: {0}")]
    ProbeFailure(String),

    /// The durable local dataset could not be written
    #[error("Persistence failure: {0}")]
    PersistenceFailure(StorageError),

    /// Offline authentication was rejected
    #[error("Offline authentication failed: {0}")]
    AuthFailure(AuthFailureReason),

    /// A referenced record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to the storage backend
    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// Unexpected or internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

fn next_attempt_suffix(next_attempt: &Option<DateTime<Utc>>) -> String {
    match next_attempt {
        Some(at) => format!(". Next attempt at {}", at.to_rfc3339()),
        None => String::new(),
    }
}

impl GuardError {
    /// True for the breaker's own short-circuit, as opposed to a failed attempt
    pub fn is_call_denied(&self) -> bool {
        matches!(self, GuardError::CallDenied { .. })
    }
}

/// Why an offline login was refused
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailureReason {
    #[error("user not found")]
    NotFound,

    #[error("invalid secret")]
    InvalidSecret,
}

/// Storage-specific errors
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    /// Redis connection errors
    #[error("Redis connection error: {0}")]
    RedisConnection(String),

    // Redis authentication errors
    #[error("Redis authentication error: {0}")]
    RedisAuth(String),

    /// Redis command errors
    #[error("Redis command error: {0}")]
    RedisCommand(String),

    /// Filesystem errors from the file backend
    #[error("I/O error: {0}")]
    Io(String),

    /// Data serialization/deserialization errors
    #[error("Data serialization error: {0}")]
    Serialization(String),

    /// A bounded store refused a new key
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Key not found in storage
    #[error("Key not found: {0}")]
    KeyNotFound(String),
}

// Implement conversions from redis::RedisError to StorageError
impl From<redis::RedisError> for GuardError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::AuthenticationFailed => {
                GuardError::Storage(StorageError::RedisAuth(err.to_string()))
            }
            redis::ErrorKind::IoError | redis::ErrorKind::ClientError => {
                GuardError::Storage(StorageError::RedisConnection(err.to_string()))
            }
            _ => GuardError::Storage(StorageError::RedisCommand(err.to_string())),
        }
    }
}

impl From<serde_json::Error> for GuardError {
    fn from(err: serde_json::Error) -> Self {
        GuardError::Storage(StorageError::Serialization(err.to_string()))
    }
}

impl From<std::io::Error> for GuardError {
    fn from(err: std::io::Error) -> Self {
        GuardError::Storage(StorageError::Io(err.to_string()))
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, GuardError>;
