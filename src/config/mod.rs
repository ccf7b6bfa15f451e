// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GuardError, Result};

/// Per-service circuit breaker configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Number of failures before opening the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the circuit stays open before admitting a trial call
    #[serde(default = "default_recovery_timeout", with = "duration_serde")]
    pub recovery_timeout: Duration,

    /// Observation window, informational only
    #[serde(default = "default_monitoring_period", with = "duration_serde")]
    pub monitoring_period: Duration,

    /// Successful trial calls needed in half-open state to close the circuit
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_monitoring_period() -> Duration {
    Duration::from_secs(60)
}

fn default_half_open_max_calls() -> u32 {
    3
}

impl Default for CircuitConfig {
    /// Threshold 5, recovery 30s, monitoring 60s, half-open cap 3
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout: default_recovery_timeout(),
            monitoring_period: default_monitoring_period(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

impl CircuitConfig {
    fn with(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            ..Self::default()
        }
    }
}

/// Circuit breaker settings: a default plus named overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    #[serde(default)]
    pub default: CircuitConfig,

    #[serde(default = "default_service_overrides")]
    pub services: HashMap<String, CircuitConfig>,
}

/// Overrides for the application's known backends
pub fn default_service_overrides() -> HashMap<String, CircuitConfig> {
    HashMap::from([
        (
            "auth-service".to_string(),
            CircuitConfig::with(3, Duration::from_secs(15)),
        ),
        (
            "user-service".to_string(),
            CircuitConfig::with(5, Duration::from_secs(20)),
        ),
        (
            "api-gateway".to_string(),
            CircuitConfig::with(3, Duration::from_secs(10)),
        ),
        (
            "ocr-service".to_string(),
            CircuitConfig::with(2, Duration::from_secs(45)),
        ),
        (
            "database".to_string(),
            CircuitConfig::with(3, Duration::from_secs(20)),
        ),
    ])
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            default: CircuitConfig::default(),
            services: default_service_overrides(),
        }
    }
}

impl CircuitBreakerSettings {
    /// Settings with no named overrides, every service uses `default`
    pub fn uniform(default: CircuitConfig) -> Self {
        Self {
            default,
            services: HashMap::new(),
        }
    }

    /// Config for a service, falling back to the default
    pub fn config_for(&self, service: &str) -> CircuitConfig {
        self.services.get(service).copied().unwrap_or(self.default)
    }
}

/// Configuration for the response cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL used when a call does not specify one
    #[serde(default = "default_cache_ttl", with = "duration_serde")]
    pub default_ttl: Duration,

    /// Maximum number of entries to store
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(300)
}

fn default_max_entries() -> usize {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: default_cache_ttl(),
            max_entries: default_max_entries(),
        }
    }
}

/// Configuration for the health monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMonitorConfig {
    /// How often to poll every dependency
    #[serde(default = "default_check_interval", with = "duration_serde")]
    pub check_interval: Duration,

    /// Deadline for a single probe
    #[serde(default = "default_probe_timeout", with = "duration_serde")]
    pub probe_timeout: Duration,

    /// Highest unhealthy count still reported as degraded
    #[serde(default = "default_degraded_threshold")]
    pub degraded_threshold: usize,
}

fn default_check_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_degraded_threshold() -> usize {
    2
}

impl HealthMonitorConfig {
    /// Reject settings the poll loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.check_interval.is_zero() {
            return Err(GuardError::Config(
                "health.check_interval must be greater than zero".to_string(),
            ));
        }
        if self.probe_timeout.is_zero() {
            return Err(GuardError::Config(
                "health.probe_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            probe_timeout: default_probe_timeout(),
            degraded_threshold: default_degraded_threshold(),
        }
    }
}

/// Configuration for the offline fallback store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Storage key of the dataset document
    #[serde(default = "default_storage_key")]
    pub storage_key: String,

    /// Pending records needed before a notification is raised
    #[serde(default = "default_pending_notice_threshold")]
    pub pending_notice_threshold: usize,

    /// Age of the last sync after which the data is reported stale
    #[serde(default = "default_stale_after", with = "duration_serde")]
    pub stale_after: Duration,

    /// Locally cached offline credentials, identifier -> secret
    #[serde(default = "default_offline_credentials")]
    pub offline_credentials: HashMap<String, String>,
}

fn default_storage_key() -> String {
    "fallback-data".to_string()
}

fn default_pending_notice_threshold() -> usize {
    1
}

fn default_stale_after() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_offline_credentials() -> HashMap<String, String> {
    HashMap::from([
        ("admin@cartorio.com".to_string(), "admin123".to_string()),
        ("funcionario@cartorio.com".to_string(), "func123".to_string()),
    ])
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            storage_key: default_storage_key(),
            pending_notice_threshold: default_pending_notice_threshold(),
            stale_after: default_stale_after(),
            offline_credentials: default_offline_credentials(),
        }
    }
}

/// Configuration for Redis storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Prefix applied to every key written by this process
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Connection timeout
    #[serde(default = "default_conn_timeout", with = "duration_serde")]
    pub connection_timeout: Duration,
}

fn default_key_prefix() -> String {
    "service_guard".to_string()
}

fn default_conn_timeout() -> Duration {
    Duration::from_secs(2)
}

/// Which durable backend the fallback store persists to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    Memory,
    File { directory: PathBuf },
    Redis(RedisConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::File {
            directory: PathBuf::from(".service_guard"),
        }
    }
}

/// Top-level configuration for the whole resilience layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub health: HealthMonitorConfig,

    #[serde(default)]
    pub fallback: FallbackConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl GuardConfig {
    /// Parse a JSON document, filling every missing field with its default
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| GuardError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.health.validate()
    }

    /// Load configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| GuardError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    /// Build configuration from `GUARD_*` environment variables on top of the defaults.
    ///
    /// Recognised: GUARD_CONFIG (JSON file loaded first), GUARD_HEALTH_INTERVAL_MS,
    /// GUARD_PROBE_TIMEOUT_MS, GUARD_DEGRADED_THRESHOLD, GUARD_CACHE_TTL_MS,
    /// GUARD_STORAGE_DIR, GUARD_REDIS_URL.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("GUARD_CONFIG") {
            Ok(path) => Self::from_json_file(path)?,
            Err(_) => Self::default(),
        };

        if let Some(ms) = env_u64("GUARD_HEALTH_INTERVAL_MS")? {
            config.health.check_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("GUARD_PROBE_TIMEOUT_MS")? {
            config.health.probe_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = env_u64("GUARD_DEGRADED_THRESHOLD")? {
            config.health.degraded_threshold = n as usize;
        }
        if let Some(ms) = env_u64("GUARD_CACHE_TTL_MS")? {
            config.cache.default_ttl = Duration::from_millis(ms);
        }
        if let Ok(url) = std::env::var("GUARD_REDIS_URL") {
            config.storage = StorageConfig::Redis(RedisConfig {
                url,
                key_prefix: default_key_prefix(),
                connection_timeout: default_conn_timeout(),
            });
        } else if let Ok(dir) = std::env::var("GUARD_STORAGE_DIR") {
            config.storage = StorageConfig::File {
                directory: PathBuf::from(dir),
            };
        }

        config.validate()?;
        Ok(config)
    }
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| GuardError::Config(format!("{}={:?}: {}", name, raw, e))),
        Err(_) => Ok(None),
    }
}

// Helper module to serialize/deserialize Duration with serde
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
