// src/resilience/tests/mod.rs
//! Tests for resilience features

mod health_monitor_tests;

// Common test utilities for resilience testing
pub(crate) mod utils {
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::{CacheConfig, CircuitBreakerSettings, CircuitConfig};
    use crate::resilience::CircuitBreakerRegistry;

    pub fn circuit_config(failure_threshold: u32, recovery_timeout: Duration) -> CircuitConfig {
        CircuitConfig {
            failure_threshold,
            recovery_timeout,
            half_open_max_calls: 1,
            ..CircuitConfig::default()
        }
    }

    /// Registry with no named services and the given default circuit config
    pub fn create_registry(default: CircuitConfig) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(CircuitBreakerSettings::uniform(default), CacheConfig::default())
    }

    /// Counts invocations of a simulated dependency
    #[derive(Debug, Clone, Default)]
    pub struct CallCounter(Arc<AtomicUsize>);

    impl CallCounter {
        pub fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }

        pub async fn succeed(&self, value: Value) -> Result<Value, String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        }

        pub async fn fail(&self) -> Result<Value, String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err("connection refused".to_string())
        }
    }
}
