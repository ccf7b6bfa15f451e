// src/resilience/mod.rs
//! Resilience features for calls to backend services.
//!
//! 1. **Circuit Breaking** - Stop calling a failing dependency for a cooldown window
//! 2. **Response Caching** - Serve recent responses without touching the dependency
//! 3. **Retry with Exponential Backoff** - Smart retries for transient failures
//! 4. **Health Monitoring** - Poll every dependency and publish the aggregate status

pub mod circuit_breaker;
mod exponential_backoff;
pub mod health_monitor;

#[cfg(test)]
mod tests;

// Re-export key components
pub use circuit_breaker::{
    CallOptions, CircuitBreakerRegistry, CircuitSnapshot, CircuitState, ServiceCallResult,
};
pub use exponential_backoff::{ExponentialBackoff, RetryConfig};
pub use health_monitor::{
    aggregate, FnProbe, HealthMonitor, HealthProbe, HealthStatus, OverallHealth, ServiceHealth,
    Subscription, SystemHealth, TcpProbe,
};
