// library entry
pub mod cache;
pub mod config;
pub mod error;
pub mod fallback;
pub mod logging;
pub mod resilience;
pub mod storage;

// Re-export key components for convenience
pub use cache::{CacheStats, ResponseCache};
pub use config::GuardConfig;
pub use error::{GuardError, Result};
pub use fallback::FallbackStore;
pub use logging::init as init_logging;
pub use resilience::{
    CallOptions, CircuitBreakerRegistry, CircuitState, HealthMonitor, HealthProbe, OverallHealth,
    ServiceCallResult, SystemHealth,
};
