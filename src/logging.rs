use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

/// Initialize the logging system with sensible defaults.
///
/// Log level can be set using the RUST_LOG environment variable.
/// Example: RUST_LOG=debug,service_guard=trace
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // try_init so a host application that already installed a subscriber keeps it
        let installed = tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .try_init();

        if installed.is_ok() {
            tracing::info!("Logging initialized");
        }
    });
}

/// Initialize JSON-formatted logs, for deployments that ship logs to a collector
pub fn init_json() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let installed = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(false))
            .try_init();

        if installed.is_ok() {
            tracing::info!("JSON logging initialized");
        }
    });
}

/// Macro for logging circuit breaker outcomes
#[macro_export]
macro_rules! circuit_event {
    ($service:expr, $state:expr, $failures:expr, $threshold:expr, $msg:literal) => {
        tracing::warn!(
            service = $service,
            state = ?$state,
            failure_count = $failures,
            failure_threshold = $threshold,
            $msg
        )
    };
}

/// Macro for logging storage operations with timing
#[macro_export]
macro_rules! storage_op {
    ($operation:expr, $key:expr, $result:expr, $elapsed_ms:expr) => {
        tracing::debug!(
            operation = $operation,
            key = $key,
            success = $result.is_ok(),
            elapsed_ms = $elapsed_ms,
            "Storage operation"
        )
    };
}
