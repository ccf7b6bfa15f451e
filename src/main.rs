use dotenv::dotenv;
use std::sync::Arc;
use tracing::{error, info, warn};

use service_guard::resilience::{HealthProbe, TcpProbe};
use service_guard::{
    init_logging, CircuitBreakerRegistry, FallbackStore, GuardConfig, HealthMonitor,
    OverallHealth,
};

// GUARD_PROBES is a comma separated list of name=host:port pairs
fn probes_from_env() -> Vec<(String, Arc<dyn HealthProbe>)> {
    let raw = std::env::var("GUARD_PROBES").unwrap_or_default();
    raw.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .filter_map(|entry| match entry.split_once('=') {
            Some((name, addr)) => Some((
                name.trim().to_string(),
                Arc::new(TcpProbe::new(addr.trim())) as Arc<dyn HealthProbe>,
            )),
            None => {
                warn!(entry, "Ignoring malformed GUARD_PROBES entry");
                None
            }
        })
        .collect()
}

#[tokio::main]
async fn main() -> service_guard::Result<()> {
    dotenv().ok();
    match std::env::var("GUARD_LOG_FORMAT").as_deref() {
        Ok("json") => service_guard::logging::init_json(),
        _ => init_logging(),
    }
    info!("Service guard starting up");

    let config = GuardConfig::from_env()?;
    info!(storage = ?config.storage, "Configuration loaded");

    let registry = CircuitBreakerRegistry::new(config.circuit_breaker.clone(), config.cache.clone());
    for (service, snapshot) in registry.all_states().await {
        info!(service = %service, state = ?snapshot.state, "Circuit registered");
    }

    let storage = service_guard::storage::open(&config.storage).await?;
    let store = FallbackStore::load(storage, config.fallback.clone()).await?;
    let pending = store.get_pending_sync_data().await;
    info!(
        pending = pending.entities.len(),
        last_sync = %pending.last_sync,
        "Offline store ready"
    );
    for notice in store.get_offline_notifications().await {
        warn!("{}", notice);
    }

    let probes = probes_from_env();
    if probes.is_empty() {
        info!("No health probes configured, set GUARD_PROBES to enable monitoring");
        return Ok(());
    }

    let monitor = HealthMonitor::spawn(config.health.clone(), probes).await;
    let _subscription = monitor.subscribe(|health| match health.overall {
        OverallHealth::Healthy => info!("System healthy"),
        OverallHealth::Degraded => warn!("System degraded"),
        OverallHealth::Unhealthy => error!("System unhealthy"),
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Could not listen for shutdown signal");
    }
    monitor.destroy();
    info!("Service guard stopped");

    Ok(())
}
