use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use serde::{Serialize, Serializer};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::task;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::HealthMonitorConfig;
use crate::error::{GuardError, Result};
use crate::storage::RedisStorage;

/// Floor for the poll period; a zero period cannot drive a timer
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Health of a single dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Reserved for finer-grained probes; the default update rule never produces it
    Degraded,
    Unhealthy,
    Unknown,
}

/// Aggregate health of the whole system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub name: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    #[serde(serialize_with = "serialize_millis")]
    pub response_time: Option<Duration>,
    pub error: Option<String>,
    pub retry_count: u32,
}

fn serialize_millis<S: Serializer>(
    value: &Option<Duration>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
        None => serializer.serialize_none(),
    }
}

impl ServiceHealth {
    fn unknown(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: HealthStatus::Unknown,
            last_check: Utc::now(),
            response_time: None,
            error: None,
            retry_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemHealth {
    pub overall: OverallHealth,
    pub services: Vec<ServiceHealth>,
    pub timestamp: DateTime<Utc>,
}

/// Healthy with no unhealthy or degraded service, degraded while the number of
/// unhealthy services stays within `degraded_threshold`, unhealthy beyond it.
pub fn aggregate(services: &[ServiceHealth], degraded_threshold: usize) -> OverallHealth {
    let unhealthy = services
        .iter()
        .filter(|s| s.status == HealthStatus::Unhealthy)
        .count();
    let degraded = services
        .iter()
        .filter(|s| s.status == HealthStatus::Degraded)
        .count();

    if unhealthy == 0 && degraded == 0 {
        OverallHealth::Healthy
    } else if unhealthy <= degraded_threshold {
        OverallHealth::Degraded
    } else {
        OverallHealth::Unhealthy
    }
}

/// A check of one dependency. Errors and timeouts both mark it unhealthy.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> Result<()>;
}

/// Probe backed by an async closure
pub struct FnProbe<F>(pub F);

#[async_trait]
impl<F, Fut> HealthProbe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn probe(&self) -> Result<()> {
        (self.0)().await
    }
}

/// Probe that succeeds when a TCP connection to `addr` can be opened
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl HealthProbe for TcpProbe {
    async fn probe(&self) -> Result<()> {
        tokio::net::TcpStream::connect(&self.addr)
            .await
            .map(drop)
            .map_err(|e| GuardError::ProbeFailure(format!("{}: {}", self.addr, e)))
    }
}

#[async_trait]
impl HealthProbe for RedisStorage {
    async fn probe(&self) -> Result<()> {
        self.ping().await
    }
}

type Listener = Arc<dyn Fn(&SystemHealth) + Send + Sync>;
type ListenerList = Mutex<Vec<(u64, Listener)>>;

/// Handle returned by [`HealthMonitor::subscribe`]
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl Subscription {
    /// Stop receiving updates. A no-op once the monitor is gone or destroyed.
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}

/// Polls a fixed set of dependencies and publishes the aggregate health.
///
/// Poll cycles never overlap: a tick (or [`check_now`](Self::check_now)) that
/// finds a cycle still running is skipped. Inside a cycle every probe runs
/// concurrently under its own timeout, and a failing, slow or panicking probe
/// only affects its own dependency.
pub struct HealthMonitor {
    probes: Vec<(String, Arc<dyn HealthProbe>)>,
    services: RwLock<Vec<ServiceHealth>>,
    listeners: Arc<ListenerList>,
    next_listener_id: AtomicU64,
    config: HealthMonitorConfig,
    cycle_lock: tokio::sync::Mutex<()>,
    cancel_flag: AtomicBool,
    task: Mutex<Option<task::JoinHandle<()>>>,
}

impl fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.config)
            .field("services", &self.system_health().services)
            .field("cancelled", &self.cancel_flag.load(Ordering::SeqCst))
            .finish()
    }
}

impl HealthMonitor {
    /// Create a monitor without starting it. Every dependency starts `Unknown`.
    pub fn new(config: HealthMonitorConfig, probes: Vec<(String, Arc<dyn HealthProbe>)>) -> Self {
        let mut unique: Vec<(String, Arc<dyn HealthProbe>)> = Vec::with_capacity(probes.len());
        for (name, probe) in probes {
            if unique.iter().any(|(existing, _)| *existing == name) {
                warn!(service = %name, "Duplicate health probe ignored");
                continue;
            }
            unique.push((name, probe));
        }

        let services = unique.iter().map(|(name, _)| ServiceHealth::unknown(name)).collect();

        Self {
            probes: unique,
            services: RwLock::new(services),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(0),
            config,
            cycle_lock: tokio::sync::Mutex::new(()),
            cancel_flag: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// Create a monitor, run one poll cycle immediately, then keep polling
    /// every `check_interval` until [`destroy`](Self::destroy).
    pub async fn spawn(
        config: HealthMonitorConfig,
        probes: Vec<(String, Arc<dyn HealthProbe>)>,
    ) -> Arc<Self> {
        let monitor = Arc::new(Self::new(config, probes));
        monitor.check_now().await;
        monitor.start();
        monitor
    }

    /// Start the background polling task. The first tick fires after one interval.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() || self.cancel_flag.load(Ordering::SeqCst) {
            return;
        }

        let weak = Arc::downgrade(self);
        let interval = if self.config.check_interval < MIN_CHECK_INTERVAL {
            warn!(
                requested_ms = self.config.check_interval.as_millis() as u64,
                "Health check interval too short, using the minimum"
            );
            MIN_CHECK_INTERVAL
        } else {
            self.config.check_interval
        };

        *slot = Some(task::spawn(async move {
            let mut interval_timer = time::interval_at(Instant::now() + interval, interval);
            interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval_timer.tick().await;

                let Some(monitor) = weak.upgrade() else {
                    break;
                };
                if monitor.cancel_flag.load(Ordering::SeqCst) {
                    break;
                }
                monitor.check_now().await;
            }

            debug!("Health monitor task stopped");
        }));

        info!(
            services = self.probes.len(),
            interval_ms = interval.as_millis() as u64,
            "Health monitor started"
        );
    }

    /// Run one poll cycle now. Returns false if a cycle was already running.
    pub async fn check_now(&self) -> bool {
        let Ok(_cycle) = self.cycle_lock.try_lock() else {
            debug!("Health check cycle already running, skipping");
            return false;
        };
        if self.cancel_flag.load(Ordering::SeqCst) {
            return false;
        }

        let probe_timeout = self.config.probe_timeout;
        let checks = self.probes.iter().map(|(name, probe)| async move {
            let started = Instant::now();
            let checked = AssertUnwindSafe(time::timeout(probe_timeout, probe.probe()))
                .catch_unwind()
                .await;
            let outcome = match checked {
                Ok(Ok(Ok(()))) => Ok(()),
                Ok(Ok(Err(e))) => Err(e.to_string()),
                Ok(Err(_)) => Err(format!("probe timed out after {:?}", probe_timeout)),
                Err(_) => Err("probe panicked".to_string()),
            };
            if let Err(reason) = &outcome {
                warn!(service = %name, error = %reason, "Health probe failed");
            }
            (started.elapsed(), outcome)
        });
        let results = join_all(checks).await;

        {
            let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
            for (service, (elapsed, outcome)) in services.iter_mut().zip(results) {
                let previous = service.status;
                service.last_check = Utc::now();
                service.response_time = Some(elapsed);

                match outcome {
                    Ok(()) => {
                        service.status = HealthStatus::Healthy;
                        service.retry_count = 0;
                        service.error = None;
                        if previous == HealthStatus::Unhealthy {
                            info!(service = %service.name, "Service is now healthy");
                        }
                    }
                    Err(reason) => {
                        service.status = HealthStatus::Unhealthy;
                        service.retry_count = service.retry_count.saturating_add(1);
                        service.error = Some(GuardError::ProbeFailure(reason).to_string());
                        if previous != HealthStatus::Unhealthy {
                            warn!(service = %service.name, "Service is now unhealthy");
                        }
                    }
                }
            }
        }

        let health = self.system_health();
        debug!(overall = ?health.overall, "Health check cycle complete");
        self.notify(&health);
        true
    }

    fn notify(&self, health: &SystemHealth) {
        // Listeners may subscribe or unsubscribe from inside the callback
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            if std::panic::catch_unwind(AssertUnwindSafe(|| listener(health))).is_err() {
                error!("Health listener panicked while handling an update");
            }
        }
    }

    /// Register a listener called after every poll cycle
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SystemHealth) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Current snapshot, aggregated on read
    pub fn system_health(&self) -> SystemHealth {
        let services = self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        SystemHealth {
            overall: aggregate(&services, self.config.degraded_threshold),
            services,
            timestamp: Utc::now(),
        }
    }

    pub fn service_health(&self, name: &str) -> Option<ServiceHealth> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|s| s.name == name)
            .cloned()
    }

    pub fn is_service_healthy(&self, name: &str) -> bool {
        self.service_health(name)
            .is_some_and(|s| s.status == HealthStatus::Healthy)
    }

    /// Usable overall: healthy or degraded
    pub fn is_system_healthy(&self) -> bool {
        self.system_health().overall != OverallHealth::Unhealthy
    }

    /// Stop polling and drop every subscriber. Safe to call more than once.
    pub fn destroy(&self) {
        let already = self.cancel_flag.swap(true, Ordering::SeqCst);
        if let Some(handle) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        if !already {
            info!("Health monitor destroyed");
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
