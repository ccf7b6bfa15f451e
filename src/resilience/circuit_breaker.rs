use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, ResponseCache};
use crate::circuit_event;
use crate::config::{CacheConfig, CircuitBreakerSettings, CircuitConfig};
use crate::error::GuardError;
use crate::resilience::exponential_backoff::{ExponentialBackoff, RetryConfig};

/// The state of a circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are failing and not being sent
    Open,
    /// Circuit is partially open, allowing a limited number of requests to test recovery
    HalfOpen,
}

/// Read-only view of one service's circuit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_calls: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub next_attempt_time: Option<DateTime<Utc>>,
}

/// Mutable circuit record. Always accessed under its service's mutex.
#[derive(Debug)]
struct CircuitRecord {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    total_calls: u64,
    last_failure_time: Option<DateTime<Utc>>,
    next_attempt_time: Option<DateTime<Utc>>,
    // Monotonic twin of next_attempt_time used for admission decisions
    next_attempt_at: Option<Instant>,
}

enum Admission {
    Admitted,
    Denied(GuardError),
}

impl CircuitRecord {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            total_calls: 0,
            last_failure_time: None,
            next_attempt_time: None,
            next_attempt_at: None,
        }
    }

    fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            total_calls: self.total_calls,
            last_failure_time: self.last_failure_time,
            next_attempt_time: self.next_attempt_time,
        }
    }

    fn try_admit(&mut self, service: &str, config: &CircuitConfig, now: Instant) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Admitted,
            CircuitState::Open => match self.next_attempt_at {
                Some(at) if now >= at => {
                    self.state = CircuitState::HalfOpen;
                    self.success_count = 0;
                    info!(service, "Circuit transitioned to half-open");
                    Admission::Admitted
                }
                _ => Admission::Denied(GuardError::CallDenied {
                    service: service.to_string(),
                    next_attempt: self.next_attempt_time,
                }),
            },
            CircuitState::HalfOpen => {
                if self.success_count < config.half_open_max_calls {
                    Admission::Admitted
                } else {
                    Admission::Denied(GuardError::CallDenied {
                        service: service.to_string(),
                        next_attempt: None,
                    })
                }
            }
        }
    }

    fn record_success(&mut self, service: &str, config: &CircuitConfig) {
        self.success_count = self.success_count.saturating_add(1);
        self.total_calls += 1;

        if self.state == CircuitState::HalfOpen && self.success_count >= config.half_open_max_calls
        {
            self.state = CircuitState::Closed;
            self.failure_count = 0;
            self.last_failure_time = None;
            self.next_attempt_time = None;
            self.next_attempt_at = None;
            info!(
                service,
                successes = self.success_count,
                "Circuit closed after successful trial calls"
            );
        }
    }

    fn record_failure(&mut self, service: &str, config: &CircuitConfig, now: Instant) {
        let previous = self.state;
        self.failure_count = self.failure_count.saturating_add(1);
        self.total_calls += 1;
        self.last_failure_time = Some(Utc::now());

        let trips = previous == CircuitState::HalfOpen
            || (previous == CircuitState::Closed && self.failure_count >= config.failure_threshold);

        if trips {
            self.state = CircuitState::Open;
            self.next_attempt_at = Some(now + config.recovery_timeout);
            self.next_attempt_time = chrono::Duration::from_std(config.recovery_timeout)
                .ok()
                .map(|d| Utc::now() + d);
        }

        circuit_event!(
            service,
            self.state,
            self.failure_count,
            config.failure_threshold,
            "Circuit breaker recorded failure"
        );
        if trips {
            warn!(
                service,
                from = ?previous,
                recovery_timeout_ms = config.recovery_timeout.as_millis() as u64,
                "Circuit opened"
            );
        }
    }
}

/// Per-call options for [`CircuitBreakerRegistry::call_service`]
#[derive(Debug, Clone)]
pub struct CallOptions<T> {
    /// Serve from and store into the response cache under this key
    pub cache_key: Option<String>,
    /// TTL for a stored response, defaults to the cache's default TTL
    pub cache_ttl: Option<Duration>,
    /// Returned as a degraded success when the call is denied or fails
    pub fallback_data: Option<T>,
    /// Upper bound on the wrapped operation
    pub timeout: Option<Duration>,
}

impl<T> Default for CallOptions<T> {
    fn default() -> Self {
        Self {
            cache_key: None,
            cache_ttl: None,
            fallback_data: None,
            timeout: None,
        }
    }
}

impl<T> CallOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn fallback(mut self, data: T) -> Self {
        self.fallback_data = Some(data);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of a protected call. `success` with an `error` attached is a degraded success.
#[derive(Debug)]
pub struct ServiceCallResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<GuardError>,
    pub response_time: Duration,
    pub from_cache: bool,
}

impl<T> ServiceCallResult<T> {
    fn ok(data: T, response_time: Duration) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            response_time,
            from_cache: false,
        }
    }

    fn cached(data: T, response_time: Duration) -> Self {
        Self {
            from_cache: true,
            ..Self::ok(data, response_time)
        }
    }

    fn degrade(fallback: Option<T>, error: GuardError, response_time: Duration) -> Self {
        Self {
            success: fallback.is_some(),
            data: fallback,
            error: Some(error),
            response_time,
            from_cache: false,
        }
    }

    /// Fallback data was returned in place of a live response
    pub fn is_degraded(&self) -> bool {
        self.success && self.error.is_some()
    }

    /// Collapse into a plain `Result`, treating a degraded success as success
    pub fn into_result(self) -> crate::error::Result<T> {
        match (self.data, self.error) {
            (Some(data), _) if self.success => Ok(data),
            (_, Some(error)) => Err(error),
            _ => Err(GuardError::Internal("call result carried no data".to_string())),
        }
    }
}

/// Registry of circuit breakers, one per named dependency, plus the shared response cache.
pub struct CircuitBreakerRegistry {
    circuits: RwLock<HashMap<String, Arc<Mutex<CircuitRecord>>>>,
    settings: StdRwLock<CircuitBreakerSettings>,
    cache: ResponseCache,
}

impl fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("cache", &self.cache.stats())
            .finish_non_exhaustive()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerSettings::default(), CacheConfig::default())
    }
}

impl CircuitBreakerRegistry {
    /// Creates a registry; every service named in `settings` starts closed
    pub fn new(settings: CircuitBreakerSettings, cache: CacheConfig) -> Self {
        let circuits = settings
            .services
            .keys()
            .map(|name| (name.clone(), Arc::new(Mutex::new(CircuitRecord::closed()))))
            .collect();

        Self {
            circuits: RwLock::new(circuits),
            settings: StdRwLock::new(settings),
            cache: ResponseCache::new(cache),
        }
    }

    /// Effective config for a service
    pub fn config_for(&self, service: &str) -> CircuitConfig {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .config_for(service)
    }

    /// Override the config of one service. Calls already in flight keep the config they read.
    pub fn configure(&self, service: &str, config: CircuitConfig) {
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .services
            .insert(service.to_string(), config);
    }

    async fn circuit(&self, service: &str) -> Arc<Mutex<CircuitRecord>> {
        if let Some(circuit) = self.circuits.read().await.get(service) {
            return Arc::clone(circuit);
        }

        let mut circuits = self.circuits.write().await;
        Arc::clone(
            circuits
                .entry(service.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(CircuitRecord::closed()))),
        )
    }

    /// Invoke `operation` under the protection of `service`'s circuit.
    ///
    /// Never fails: every outcome, including a denied call, a failed call and
    /// a timeout, is reported through the returned [`ServiceCallResult`].
    /// When the operation exceeds `options.timeout` its future is dropped and
    /// the call counts as a failure.
    pub async fn call_service<T, E, F, Fut>(
        &self,
        service: &str,
        operation: F,
        options: CallOptions<T>,
    ) -> ServiceCallResult<T>
    where
        T: Serialize + DeserializeOwned,
        E: fmt::Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let start = Instant::now();

        // Cache hits bypass the breaker entirely
        if let Some(key) = options.cache_key.as_deref() {
            if let Some(value) = self.cache.get(key) {
                match serde_json::from_value::<T>(value) {
                    Ok(data) => {
                        debug!(service, cache_key = key, "Serving response from cache");
                        return ServiceCallResult::cached(data, start.elapsed());
                    }
                    Err(e) => {
                        warn!(service, cache_key = key, error = %e, "Discarding unreadable cache entry");
                        self.cache.remove(key);
                    }
                }
            }
        }

        let config = self.config_for(service);
        let circuit = self.circuit(service).await;

        let admission = circuit.lock().await.try_admit(service, &config, Instant::now());
        if let Admission::Denied(error) = admission {
            debug!(service, "Call denied by open circuit");
            return ServiceCallResult::degrade(options.fallback_data, error, start.elapsed());
        }

        let outcome = match options.timeout {
            Some(limit) => match time::timeout(limit, operation()).await {
                Ok(result) => result.map_err(|e| GuardError::OperationFailure(e.to_string())),
                Err(_) => Err(GuardError::TimeoutFailure(limit)),
            },
            None => operation()
                .await
                .map_err(|e| GuardError::OperationFailure(e.to_string())),
        };
        let response_time = start.elapsed();

        match outcome {
            Ok(data) => {
                circuit.lock().await.record_success(service, &config);

                if let Some(key) = options.cache_key.as_deref() {
                    let ttl = options.cache_ttl.unwrap_or_else(|| self.cache.default_ttl());
                    let stored = serde_json::to_value(&data)
                        .map_err(GuardError::from)
                        .and_then(|value| self.cache.insert(key, value, ttl));
                    if let Err(e) = stored {
                        warn!(service, cache_key = key, error = %e, "Response not cached");
                    }
                }

                ServiceCallResult::ok(data, response_time)
            }
            Err(error) => {
                circuit
                    .lock()
                    .await
                    .record_failure(service, &config, Instant::now());
                ServiceCallResult::degrade(options.fallback_data, error, response_time)
            }
        }
    }

    /// Like [`call_service`](Self::call_service), retrying failed attempts with
    /// exponential backoff. Each attempt goes through the breaker and counts
    /// toward its counters; a denied attempt ends the loop immediately. The
    /// fallback, if any, is applied once after the last attempt.
    pub async fn call_service_with_retry<T, E, F, Fut>(
        &self,
        service: &str,
        mut operation: F,
        mut options: CallOptions<T>,
        retry: RetryConfig,
    ) -> ServiceCallResult<T>
    where
        T: Serialize + DeserializeOwned,
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let start = Instant::now();
        let fallback = options.fallback_data.take();
        let mut backoff = ExponentialBackoff::new(retry);
        let mut attempt = 1usize;

        let last = loop {
            let attempt_options = CallOptions {
                cache_key: options.cache_key.clone(),
                cache_ttl: options.cache_ttl,
                fallback_data: None,
                timeout: options.timeout,
            };
            let result = self.call_service(service, &mut operation, attempt_options).await;

            if result.success {
                if attempt > 1 {
                    info!(service, attempt, "Call succeeded after retry");
                }
                return ServiceCallResult {
                    response_time: start.elapsed(),
                    ..result
                };
            }
            if result.error.as_ref().is_some_and(GuardError::is_call_denied) {
                break result;
            }

            match backoff.next_backoff() {
                Some(delay) => {
                    warn!(
                        service,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Attempt failed, retrying"
                    );
                    time::sleep(delay).await;
                    attempt += 1;
                }
                None => break result,
            }
        };

        let error = last
            .error
            .unwrap_or_else(|| GuardError::Internal("retry loop ended without an error".to_string()));
        ServiceCallResult::degrade(fallback, error, start.elapsed())
    }

    /// Snapshot of a service's circuit; unknown services are registered closed
    pub async fn get_state(&self, service: &str) -> CircuitSnapshot {
        self.circuit(service).await.lock().await.snapshot()
    }

    /// Snapshots of every registered circuit
    pub async fn all_states(&self) -> HashMap<String, CircuitSnapshot> {
        let circuits: Vec<(String, Arc<Mutex<CircuitRecord>>)> = self
            .circuits
            .read()
            .await
            .iter()
            .map(|(name, circuit)| (name.clone(), Arc::clone(circuit)))
            .collect();

        let mut states = HashMap::with_capacity(circuits.len());
        for (name, circuit) in circuits {
            let snapshot = circuit.lock().await.snapshot();
            states.insert(name, snapshot);
        }
        states
    }

    /// Force a circuit closed with every counter at zero
    pub async fn reset_circuit(&self, service: &str) {
        let circuit = self.circuit(service).await;
        *circuit.lock().await = CircuitRecord::closed();
        info!(service, "Circuit reset");
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
