// src/resilience/tests/health_monitor_tests.rs

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use crate::config::HealthMonitorConfig;
use crate::error::{GuardError, Result};
use crate::resilience::health_monitor::MIN_CHECK_INTERVAL;
use crate::resilience::{
    aggregate, FnProbe, HealthMonitor, HealthProbe, HealthStatus, OverallHealth, ServiceHealth,
    TcpProbe,
};

// Probe whose behaviour can be switched while the monitor runs
#[derive(Debug, Default)]
struct MockProbe {
    should_fail: AtomicBool,
    should_panic: AtomicBool,
    delay_ms: AtomicUsize,
    calls: AtomicUsize,
}

impl MockProbe {
    fn healthy() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn failing() -> Arc<Self> {
        let probe = Self::default();
        probe.set_failure(true);
        Arc::new(probe)
    }

    fn set_failure(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::SeqCst);
    }

    fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for MockProbe {
    async fn probe(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.should_panic.load(Ordering::SeqCst) {
            panic!("probe blew up");
        }
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(GuardError::ProbeFailure("503 Service Unavailable".to_string()));
        }
        Ok(())
    }
}

fn test_config() -> HealthMonitorConfig {
    HealthMonitorConfig {
        check_interval: Duration::from_secs(60),
        probe_timeout: Duration::from_millis(500),
        degraded_threshold: 2,
    }
}

fn monitor_with(probes: &[(&str, Arc<MockProbe>)]) -> HealthMonitor {
    let probes = probes
        .iter()
        .map(|(name, probe)| (name.to_string(), Arc::clone(probe) as Arc<dyn HealthProbe>))
        .collect();
    HealthMonitor::new(test_config(), probes)
}

fn service(name: &str, status: HealthStatus) -> ServiceHealth {
    ServiceHealth {
        name: name.to_string(),
        status,
        last_check: chrono::Utc::now(),
        response_time: None,
        error: None,
        retry_count: 0,
    }
}

#[test]
fn test_aggregate_rule() {
    use HealthStatus::*;

    let all_up = [service("a", Healthy), service("b", Healthy)];
    assert_eq!(aggregate(&all_up, 2), OverallHealth::Healthy);

    let one_degraded = [service("a", Healthy), service("b", Degraded)];
    assert_eq!(aggregate(&one_degraded, 2), OverallHealth::Degraded);

    let two_down = [service("a", Unhealthy), service("b", Unhealthy), service("c", Healthy)];
    assert_eq!(aggregate(&two_down, 2), OverallHealth::Degraded);

    let three_down = [service("a", Unhealthy), service("b", Unhealthy), service("c", Unhealthy)];
    assert_eq!(aggregate(&three_down, 2), OverallHealth::Unhealthy);

    assert_eq!(aggregate(&[], 2), OverallHealth::Healthy);
}

#[tokio::test]
async fn test_services_start_unknown() {
    let monitor = monitor_with(&[("auth", MockProbe::healthy())]);
    let health = monitor.service_health("auth").unwrap();

    assert_eq!(health.status, HealthStatus::Unknown);
    assert!(health.response_time.is_none());
    assert!(!monitor.is_service_healthy("auth"));
    assert!(monitor.service_health("missing").is_none());
}

#[tokio::test]
async fn test_one_failing_dependency_degrades_system() {
    let failing = MockProbe::failing();
    let monitor = monitor_with(&[
        ("auth", MockProbe::healthy()),
        ("user", MockProbe::healthy()),
        ("ocr", failing.clone()),
    ]);

    assert!(monitor.check_now().await);

    let health = monitor.system_health();
    assert_eq!(health.overall, OverallHealth::Degraded);
    assert!(monitor.is_system_healthy());
    assert!(monitor.is_service_healthy("auth"));

    let ocr = monitor.service_health("ocr").unwrap();
    assert_eq!(ocr.status, HealthStatus::Unhealthy);
    assert_eq!(ocr.retry_count, 1);
    assert!(ocr.error.unwrap().contains("503"));
    assert_eq!(failing.calls(), 1);
}

#[tokio::test]
async fn test_all_failing_dependencies_make_system_unhealthy() {
    let monitor = monitor_with(&[
        ("auth", MockProbe::failing()),
        ("user", MockProbe::failing()),
        ("ocr", MockProbe::failing()),
    ]);

    monitor.check_now().await;

    assert_eq!(monitor.system_health().overall, OverallHealth::Unhealthy);
    assert!(!monitor.is_system_healthy());
}

#[tokio::test]
async fn test_recovery_resets_retry_count() {
    let probe = MockProbe::failing();
    let monitor = monitor_with(&[("database", probe.clone())]);

    monitor.check_now().await;
    monitor.check_now().await;
    assert_eq!(monitor.service_health("database").unwrap().retry_count, 2);

    probe.set_failure(false);
    monitor.check_now().await;

    let health = monitor.service_health("database").unwrap();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.retry_count, 0);
    assert!(health.error.is_none());
    assert!(health.response_time.is_some());
    assert_eq!(monitor.system_health().overall, OverallHealth::Healthy);
}

#[tokio::test]
async fn test_slow_probe_times_out_without_blocking_others() {
    let slow = MockProbe::healthy();
    slow.set_delay(Duration::from_secs(5));
    let monitor = monitor_with(&[("slow", slow), ("fast", MockProbe::healthy())]);

    let started = time::Instant::now();
    monitor.check_now().await;

    assert!(started.elapsed() < Duration::from_secs(2));
    let slow = monitor.service_health("slow").unwrap();
    assert_eq!(slow.status, HealthStatus::Unhealthy);
    assert!(slow.error.unwrap().contains("timed out"));
    assert!(monitor.is_service_healthy("fast"));
}

#[tokio::test]
async fn test_panicking_probe_is_isolated() {
    let bad = MockProbe::healthy();
    bad.should_panic.store(true, Ordering::SeqCst);
    let monitor = monitor_with(&[("bad", bad), ("good", MockProbe::healthy())]);

    assert!(monitor.check_now().await);

    assert_eq!(monitor.service_health("bad").unwrap().status, HealthStatus::Unhealthy);
    assert!(monitor.is_service_healthy("good"));
}

#[tokio::test]
async fn test_cycles_do_not_overlap() {
    let probe = MockProbe::healthy();
    probe.set_delay(Duration::from_millis(100));
    let monitor = monitor_with(&[("api-gateway", probe.clone())]);

    let (first, second) = tokio::join!(monitor.check_now(), monitor.check_now());

    assert!(first ^ second, "exactly one cycle should run");
    assert_eq!(probe.calls(), 1);
}

#[tokio::test]
async fn test_listener_panic_does_not_affect_others() {
    let monitor = monitor_with(&[("auth", MockProbe::healthy())]);
    let received = Arc::new(AtomicUsize::new(0));

    let _bad = monitor.subscribe(|_| panic!("listener failure"));
    let counter = Arc::clone(&received);
    let _good = monitor.subscribe(move |health| {
        assert_eq!(health.services.len(), 1);
        counter.fetch_add(1, Ordering::SeqCst);
    });

    monitor.check_now().await;
    monitor.check_now().await;

    assert_eq!(received.load(Ordering::SeqCst), 2);
    assert_eq!(monitor.subscriber_count(), 2);
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let monitor = monitor_with(&[("auth", MockProbe::healthy())]);
    let received = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&received);
    let subscription = monitor.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    monitor.check_now().await;
    subscription.unsubscribe();
    monitor.check_now().await;

    assert_eq!(received.load(Ordering::SeqCst), 1);
    assert_eq!(monitor.subscriber_count(), 0);
}

#[tokio::test]
async fn test_duplicate_probe_names_are_ignored() {
    let first = MockProbe::healthy();
    let second = MockProbe::healthy();
    let monitor = monitor_with(&[("auth", first.clone()), ("auth", second.clone())]);

    monitor.check_now().await;

    assert_eq!(monitor.system_health().services.len(), 1);
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 0);
}

#[tokio::test]
async fn test_spawn_checks_immediately_and_periodically() {
    let probe = MockProbe::healthy();
    let config = HealthMonitorConfig {
        check_interval: Duration::from_millis(50),
        ..test_config()
    };
    let monitor = HealthMonitor::spawn(
        config,
        vec![("auth".to_string(), probe.clone() as Arc<dyn HealthProbe>)],
    )
    .await;

    assert_eq!(probe.calls(), 1);
    assert!(monitor.is_service_healthy("auth"));

    time::sleep(Duration::from_millis(180)).await;
    assert!(probe.calls() >= 3);

    monitor.destroy();
    let after_destroy = probe.calls();
    time::sleep(Duration::from_millis(150)).await;
    assert_eq!(probe.calls(), after_destroy);
}

#[tokio::test]
async fn test_zero_interval_keeps_polling_at_minimum() {
    let probe = MockProbe::healthy();
    let config = HealthMonitorConfig {
        check_interval: Duration::ZERO,
        ..test_config()
    };
    let monitor = HealthMonitor::spawn(
        config,
        vec![("auth".to_string(), probe.clone() as Arc<dyn HealthProbe>)],
    )
    .await;
    assert_eq!(probe.calls(), 1);

    time::sleep(MIN_CHECK_INTERVAL * 15).await;
    assert!(probe.calls() >= 3, "polling stopped after {} calls", probe.calls());

    monitor.destroy();
}

#[tokio::test]
async fn test_destroy_is_idempotent() {
    let monitor = Arc::new(monitor_with(&[("auth", MockProbe::healthy())]));
    let _subscription = monitor.subscribe(|_| {});
    monitor.start();

    monitor.destroy();
    monitor.destroy();

    assert_eq!(monitor.subscriber_count(), 0);
    assert!(!monitor.check_now().await);

    // Restarting a destroyed monitor does nothing
    monitor.start();
    assert!(!monitor.check_now().await);
}

#[tokio::test]
async fn test_subscription_outliving_monitor() {
    let monitor = monitor_with(&[("auth", MockProbe::healthy())]);
    let subscription = monitor.subscribe(|_| {});
    drop(monitor);

    subscription.unsubscribe();
}

#[tokio::test]
async fn test_fn_probe() {
    let probe: Arc<dyn HealthProbe> = Arc::new(FnProbe(|| async {
        Err::<(), _>(GuardError::ProbeFailure("HTTP 500".to_string()))
    }));
    let monitor = HealthMonitor::new(test_config(), vec![("user".to_string(), probe)]);

    monitor.check_now().await;

    let user = monitor.service_health("user").unwrap();
    assert_eq!(user.status, HealthStatus::Unhealthy);
    assert!(user.error.unwrap().contains("HTTP 500"));
}

#[tokio::test]
async fn test_tcp_probe_against_local_listener() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    assert!(TcpProbe::new(addr.to_string()).probe().await.is_ok());

    drop(listener);
    assert!(TcpProbe::new(addr.to_string()).probe().await.is_err());
}

#[tokio::test]
async fn test_system_health_serialization() {
    let monitor = monitor_with(&[("auth", MockProbe::healthy())]);
    monitor.check_now().await;

    let value = serde_json::to_value(monitor.system_health()).unwrap();
    assert_eq!(value["overall"], "healthy");
    assert_eq!(value["services"][0]["status"], "healthy");
    assert!(value["services"][0]["responseTime"].is_u64());
    assert_eq!(value["services"][0]["retryCount"], 0);
}
