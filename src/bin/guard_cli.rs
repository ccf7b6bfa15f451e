// src/bin/guard_cli.rs

use prettytable::{Cell, Row, Table};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::time;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use service_guard::config::{CacheConfig, CircuitBreakerSettings, CircuitConfig, StorageConfig};
use service_guard::fallback::{OfflineReport, ReportKind};
use service_guard::resilience::{HealthProbe, SystemHealth, TcpProbe};
use service_guard::{
    CallOptions, CircuitBreakerRegistry, FallbackStore, GuardConfig, HealthMonitor,
};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "guard_cli",
    about = "A CLI for exercising circuit breakers, health checks and the offline store"
)]
struct Opt {
    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences), global = true)]
    verbose: usize,

    /// Disable logs
    #[structopt(long, global = true)]
    disable_logs: bool,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Drive a simulated flaky dependency through a circuit breaker
    Simulate {
        /// Service name the circuit is registered under
        #[structopt(short, long, default_value = "api-gateway")]
        service: String,

        /// Probability that a simulated call fails (0.0 - 1.0)
        #[structopt(short, long, default_value = "0.5")]
        failure_rate: f64,

        /// Number of calls to make
        #[structopt(short = "n", long, default_value = "20")]
        num_calls: usize,

        /// Time between calls in milliseconds
        #[structopt(short = "t", long, default_value = "200")]
        interval_ms: u64,

        /// Failures before the circuit opens
        #[structopt(long, default_value = "3")]
        threshold: u32,

        /// How long the circuit stays open, in milliseconds
        #[structopt(long, default_value = "2000")]
        recovery_ms: u64,

        /// Serve a fallback value when a call is denied or fails
        #[structopt(long)]
        fallback: bool,

        /// Cache successful responses under this key
        #[structopt(long)]
        cache_key: Option<String>,
    },

    /// Probe TCP endpoints given as name=host:port
    Health {
        #[structopt(required = true)]
        targets: Vec<String>,

        /// Keep polling until Ctrl-C
        #[structopt(short, long)]
        watch: bool,

        /// Poll interval in milliseconds when watching
        #[structopt(long, default_value = "5000")]
        interval_ms: u64,

        /// Per-probe timeout in milliseconds
        #[structopt(long, default_value = "2000")]
        timeout_ms: u64,
    },

    /// Inspect and edit the offline fallback dataset
    Offline {
        /// Directory of the file-backed store (defaults to GUARD_STORAGE_DIR or .service_guard)
        #[structopt(long, parse(from_os_str))]
        dir: Option<PathBuf>,

        #[structopt(subcommand)]
        action: OfflineAction,
    },
}

#[derive(Debug, StructOpt)]
enum OfflineAction {
    /// List stored clients
    List,
    /// Add a client from a JSON object
    Add { fields: String },
    /// Merge a JSON object into an existing client
    Update { id: String, fields: String },
    /// Show clients waiting for synchronization
    Pending,
    /// Mark clients as synchronized
    Sync {
        #[structopt(required = true)]
        ids: Vec<String>,
    },
    /// Print a report
    Report {
        #[structopt(possible_values = &["clients", "users", "summary"], default_value = "summary")]
        kind: String,
    },
    /// Show warnings about unsynchronized data
    Notifications,
    /// Show what still works offline
    Capabilities,
    /// Check offline credentials
    Login { email: String, password: String },
    /// Print the dataset as JSON
    Export,
    /// Append clients from an exported JSON file
    Import {
        #[structopt(parse(from_os_str))]
        path: PathBuf,
    },
    /// Reset the dataset to its built-in defaults
    Clear,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let opt = Opt::from_args();

    let filter = if opt.disable_logs {
        "guard_cli=error,service_guard=error".to_string()
    } else {
        let log_level = match opt.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        format!("guard_cli={},service_guard={}", log_level, log_level)
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(filter))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    match opt.command {
        Command::Simulate {
            service,
            failure_rate,
            num_calls,
            interval_ms,
            threshold,
            recovery_ms,
            fallback,
            cache_key,
        } => {
            let config = CircuitConfig {
                failure_threshold: threshold,
                recovery_timeout: Duration::from_millis(recovery_ms),
                ..CircuitConfig::default()
            };
            let registry =
                CircuitBreakerRegistry::new(CircuitBreakerSettings::uniform(config), CacheConfig::default());
            simulate(
                &registry,
                &service,
                failure_rate,
                num_calls,
                Duration::from_millis(interval_ms),
                fallback,
                cache_key,
            )
            .await
        }
        Command::Health {
            targets,
            watch,
            interval_ms,
            timeout_ms,
        } => {
            let mut config = GuardConfig::from_env()?.health;
            config.check_interval = Duration::from_millis(interval_ms);
            config.probe_timeout = Duration::from_millis(timeout_ms);

            let probes = parse_targets(&targets)?;
            health(HealthMonitor::new(config, probes), watch).await
        }
        Command::Offline { dir, action } => {
            let mut config = GuardConfig::from_env()?;
            if let Some(directory) = dir {
                config.storage = StorageConfig::File { directory };
            }
            let storage = service_guard::storage::open(&config.storage).await?;
            let store = FallbackStore::load(storage, config.fallback).await?;
            offline(&store, action).await
        }
    }
}

async fn simulate(
    registry: &CircuitBreakerRegistry,
    service: &str,
    failure_rate: f64,
    num_calls: usize,
    interval: Duration,
    fallback: bool,
    cache_key: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        service,
        failure_rate, num_calls, "Simulating calls through circuit breaker"
    );

    let mut succeeded = 0;
    let mut degraded = 0;
    let mut failed = 0;
    let mut cached = 0;
    let start_time = Instant::now();

    for i in 0..num_calls {
        let request_time = Instant::now();

        let mut options = CallOptions::new();
        if fallback {
            options = options.fallback(json!({ "source": "fallback" }));
        }
        if let Some(key) = &cache_key {
            options = options.cache_key(key.clone()).cache_ttl(interval * 3);
        }

        let result = registry
            .call_service(
                service,
                || async move {
                    time::sleep(Duration::from_millis(10)).await;
                    if rand::random::<f64>() < failure_rate {
                        Err("simulated failure")
                    } else {
                        Ok(json!({ "source": "live", "call": i + 1 }))
                    }
                },
                options,
            )
            .await;
        let state = registry.get_state(service).await;

        if result.from_cache {
            cached += 1;
            info!("Call {}: CACHED (state: {:?})", i + 1, state.state);
        } else if result.is_degraded() {
            degraded += 1;
            warn!(
                "Call {}: FALLBACK ({}) (state: {:?})",
                i + 1,
                result.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                state.state
            );
        } else if result.success {
            succeeded += 1;
            info!("Call {}: OK in {:?} (state: {:?})", i + 1, result.response_time, state.state);
        } else {
            failed += 1;
            warn!(
                "Call {}: FAILED ({}) (state: {:?}, failures: {})",
                i + 1,
                result.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                state.state,
                state.failure_count
            );
        }

        let elapsed = request_time.elapsed();
        if elapsed < interval {
            time::sleep(interval - elapsed).await;
        }
    }

    let state = registry.get_state(service).await;
    let stats = registry.cache_stats();

    let mut table = Table::new();
    table.set_titles(Row::new(vec![Cell::new("Metric"), Cell::new("Value")]));
    for (metric, value) in [
        ("Calls", num_calls.to_string()),
        ("Succeeded", succeeded.to_string()),
        ("Served from cache", cached.to_string()),
        ("Served fallback", degraded.to_string()),
        ("Failed", failed.to_string()),
        ("Final state", format!("{:?}", state.state)),
        ("Recorded failures", state.failure_count.to_string()),
        ("Recorded calls", state.total_calls.to_string()),
        ("Cache entries", stats.total_entries.to_string()),
        ("Time elapsed", format!("{:?}", start_time.elapsed())),
    ] {
        table.add_row(Row::new(vec![Cell::new(metric), Cell::new(&value)]));
    }

    println!("\nSimulation Results:");
    table.printstd();
    Ok(())
}

fn parse_targets(
    targets: &[String],
) -> Result<Vec<(String, Arc<dyn HealthProbe>)>, Box<dyn std::error::Error>> {
    targets
        .iter()
        .map(|target| match target.split_once('=') {
            Some((name, addr)) => Ok((
                name.to_string(),
                Arc::new(TcpProbe::new(addr)) as Arc<dyn HealthProbe>,
            )),
            None => Err(format!("expected name=host:port, got {:?}", target).into()),
        })
        .collect()
}

fn print_health(health: &SystemHealth) {
    let mut table = Table::new();
    table.set_titles(Row::new(vec![
        Cell::new("Service"),
        Cell::new("Status"),
        Cell::new("Response"),
        Cell::new("Failures"),
        Cell::new("Error"),
    ]));
    for service in &health.services {
        table.add_row(Row::new(vec![
            Cell::new(&service.name),
            Cell::new(&format!("{:?}", service.status)),
            Cell::new(
                &service
                    .response_time
                    .map(|d| format!("{}ms", d.as_millis()))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(&service.retry_count.to_string()),
            Cell::new(service.error.as_deref().unwrap_or("")),
        ]));
    }

    println!("\nOverall: {:?} at {}", health.overall, health.timestamp);
    table.printstd();
}

async fn health(monitor: HealthMonitor, watch: bool) -> Result<(), Box<dyn std::error::Error>> {
    let monitor = Arc::new(monitor);

    if !watch {
        monitor.check_now().await;
        print_health(&monitor.system_health());
        return Ok(());
    }

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))?;

    let _subscription = monitor.subscribe(print_health);
    monitor.check_now().await;
    monitor.start();

    while running.load(Ordering::SeqCst) {
        time::sleep(Duration::from_millis(100)).await;
    }

    monitor.destroy();
    info!("Stopped watching");
    Ok(())
}

fn parse_fields(raw: &str) -> Result<Map<String, Value>, Box<dyn std::error::Error>> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        _ => Err("fields must be a JSON object".into()),
    }
}

async fn offline(store: &FallbackStore, action: OfflineAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        OfflineAction::List => {
            let mut table = Table::new();
            table.set_titles(Row::new(vec![
                Cell::new("Id"),
                Cell::new("Status"),
                Cell::new("Created"),
                Cell::new("Fields"),
            ]));
            for entity in store.list_entities_offline().await {
                table.add_row(Row::new(vec![
                    Cell::new(&entity.id),
                    Cell::new(&format!("{:?}", entity.sync_status)),
                    Cell::new(&entity.created_at.to_rfc3339()),
                    Cell::new(&Value::Object(entity.fields).to_string()),
                ]));
            }
            table.printstd();
        }
        OfflineAction::Add { fields } => {
            let entity = store.add_entity_offline(parse_fields(&fields)?).await?;
            println!("Stored {} (pending sync)", entity.id);
        }
        OfflineAction::Update { id, fields } => {
            let entity = store.update_entity_offline(&id, parse_fields(&fields)?).await?;
            println!("Updated {} (pending sync)", entity.id);
        }
        OfflineAction::Pending => {
            let pending = store.get_pending_sync_data().await;
            println!("Last sync: {}", pending.last_sync);
            for entity in pending.entities {
                println!("  {}", entity.id);
            }
        }
        OfflineAction::Sync { ids } => {
            let marked = store.mark_as_synced(&ids).await?;
            println!("Marked {} of {} client(s) as synced", marked, ids.len());
        }
        OfflineAction::Report { kind } => {
            let kind = match kind.as_str() {
                "clients" => ReportKind::Clients,
                "users" => ReportKind::Users,
                _ => ReportKind::Summary,
            };
            let report: OfflineReport = store.generate_offline_report(kind).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OfflineAction::Notifications => {
            let notifications = store.get_offline_notifications().await;
            if notifications.is_empty() {
                println!("Nothing to report");
            }
            for notice in notifications {
                println!("! {}", notice);
            }
        }
        OfflineAction::Capabilities => {
            let mut table = Table::new();
            table.set_titles(Row::new(vec![
                Cell::new("Capability"),
                Cell::new("Available"),
                Cell::new("Description"),
            ]));
            for capability in store.get_offline_capabilities() {
                table.add_row(Row::new(vec![
                    Cell::new(&capability.name),
                    Cell::new(if capability.available { "yes" } else { "no" }),
                    Cell::new(&capability.description),
                ]));
            }
            table.printstd();
        }
        OfflineAction::Login { email, password } => {
            match store.authenticate_offline(&email, &password).await {
                Ok(user) => println!("Logged in offline as {} ({})", user.name, user.role),
                Err(e) => {
                    error!("{}", e);
                    return Err(e.into());
                }
            }
        }
        OfflineAction::Export => {
            println!("{}", store.export_data().await?);
        }
        OfflineAction::Import { path } => {
            let raw = tokio::fs::read_to_string(&path).await?;
            let summary = store.import_entities(&raw).await?;
            println!(
                "Imported {} client(s), skipped {} entr(y/ies)",
                summary.imported, summary.skipped
            );
        }
        OfflineAction::Clear => {
            store.clear_offline_data().await?;
            println!("Offline data reset to defaults");
        }
    }

    Ok(())
}
