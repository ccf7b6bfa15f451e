// src/bin/guard_bench.rs

use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{Cell, Row, Table};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::sync::{Barrier, Semaphore};
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use service_guard::config::{CacheConfig, CircuitBreakerSettings, CircuitConfig};
use service_guard::{CallOptions, CircuitBreakerRegistry};

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "guard_bench",
    about = "A load generator for the circuit breaker registry"
)]
struct Opt {
    /// Number of distinct services to spread calls over
    #[structopt(short, long, default_value = "4")]
    services: usize,

    /// Number of concurrent callers to simulate
    #[structopt(short = "u", long, default_value = "10")]
    num_users: usize,

    /// Number of calls per caller
    #[structopt(short = "r", long, default_value = "100")]
    requests_per_user: usize,

    /// Number of iterations to run
    #[structopt(short, long, default_value = "3")]
    iterations: usize,

    /// Maximum concurrency level
    #[structopt(short = "c", long, default_value = "100")]
    concurrency: usize,

    /// Probability that a simulated call fails (0.0 - 1.0)
    #[structopt(short, long, default_value = "0.1")]
    failure_rate: f64,

    /// Simulated latency of a live call in milliseconds
    #[structopt(short, long, default_value = "1")]
    latency_ms: u64,

    /// Failures before a circuit opens
    #[structopt(long, default_value = "50")]
    threshold: u32,

    /// How long an open circuit stays open, in milliseconds
    #[structopt(long, default_value = "500")]
    recovery_ms: u64,

    /// Share of calls that go through the response cache (0.0 - 1.0)
    #[structopt(long, default_value = "0.0")]
    cache_ratio: f64,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    succeeded: usize,
    cached: usize,
    denied: usize,
    failed: usize,
}

impl Tally {
    fn total(&self) -> usize {
        self.succeeded + self.cached + self.denied + self.failed
    }

    fn add(&mut self, other: Tally) {
        self.succeeded += other.succeeded;
        self.cached += other.cached;
        self.denied += other.denied;
        self.failed += other.failed;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let filter = if opt.disable_logs {
        "guard_bench=error,service_guard=error".to_string()
    } else {
        let log_level = match opt.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        // Per-call breaker events drown the progress bar below debug
        format!("guard_bench={},service_guard=error", log_level)
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(filter))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let circuit = CircuitConfig {
        failure_threshold: opt.threshold,
        recovery_timeout: Duration::from_millis(opt.recovery_ms),
        ..CircuitConfig::default()
    };
    let registry = Arc::new(CircuitBreakerRegistry::new(
        CircuitBreakerSettings::uniform(circuit),
        CacheConfig::default(),
    ));

    run_benchmark(registry, opt).await
}

async fn run_benchmark(
    registry: Arc<CircuitBreakerRegistry>,
    opt: Opt,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("\nRunning benchmark: {} services, {} callers", opt.services, opt.num_users);
    println!("==================");

    let mut total_duration = Duration::from_secs(0);
    let mut total = Tally::default();
    let services: Vec<String> = (0..opt.services.max(1)).map(|i| format!("service_{}", i)).collect();

    for iteration in 0..opt.iterations {
        if !opt.disable_logs {
            info!("Starting iteration {} of {}", iteration + 1, opt.iterations);
        }

        for service in &services {
            registry.reset_circuit(service).await;
        }
        registry.clear_cache();

        let progress = ProgressBar::new((opt.num_users * opt.requests_per_user) as u64);
        progress.set_style(
            ProgressStyle::with_template(
                "{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} calls ({per_sec})",
            )?
            .progress_chars("=> "),
        );

        let start_time = Instant::now();

        // Create a barrier to start all tasks at once
        let barrier = Arc::new(Barrier::new(opt.num_users));
        let concurrency_semaphore = Arc::new(Semaphore::new(opt.concurrency));
        let mut handles = Vec::with_capacity(opt.num_users);

        for user_id in 0..opt.num_users {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            let semaphore = Arc::clone(&concurrency_semaphore);
            let progress = progress.clone();
            let services = services.clone();
            let opt = opt.clone();

            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                let mut tally = Tally::default();

                for request in 0..opt.requests_per_user {
                    let Ok(_permit) = semaphore.acquire().await else {
                        break;
                    };

                    let service = &services[(user_id + request) % services.len()];
                    let mut options = CallOptions::new();
                    if rand::random::<f64>() < opt.cache_ratio {
                        options = options.cache_key(format!("{}:shared", service));
                    }

                    let latency = Duration::from_millis(opt.latency_ms);
                    let failure_rate = opt.failure_rate;
                    let result = registry
                        .call_service(
                            service,
                            || async move {
                                time::sleep(latency).await;
                                if rand::random::<f64>() < failure_rate {
                                    Err("simulated failure")
                                } else {
                                    Ok(json!({ "user": user_id, "request": request }))
                                }
                            },
                            options,
                        )
                        .await;

                    if result.from_cache {
                        tally.cached += 1;
                    } else if result.success {
                        tally.succeeded += 1;
                    } else if result.error.as_ref().is_some_and(|e| e.is_call_denied()) {
                        tally.denied += 1;
                    } else {
                        tally.failed += 1;
                    }
                    progress.inc(1);
                }

                tally
            }));
        }

        let mut iteration_tally = Tally::default();
        for result in futures::future::join_all(handles).await {
            match result {
                Ok(tally) => iteration_tally.add(tally),
                Err(e) => warn!("Caller task failed: {}", e),
            }
        }
        progress.finish_and_clear();

        let elapsed = start_time.elapsed();
        total_duration += elapsed;
        total.add(iteration_tally);

        let calls_per_second = iteration_tally.total() as f64 / elapsed.as_secs_f64();
        println!(
            "Iteration {}: {:?}, {} ok, {} cached, {} denied, {} failed, {:.2} calls/sec",
            iteration + 1,
            elapsed,
            iteration_tally.succeeded,
            iteration_tally.cached,
            iteration_tally.denied,
            iteration_tally.failed,
            calls_per_second
        );
    }

    let calls = total.total().max(1);
    let percent = |n: usize| format!("{} ({:.1}%)", n, 100.0 * n as f64 / calls as f64);

    let mut summary = Table::new();
    summary.set_titles(Row::new(vec![Cell::new("Metric"), Cell::new("Value")]));
    for (metric, value) in [
        ("Total calls", total.total().to_string()),
        ("Succeeded", percent(total.succeeded)),
        ("Served from cache", percent(total.cached)),
        ("Denied by breaker", percent(total.denied)),
        ("Failed", percent(total.failed)),
        (
            "Avg. duration",
            format!("{:?}", total_duration / opt.iterations.max(1) as u32),
        ),
        (
            "Avg. throughput",
            format!("{:.2} calls/sec", total.total() as f64 / total_duration.as_secs_f64()),
        ),
    ] {
        summary.add_row(Row::new(vec![Cell::new(metric), Cell::new(&value)]));
    }

    let mut circuits = Table::new();
    circuits.set_titles(Row::new(vec![
        Cell::new("Service"),
        Cell::new("State"),
        Cell::new("Failures"),
        Cell::new("Calls"),
    ]));
    let mut states: Vec<_> = registry.all_states().await.into_iter().collect();
    states.sort_by(|a, b| a.0.cmp(&b.0));
    for (service, snapshot) in states {
        circuits.add_row(Row::new(vec![
            Cell::new(&service),
            Cell::new(&format!("{:?}", snapshot.state)),
            Cell::new(&snapshot.failure_count.to_string()),
            Cell::new(&snapshot.total_calls.to_string()),
        ]));
    }

    println!("\nBenchmark Results:");
    summary.printstd();
    println!("\nCircuits after the last iteration:");
    circuits.printstd();

    Ok(())
}
