use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ratebreaker::breaker::{CircuitBreakerManager, CircuitStatus, RateType};
use ratebreaker::config::{LogFormat, LoggingConfig, RateBreakerConfig};
use ratebreaker::error::GuardedError;
use ratebreaker::metrics::{ManualClock, MeterSnapshot, MetricRegistry, TICK_INTERVAL};

#[derive(Debug, Parser)]
#[command(name = "ratebreaker", version, about = "Rate-based circuit breaker tooling")]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON regardless of configuration
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration and print the registered circuits
    Check,
    /// Drive a circuit with simulated failures on a simulated clock
    Simulate(SimulateArgs),
}

#[derive(Debug, Args)]
struct SimulateArgs {
    /// Circuit to exercise
    #[arg(long, default_value = "simulated.operation")]
    name: String,

    /// Number of call rounds
    #[arg(long, default_value_t = 100)]
    rounds: u32,

    /// Concurrent calls per round
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Probability that a call fails
    #[arg(long, default_value_t = 1.0)]
    failure_ratio: f64,

    /// Simulated time between rounds, in milliseconds
    #[arg(long, default_value_t = 250)]
    interval_ms: u64,

    /// Simulated idle time after the last round, in seconds
    #[arg(long, default_value_t = 300)]
    cooldown_secs: u64,

    /// Seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = RateBreakerConfig::load(cli.config.as_deref())?;
    init_tracing(&config.logging, cli.json_logs);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting ratebreaker");
    info!(
        threshold = config.circuit_breaker.threshold,
        rate_type = %config.circuit_breaker.rate_type,
        circuits = config.circuit_breaker.circuits.len(),
        "Configuration loaded"
    );

    match cli.command {
        Command::Check => check(&config),
        Command::Simulate(args) => simulate(&config, args).await,
    }
}

/// Install the global subscriber. Logs go to stderr so stdout stays JSON.
fn init_tracing(logging: &LoggingConfig, force_json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if force_json || logging.format == LogFormat::Json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[derive(Debug, Serialize)]
struct CheckReport {
    threshold: f64,
    rate_type: RateType,
    track_rejections: bool,
    circuits: Vec<CircuitStatus>,
}

fn check(config: &RateBreakerConfig) -> anyhow::Result<()> {
    let cb = &config.circuit_breaker;
    let manager = CircuitBreakerManager::from_config(Arc::new(MetricRegistry::new()), cb)?;

    let report = CheckReport {
        threshold: cb.threshold,
        rate_type: cb.rate_type,
        track_rejections: cb.track_rejections,
        circuits: manager.statuses(),
    };
    info!(circuits = report.circuits.len(), "Configuration is valid");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[derive(Debug, thiserror::Error)]
#[error("simulated failure")]
struct SimulatedFailure;

#[derive(Debug, Default, Serialize)]
struct SimulationReport {
    succeeded: u64,
    failed: u64,
    rejected: u64,
    transitions: Vec<Transition>,
}

#[derive(Debug, Serialize)]
struct Transition {
    /// Simulated milliseconds since the start of the run
    at_ms: u64,
    open: bool,
}

#[derive(Debug, Serialize)]
struct SimulationOutput {
    report: SimulationReport,
    status: Option<CircuitStatus>,
    meters: Vec<MeterSnapshot>,
}

async fn simulated_call(fails: bool) -> Result<(), SimulatedFailure> {
    tokio::task::yield_now().await;
    if fails {
        Err(SimulatedFailure)
    } else {
        Ok(())
    }
}

async fn simulate(config: &RateBreakerConfig, args: SimulateArgs) -> anyhow::Result<()> {
    anyhow::ensure!(
        (0.0..=1.0).contains(&args.failure_ratio),
        "failure ratio must be between 0 and 1, got {}",
        args.failure_ratio
    );
    anyhow::ensure!(args.concurrency > 0, "concurrency must be at least 1");

    let clock = ManualClock::new();
    let catalog = Arc::new(MetricRegistry::with_clock(Arc::new(clock.clone())));
    let manager = CircuitBreakerManager::from_config(Arc::clone(&catalog), &config.circuit_breaker)?;
    manager.register(
        &args.name,
        config.circuit_breaker.circuits.get(&args.name).copied(),
    )?;

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut report = SimulationReport::default();
    let mut elapsed = Duration::ZERO;
    let mut open = manager.is_open(&args.name);

    info!(
        circuit = %args.name,
        rounds = args.rounds,
        concurrency = args.concurrency,
        failure_ratio = args.failure_ratio,
        "Starting simulation"
    );

    let step = Duration::from_millis(args.interval_ms);
    for _ in 0..args.rounds {
        let calls: Vec<_> = (0..args.concurrency)
            .map(|_| rng.gen_bool(args.failure_ratio))
            .map(|fails| manager.wrap_guarded_async(&args.name, simulated_call(fails)))
            .collect();

        for outcome in join_all(calls).await {
            match outcome {
                Ok(()) => report.succeeded += 1,
                Err(GuardedError::Operation(_)) => report.failed += 1,
                Err(GuardedError::Open(_)) => report.rejected += 1,
            }
        }

        clock.advance(step);
        elapsed += step;
        record_transition(&manager, &args.name, elapsed, &mut open, &mut report);
    }

    let cooldown_end = elapsed + Duration::from_secs(args.cooldown_secs);
    while elapsed < cooldown_end {
        clock.advance(TICK_INTERVAL);
        elapsed += TICK_INTERVAL;
        record_transition(&manager, &args.name, elapsed, &mut open, &mut report);
    }

    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        rejected = report.rejected,
        "Simulation finished"
    );

    let output = SimulationOutput {
        report,
        status: manager.status(&args.name),
        meters: catalog.snapshot(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn record_transition(
    manager: &CircuitBreakerManager,
    name: &str,
    elapsed: Duration,
    open: &mut bool,
    report: &mut SimulationReport,
) {
    let now_open = manager.is_open(name);
    if now_open == *open {
        return;
    }
    *open = now_open;
    let at_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    info!(
        circuit = %name,
        at_ms,
        state = if now_open { "open" } else { "closed" },
        "Circuit state changed"
    );
    report.transitions.push(Transition {
        at_ms,
        open: now_open,
    });
}
