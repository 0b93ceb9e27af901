use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use windowguard::config::{BackendKind, GuardConfig};
use windowguard::gate::{AdmissionGate, Outcome};
use windowguard::ratelimit::{
    Clock, DistributedLimiter, LocalLimiter, MemoryStore, MonotonicClock, RateLimiterBackend,
    RedisStore, SystemClock,
};

type Gate = AdmissionGate<dyn RateLimiterBackend>;

#[derive(Parser)]
#[command(name = "windowguard", version, about = "Sliding-window admission control")]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a series of admission decisions for one caller
    Check {
        /// Caller id; omit to exercise the missing-key policy
        #[arg(long)]
        key: Option<String>,

        /// Number of decisions to make
        #[arg(long, default_value_t = 1)]
        count: u32,

        /// Pause between decisions in milliseconds
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,

        /// Print one JSON object per decision
        #[arg(long)]
        json: bool,
    },
    /// Fire simultaneous decisions for one caller and tally the results
    Burst {
        #[arg(long)]
        key: Option<String>,

        #[arg(long, default_value_t = 10)]
        concurrency: usize,
    },
    /// Check that the configured Redis store is reachable
    Ping,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = GuardConfig::load(cli.config.as_deref()).context("loading configuration")?;
    config.validate().context("validating configuration")?;
    info!(
        backend = ?config.store.backend,
        max_requests = config.limit.max_requests,
        window_secs = config.limit.window_secs,
        "Configuration loaded"
    );

    match cli.command {
        Command::Check {
            key,
            count,
            interval_ms,
            json,
        } => {
            let gate = build_gate(&config).await?;
            run_checks(&gate, key, count, Duration::from_millis(interval_ms), json).await;
        }
        Command::Burst { key, concurrency } => {
            let gate = build_gate(&config).await?;
            run_burst(&gate, key, concurrency).await;
        }
        Command::Ping => {
            let store = RedisStore::connect(&config.store.redis_url, config.store.store_timeout()).await?;
            store.ping().await.context("pinging Redis")?;
            println!("PONG");
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Build the gate for the configured backend.
async fn build_gate(config: &GuardConfig) -> anyhow::Result<Gate> {
    let policy = config.gate_policy()?;

    let gate = match config.store.backend {
        BackendKind::Local => {
            let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::default());
            let limiter = Arc::new(LocalLimiter::new());
            if let Some(interval) = config.store.sweep_interval() {
                limiter.spawn_sweeper(interval, clock.clone());
            }
            info!("Using local rate limiter");
            let limiter: Arc<dyn RateLimiterBackend> = limiter;
            AdmissionGate::new(limiter, policy).with_clock(clock)
        }
        BackendKind::Memory => {
            let limiter = DistributedLimiter::new(MemoryStore::new())
                .with_key_prefix(config.store.key_prefix.clone())
                .with_timeout(Some(config.store.store_timeout()));
            info!("Using distributed rate limiter over an in-memory store");
            let limiter: Arc<dyn RateLimiterBackend> = Arc::new(limiter);
            AdmissionGate::new(limiter, policy).with_clock(Arc::new(SystemClock))
        }
        BackendKind::Redis => {
            let store = RedisStore::connect(&config.store.redis_url, config.store.store_timeout())
                .await
                .context("connecting to Redis")?;
            let limiter = DistributedLimiter::new(store)
                .with_key_prefix(config.store.key_prefix.clone())
                .with_timeout(Some(config.store.store_timeout()));
            info!(key_prefix = %config.store.key_prefix, "Using distributed rate limiter");
            let limiter: Arc<dyn RateLimiterBackend> = Arc::new(limiter);
            AdmissionGate::new(limiter, policy).with_clock(Arc::new(SystemClock))
        }
    };

    Ok(gate)
}

async fn run_checks(gate: &Gate, key: Option<String>, count: u32, interval: Duration, json: bool) {
    for attempt in 1..=count {
        let outcome = gate.decide(&key).await;
        print_outcome(attempt, key.as_deref(), &outcome, json);

        if attempt < count && !interval.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = signal::ctrl_c() => {
                    warn!("Received Ctrl+C, stopping early");
                    break;
                }
            }
        }
    }
}

async fn run_burst(gate: &Gate, key: Option<String>, concurrency: usize) {
    let decisions = (0..concurrency).map(|_| gate.decide(&key));
    let outcomes = futures::future::join_all(decisions).await;

    let proceeded = outcomes.iter().filter(|o| o.is_proceed()).count();
    println!(
        "{} of {} requests proceeded, {} rejected",
        proceeded,
        outcomes.len(),
        outcomes.len() - proceeded
    );
}

fn print_outcome(attempt: u32, key: Option<&str>, outcome: &Outcome, json: bool) {
    let key = key.unwrap_or("-");

    if json {
        let value = match outcome {
            Outcome::Proceed => serde_json::json!({
                "attempt": attempt,
                "key": key,
                "outcome": "proceed",
            }),
            Outcome::Rejected(rejection) => serde_json::json!({
                "attempt": attempt,
                "key": key,
                "outcome": "rejected",
                "reason": rejection.reason.as_str(),
                "status": rejection.status_code(),
                "message": rejection.message(),
                "retry_after_secs": rejection.retry_after_secs(),
            }),
            Outcome::LimiterUnavailable { error } => serde_json::json!({
                "attempt": attempt,
                "key": key,
                "outcome": "limiter_unavailable",
                "error": error,
            }),
        };
        println!("{}", value);
        return;
    }

    match outcome {
        Outcome::Proceed => println!("#{} {} proceed", attempt, key),
        Outcome::Rejected(rejection) => {
            let retry = rejection
                .retry_after_secs()
                .map(|secs| format!(" retry_after={}s", secs))
                .unwrap_or_default();
            println!(
                "#{} {} rejected {} status={}{}",
                attempt,
                key,
                rejection.reason.as_str(),
                rejection.status_code(),
                retry
            );
        }
        Outcome::LimiterUnavailable { error } => {
            println!("#{} {} limiter_unavailable: {}", attempt, key, error)
        }
    }
}
