use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use querywatch::config::{LogFormat, LoggingConfig, QueryWatchConfig};
use querywatch::diagnostics::{InstrumentedExecutor, QueryDiagnostics};
use querywatch::simulate::{run_simulation, Latency, SimulatedDatabase, SimulationPlan};

/// Drive simulated requests through the query diagnostics.
#[derive(Debug, Parser)]
#[command(name = "querywatch", version, about)]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of simulated requests
    #[arg(long, default_value_t = 20)]
    requests: usize,

    /// Queries issued by each request
    #[arg(long, default_value_t = 8)]
    queries: usize,

    /// Requests in flight at once
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Shortest simulated query latency in milliseconds
    #[arg(long, default_value_t = 5)]
    min_latency_ms: u64,

    /// Longest simulated query latency in milliseconds
    #[arg(long, default_value_t = 120)]
    max_latency_ms: u64,

    /// Make every n-th query of a request fail
    #[arg(long)]
    fail_every: Option<usize>,

    /// Override the per-request query count budget
    #[arg(long)]
    max_query_count: Option<u64>,

    /// Fail requests on violations instead of logging
    #[arg(long)]
    throw_on_violation: bool,

    /// Log filter, e.g. `debug` or `querywatch=trace`
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = QueryWatchConfig::load(args.config.as_deref())?;
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.format = LogFormat::Json;
    }
    if let Some(max) = args.max_query_count {
        config.diagnostics.max_query_count = max;
    }
    if args.throw_on_violation {
        config.diagnostics.throw_on_violation = true;
    }

    init_tracing(&config.logging);

    info!("Starting querywatch simulation");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(diagnostics = ?config.diagnostics, "Configuration loaded");

    let diagnostics = Arc::new(QueryDiagnostics::new(config.diagnostics.clone()));
    let database = SimulatedDatabase::new(Latency::Uniform {
        min: Duration::from_millis(args.min_latency_ms),
        max: Duration::from_millis(args.max_latency_ms),
    })
    .with_fail_marker(querywatch::simulate::FAILING_TABLE);
    let executor = Arc::new(InstrumentedExecutor::new(database, diagnostics));

    let plan = SimulationPlan {
        requests: args.requests,
        queries_per_request: args.queries,
        concurrency: args.concurrency,
        fail_every: args.fail_every,
        ..Default::default()
    };

    let outcomes = run_simulation(executor, &plan).await?;
    for outcome in &outcomes {
        println!("{}", serde_json::to_string(outcome)?);
    }

    let dumps: u64 = outcomes.iter().map(|o| o.summary.dumps_emitted).sum();
    let requested: u64 = outcomes.iter().map(|o| o.summary.dumps_requested).sum();
    let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
    info!(
        requests = outcomes.len(),
        dumps_emitted = dumps,
        dumps_requested = requested,
        failed_requests = failed,
        "Simulation finished"
    );
    Ok(())
}

/// Install the global tracing subscriber.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
