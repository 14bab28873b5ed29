//! Clip Worker CLI
//!
//! Runs a discovery or render worker against the shared Postgres queue, or
//! audits the queue for parent jobs that lag their tasks.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clip_worker::db::{create_pool_from_env, PgStore, WorkStore};
use clip_worker::worker::{
    resolve_worker_id, setup_signal_handler, HeartbeatReporter, WorkerConfig, WorkerRole,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "clip-worker")]
#[command(about = "Claim and process clip discovery and render jobs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Claim `discover` jobs and fan them out into render jobs
    Discover(RunArgs),

    /// Claim render tasks and render them
    Render(RunArgs),

    /// Report parent jobs that lag their task and the latest heartbeats
    Audit {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Poll interval in seconds when the queue is empty
    #[arg(short, long, default_value = "5")]
    poll_interval: u64,

    /// Heartbeat interval in seconds
    #[arg(long, default_value = "30")]
    heartbeat_interval: u64,

    /// Lease duration in seconds
    #[arg(short, long, default_value = "600")]
    lease: u64,

    /// Task timeout in seconds
    #[arg(short, long, default_value = "300")]
    timeout: u64,

    /// Worker identity (default: WORKER_ID or a generated one)
    #[arg(long)]
    worker_id: Option<String>,

    /// Process at most one item and exit (for testing)
    #[arg(long)]
    once: bool,
}

impl RunArgs {
    fn config(&self) -> clip_worker::Result<WorkerConfig> {
        WorkerConfig::builder()
            .poll_interval_secs(self.poll_interval)
            .heartbeat_interval(Duration::from_secs(self.heartbeat_interval))
            .lease_duration(Duration::from_secs(self.lease))
            .task_timeout(Duration::from_secs(self.timeout))
            .build()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging; RUST_LOG overrides the default level
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Discover(args) => run_worker(WorkerRole::Discovery, args).await?,
        Commands::Render(args) => run_worker(WorkerRole::Render, args).await?,
        Commands::Audit { json } => audit(json).await?,
    }

    Ok(())
}

async fn run_worker(role: WorkerRole, args: RunArgs) -> Result<()> {
    info!("Initializing {} worker...", role);

    let config = args.config()?;
    let worker_id = resolve_worker_id(role, args.worker_id.clone())?;

    let pool = create_pool_from_env().await?;
    info!("Database connection established");
    let store: Arc<dyn WorkStore> = Arc::new(PgStore::new(pool));

    let runner = clip_worker::build_runner(role, store.clone(), config.clone(), &worker_id)?;

    if args.once {
        info!("Running in single-item mode...");
        match runner.run_once().await {
            Ok(true) => println!("Item processed"),
            Ok(false) => println!("No eligible items found"),
            Err(e) => {
                eprintln!("Error processing item: {}", e);
                return Err(e.into());
            }
        }
        return Ok(());
    }

    let heartbeat =
        HeartbeatReporter::new(store, &worker_id, role, config.heartbeat_interval).spawn();

    // Setup graceful shutdown
    setup_signal_handler(runner.shutdown_handle());

    let result = runner.run().await;
    heartbeat.abort();
    result?;

    Ok(())
}

async fn audit(json: bool) -> Result<()> {
    let pool = create_pool_from_env().await?;
    let store = PgStore::new(pool);

    let lagging = store.find_lagging_parents().await?;
    let heartbeats = store.latest_heartbeats().await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "lagging_parents": lagging,
                "heartbeats": heartbeats,
            }))?
        );
        return Ok(());
    }

    println!("=== Lagging parents ({}) ===", lagging.len());
    for row in &lagging {
        println!(
            "  - job {} is {} but task {} is {}",
            row.job_id, row.job_status, row.task_id, row.task_status
        );
    }
    println!();

    println!("=== Workers ({}) ===", heartbeats.len());
    for beat in &heartbeats {
        println!(
            "  - {} last seen {} ({})",
            beat.worker_id,
            beat.created_at.to_rfc3339(),
            beat.message
        );
    }

    Ok(())
}
