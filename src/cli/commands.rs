//! CLI commands: one binary, multiple roles - `orchestrator` runs the
//! supervisor, `worker` runs a single stage's lease loop, the rest are thin
//! admin-surface calls with `console`-styled feedback matching the
//! teacher's own terminal output.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use console::style;
use tokio::sync::watch;
use tracing::info;

use crate::admin::{AdminReadView, AdminWriteSurface};
use crate::config::Settings;
use crate::queue::{QueueManager, QueueMonitor};
use crate::rate_limit::{NoopRateLimiter, RedisRateLimiter};
use crate::store::SqliteDocumentStore;
use crate::supervisor::PipelineSupervisor;
use crate::worker::clean::CleanHandler;
use crate::worker::fetch::FetchHandler;
use crate::worker::index::{IndexHandler, LoggingVectorStore};
use crate::worker::persist::PersistHandler;
use crate::worker::{Handler, Stage, StageLoop};

#[derive(Parser)]
#[command(name = "sitesearch")]
#[command(about = "Distributed multi-stage website ingestion and indexing pipeline")]
#[command(version)]
pub struct Cli {
    /// Config file path (TOML, layered under env/CLI overrides)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor: launch and monitor every stage's worker pool
    Orchestrator,

    /// Run a single stage's lease loop in this process (spawned by the
    /// orchestrator, but runnable standalone for local development)
    Worker {
        #[arg(long)]
        stage: Stage,
        #[arg(long)]
        redis_url: Option<String>,
    },

    /// Seed a URL into the pipeline's entry queue
    Seed {
        url: String,
        #[arg(long, default_value = "default")]
        site_id: String,
    },

    /// Scale a stage to a target worker count
    Scale {
        #[arg(long)]
        stage: Stage,
        #[arg(long)]
        count: usize,
    },

    /// Restart one worker by id (see `status` for ids)
    Restart {
        #[arg(long)]
        worker_id: u64,
    },

    /// Drain and clear a queue's pending list
    ClearQueue {
        queue: String,
    },

    /// Print a snapshot of stage/queue status
    Status,

    /// Start or stop the background queue-health sampling loop (§6.4)
    Monitor {
        #[arg(long)]
        enable: bool,
    },
}

pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Orchestrator => run_orchestrator(settings, cli.config).await,
        Commands::Worker { stage, redis_url } => {
            run_worker(settings, stage, redis_url).await
        }
        Commands::Seed { url, site_id } => run_seed(settings, url, site_id).await,
        Commands::Scale { stage, count } => run_scale(settings, cli.config, stage, count).await,
        Commands::Restart { worker_id } => run_restart(settings, cli.config, worker_id).await,
        Commands::ClearQueue { queue } => run_clear_queue(settings, queue).await,
        Commands::Status => run_status(settings, cli.config).await,
        Commands::Monitor { enable } => run_toggle_monitoring(settings, cli.config, enable).await,
    }
}

async fn supervisor_for(settings: Settings, config_path: Option<PathBuf>) -> anyhow::Result<Arc<PipelineSupervisor>> {
    let queue = QueueManager::connect_redis(&settings.redis_url).await?;
    let binary = std::env::current_exe()?;
    Ok(PipelineSupervisor::new(settings, queue, binary, config_path))
}

fn monitor_for(settings: &Settings, queue: &QueueManager) -> Arc<QueueMonitor> {
    Arc::new(QueueMonitor::new(
        queue.backend(),
        vec![
            crate::queue::QUEUE_URL.to_string(),
            crate::queue::QUEUE_CRAWL.to_string(),
            crate::queue::QUEUE_CLEAN.to_string(),
            crate::queue::QUEUE_INDEX.to_string(),
        ],
        settings.monitor.clone(),
    ))
}

async fn run_orchestrator(settings: Settings, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let supervisor = supervisor_for(settings, config_path).await?;
    supervisor.initialize_components()?;
    supervisor.start_workers().await?;
    info!("{}", style("pipeline supervisor started").green());

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining workers");
    supervisor.shutdown().await?;
    Ok(())
}

async fn run_worker(settings: Settings, stage: Stage, redis_url: Option<String>) -> anyhow::Result<()> {
    let redis_url = redis_url.unwrap_or(settings.redis_url.clone());
    let queue = QueueManager::connect_redis(&redis_url).await?;
    let stage_config = settings.stage(stage).clone();
    let stage_loop = StageLoop::new(stage, queue.clone(), stage_config);

    let (_stop_tx, stop_rx) = watch::channel(false);

    match stage {
        Stage::Fetch => {
            let rate_limiter: Arc<dyn crate::rate_limit::RateLimiter> =
                match RedisRateLimiter::connect(&redis_url).await {
                    Ok(limiter) => Arc::new(limiter),
                    Err(_) => Arc::new(NoopRateLimiter),
                };
            let handler = FetchHandler::new(settings.fetcher.clone(), rate_limiter, queue)?;
            stage_loop.run(&handler, stop_rx).await;
        }
        Stage::Clean => {
            let store = Arc::new(SqliteDocumentStore::open(&settings.database_path())?);
            let handler = CleanHandler::with_store(store);
            stage_loop.run(&handler, stop_rx).await;
        }
        Stage::Persist => {
            let store = Arc::new(SqliteDocumentStore::open(&settings.database_path())?);
            let handler = PersistHandler::new(store);
            stage_loop.run(&handler, stop_rx).await;
        }
        Stage::Index => {
            let handler = IndexHandler::new(settings.indexer.clone(), Arc::new(LoggingVectorStore));
            stage_loop.run(&handler, stop_rx).await;
        }
    }
    Ok(())
}

async fn run_seed(settings: Settings, url: String, site_id: String) -> anyhow::Result<()> {
    let queue = QueueManager::connect_redis(&settings.redis_url).await?;
    let envelope = crate::envelope::TaskEnvelope::seed(url.clone(), site_id);
    let id = queue.enqueue(crate::queue::QUEUE_URL, envelope, None).await?;
    println!("{} {id}", style("seeded").green());
    Ok(())
}

async fn run_scale(settings: Settings, config_path: Option<PathBuf>, stage: Stage, count: usize) -> anyhow::Result<()> {
    let supervisor = supervisor_for(settings.clone(), config_path).await?;
    let monitor = monitor_for(&settings, supervisor.queue());
    let write = AdminWriteSurface::new(supervisor, monitor);
    write.scale_stage(stage, count).await?;
    println!("{} {} -> {count}", style("scaled").green(), stage.name());
    Ok(())
}

async fn run_restart(settings: Settings, config_path: Option<PathBuf>, worker_id: u64) -> anyhow::Result<()> {
    let supervisor = supervisor_for(settings.clone(), config_path).await?;
    let monitor = monitor_for(&settings, supervisor.queue());
    let write = AdminWriteSurface::new(supervisor, monitor);
    write.restart_worker(worker_id).await?;
    println!("{} worker {worker_id}", style("restarted").green());
    Ok(())
}

async fn run_toggle_monitoring(settings: Settings, config_path: Option<PathBuf>, enable: bool) -> anyhow::Result<()> {
    let supervisor = supervisor_for(settings.clone(), config_path).await?;
    let monitor = monitor_for(&settings, supervisor.queue());
    let write = AdminWriteSurface::new(supervisor, monitor);
    write.toggle_monitoring(enable).await;
    println!(
        "{} monitoring",
        if enable { style("enabled").green() } else { style("disabled").yellow() }
    );
    // Keep the process alive while the toggle takes effect, mirroring
    // `run_orchestrator`'s signal-driven lifetime rather than exiting
    // immediately and tearing the sampling task down with it.
    if enable {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

async fn run_clear_queue(settings: Settings, queue: String) -> anyhow::Result<()> {
    let manager = QueueManager::connect_redis(&settings.redis_url).await?;
    manager.clear_queue(&queue).await?;
    println!("{} {queue}", style("cleared").green());
    Ok(())
}

async fn run_status(settings: Settings, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let supervisor = supervisor_for(settings.clone(), config_path).await?;
    let monitor = monitor_for(&settings, supervisor.queue());
    let view = AdminReadView::new(supervisor, monitor);

    let status = view.status().await?;
    for stage in status.stages {
        println!(
            "{:<8} running={}/{} pending={} processing={} failed={}",
            stage.stage.name(),
            stage.running_count,
            stage.desired_count,
            stage.queue_metrics.pending,
            stage.queue_metrics.processing,
            stage.queue_metrics.failed,
        );
        for worker in &stage.workers {
            match worker.stats {
                Some(stats) => println!(
                    "  worker {:<4} pid={:<8} mem={:.1}MB cpu={:.1}% created={}",
                    worker.id,
                    worker.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                    stats.memory_bytes as f64 / (1024.0 * 1024.0),
                    stats.cpu_percent,
                    worker.started_at.to_rfc3339(),
                ),
                None => println!(
                    "  worker {:<4} pid={:<8} (resource stats unavailable) created={}",
                    worker.id,
                    worker.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                    worker.started_at.to_rfc3339(),
                ),
            }
        }
    }
    Ok(())
}
