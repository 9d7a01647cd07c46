//! Pipeline Supervisor (§4.3): launches, scales, restarts and monitors the
//! OS-level worker processes for each stage, and exposes the read/write
//! surfaces the admin layer consults.

pub mod error;
pub mod resources;
pub mod stall;
pub mod worker_pool;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::info;

use crate::config::Settings;
use crate::envelope::TaskEnvelope;
use crate::queue::{QueueManager, QueueMetrics};
use crate::worker::Stage;

pub use error::SupervisorError;
use resources::{ProcessStats, ResourceSampler};
use stall::StallSweeper;
use worker_pool::WorkerPool;

const ALL_STAGES: [Stage; 4] = [Stage::Fetch, Stage::Clean, Stage::Persist, Stage::Index];

/// One running worker process as reported by `get_status` (§6.3
/// `workers[]`: pid, memory_rss_mb, cpu_percent, create_time).
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub id: u64,
    pub pid: Option<u32>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub stats: Option<ProcessStats>,
}

#[derive(Debug, Clone)]
pub struct StageStatus {
    pub stage: Stage,
    pub desired_count: usize,
    pub running_count: usize,
    pub queue_metrics: QueueMetrics,
    pub workers: Vec<WorkerStatus>,
}

#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub stages: Vec<StageStatus>,
}

pub struct PipelineSupervisor {
    settings: Settings,
    queue: QueueManager,
    binary_path: PathBuf,
    config_path: Option<PathBuf>,
    pool: Mutex<WorkerPool>,
    sampler: Mutex<ResourceSampler>,
    running: std::sync::atomic::AtomicBool,
    stall_sweeper: Mutex<Option<(Arc<StallSweeper>, tokio::task::JoinHandle<()>)>>,
}

impl PipelineSupervisor {
    pub fn new(
        settings: Settings,
        queue: QueueManager,
        binary_path: PathBuf,
        config_path: Option<PathBuf>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            queue,
            binary_path,
            config_path,
            pool: Mutex::new(WorkerPool::new()),
            sampler: Mutex::new(ResourceSampler::new()),
            running: std::sync::atomic::AtomicBool::new(false),
            stall_sweeper: Mutex::new(None),
        })
    }

    /// Idempotent first-time setup: the queue backend and document store
    /// are lazily created elsewhere, so today this only guards against a
    /// double `start_workers` call.
    pub fn initialize_components(&self) -> Result<(), SupervisorError> {
        Ok(())
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    /// Launch `desired_count` worker processes for every stage (§4.3).
    pub async fn start_workers(&self) -> Result<(), SupervisorError> {
        if self.running.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return Err(SupervisorError::AlreadyRunning);
        }

        {
            let mut pool = self.pool.lock().await;
            for stage in ALL_STAGES {
                let desired = self.settings.stage(stage).desired_count;
                for _ in 0..desired {
                    self.spawn_one(&mut pool, stage)?;
                }
            }
        }

        let retry_max = [
            (Stage::Fetch, self.settings.fetch.retry_max),
            (Stage::Clean, self.settings.clean.retry_max),
            (Stage::Persist, self.settings.persist.retry_max),
            (Stage::Index, self.settings.index.retry_max),
        ];
        let sweeper = Arc::new(StallSweeper::new(
            self.queue.clone(),
            self.settings.monitor.activity_timeout,
            retry_max,
        ));
        let handle = sweeper.clone().start(self.settings.monitor.sample_interval);
        *self.stall_sweeper.lock().await = Some((sweeper, handle));

        Ok(())
    }

    fn spawn_one(&self, pool: &mut WorkerPool, stage: Stage) -> Result<u64, SupervisorError> {
        pool.spawn(
            stage,
            &self.binary_path,
            &self.settings.redis_url,
            self.config_path.as_deref(),
        )
        .map_err(|e| SupervisorError::SpawnFailed(e.to_string()))
    }

    /// Scale `stage` to exactly `target_count` replicas, blocking until the
    /// pool converges or `scale_timeout` elapses (§4.3, §5 `ScaleTimeout`).
    pub async fn scale(&self, stage: Stage, target_count: usize) -> Result<(), SupervisorError> {
        let deadline = tokio::time::Instant::now() + self.settings.scale_timeout;

        loop {
            let current = {
                let mut pool = self.pool.lock().await;
                let current = pool.count_for_stage(stage);
                if current < target_count {
                    self.spawn_one(&mut pool, stage)?;
                } else if current > target_count {
                    if let Some(id) = pool.ids_for_stage(stage).first().copied() {
                        pool.request_stop(id).ok();
                        tokio::time::sleep(self.settings.drain_timeout.min(Duration::from_secs(5))).await;
                        pool.kill(id).await.ok();
                    }
                }
                pool.count_for_stage(stage)
            };

            if current == target_count {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SupervisorError::ScaleTimeout(self.settings.scale_timeout));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Restart one worker by id (§4.3/§6.4 "restart a worker by id"): stop
    /// it, wait for the drain timeout, then spawn a fresh replacement for
    /// the same stage.
    pub async fn restart(&self, worker_id: u64) -> Result<(), SupervisorError> {
        let mut pool = self.pool.lock().await;
        let stage = pool
            .get(worker_id)
            .map(|w| w.stage)
            .ok_or(SupervisorError::UnknownWorker(worker_id))?;

        pool.request_stop(worker_id).ok();
        tokio::time::sleep(self.settings.drain_timeout.min(Duration::from_secs(5))).await;
        pool.kill(worker_id).await.ok();

        self.spawn_one(&mut pool, stage)?;
        Ok(())
    }

    /// Seed a URL into the pipeline's entry queue (§6.4 write surface).
    pub async fn add_url_to_queue(&self, url: impl Into<String>, site_id: impl Into<String>) -> anyhow::Result<String> {
        let envelope = TaskEnvelope::seed(url, site_id);
        Ok(self.queue.enqueue(crate::queue::QUEUE_URL, envelope, None).await?)
    }

    /// Stop every worker process, waiting up to `drain_timeout` before
    /// escalating to a hard kill (§5).
    pub async fn shutdown(&self) -> Result<(), SupervisorError> {
        if let Some((sweeper, handle)) = self.stall_sweeper.lock().await.take() {
            sweeper.stop();
            handle.abort();
        }

        let mut pool = self.pool.lock().await;
        let ids = pool.all_ids();
        for id in &ids {
            pool.request_stop(*id).ok();
        }
        tokio::time::sleep(self.settings.drain_timeout).await;
        for id in ids {
            pool.kill(id).await.ok();
        }
        self.running.store(false, std::sync::atomic::Ordering::SeqCst);
        info!("pipeline supervisor shut down");
        Ok(())
    }

    pub async fn get_status(&self) -> anyhow::Result<StatusSnapshot> {
        let pool = self.pool.lock().await;
        let mut stages = Vec::with_capacity(ALL_STAGES.len());
        for stage in ALL_STAGES {
            let queue_metrics = self.queue.get_queue_metrics(stage.input_queue()).await?;

            let mut workers = Vec::new();
            for descriptor in pool.for_stage(stage) {
                let pid = descriptor.pid();
                let stats = match pid {
                    Some(pid) => self.process_stats(pid).await,
                    None => None,
                };
                workers.push(WorkerStatus { id: descriptor.id, pid, started_at: descriptor.started_at, stats });
            }

            stages.push(StageStatus {
                stage,
                desired_count: self.settings.stage(stage).desired_count,
                running_count: workers.len(),
                queue_metrics,
                workers,
            });
        }
        Ok(StatusSnapshot { stages })
    }

    pub async fn process_stats(&self, pid: u32) -> Option<ProcessStats> {
        self.sampler.lock().await.sample(pid)
    }
}
