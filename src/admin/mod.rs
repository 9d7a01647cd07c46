//! Admin surface (§6.3 read / §6.4 write). An HTTP admin API and browser UI
//! are explicit Non-goals (§1); this module is the plain in-process
//! contract those surfaces would sit behind, directly usable from the CLI
//! or embedded by an operator's own tooling.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::queue::{QueueHealthStatus, QueueMonitor};
use crate::supervisor::{PipelineSupervisor, StatusSnapshot, SupervisorError};
use crate::worker::Stage;

/// §6.3 read surface: a point-in-time view of the pipeline.
pub struct AdminReadView {
    supervisor: Arc<PipelineSupervisor>,
    monitor: Arc<QueueMonitor>,
}

impl AdminReadView {
    pub fn new(supervisor: Arc<PipelineSupervisor>, monitor: Arc<QueueMonitor>) -> Self {
        Self { supervisor, monitor }
    }

    pub async fn status(&self) -> anyhow::Result<StatusSnapshot> {
        self.supervisor.get_status().await
    }

    pub async fn queue_health(&self) -> anyhow::Result<Vec<QueueHealthStatus>> {
        Ok(self.monitor.sample_once().await?)
    }
}

/// §6.4 write surface: the operator-facing mutations the supervisor
/// exposes - seed a URL, scale/restart a stage, clear a queue, toggle
/// monitoring.
pub struct AdminWriteSurface {
    supervisor: Arc<PipelineSupervisor>,
    monitor: Arc<QueueMonitor>,
    monitor_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AdminWriteSurface {
    pub fn new(supervisor: Arc<PipelineSupervisor>, monitor: Arc<QueueMonitor>) -> Self {
        Self { supervisor, monitor, monitor_handle: Mutex::new(None) }
    }

    /// §6.4 "Toggle monitoring": start or stop the background sampling
    /// loop. Idempotent - enabling an already-running monitor or disabling
    /// an already-stopped one is a no-op.
    pub async fn toggle_monitoring(&self, enable: bool) {
        let mut handle = self.monitor_handle.lock().await;
        match (enable, handle.is_some()) {
            (true, false) => *handle = Some(self.monitor.clone().start()),
            (false, true) => {
                self.monitor.stop();
                if let Some(h) = handle.take() {
                    h.abort();
                }
            }
            _ => {}
        }
    }

    pub async fn seed_url(&self, url: impl Into<String>, site_id: impl Into<String>) -> anyhow::Result<String> {
        self.supervisor.add_url_to_queue(url, site_id).await
    }

    pub async fn scale_stage(&self, stage: Stage, target_count: usize) -> Result<(), SupervisorError> {
        self.supervisor.scale(stage, target_count).await
    }

    /// Restart a specific worker by id (§6.4) - the supervisor looks up the
    /// worker's stage itself, so the caller only needs the id from a prior
    /// `status()` call.
    pub async fn restart_worker(&self, worker_id: u64) -> Result<(), SupervisorError> {
        self.supervisor.restart(worker_id).await
    }

    pub async fn clear_queue(&self, queue: &str) -> anyhow::Result<bool> {
        Ok(self.supervisor_queue().clear_queue(queue).await?)
    }

    fn supervisor_queue(&self) -> &crate::queue::QueueManager {
        // Narrow accessor so `AdminWriteSurface` doesn't need its own
        // `QueueManager` handle threaded in separately from the supervisor.
        self.supervisor.queue()
    }
}
