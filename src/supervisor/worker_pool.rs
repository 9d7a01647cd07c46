//! Worker process pool (§4.3): spawns, tracks and stops OS-level worker
//! processes, one per stage replica. Workers are re-executions of the same
//! binary with a `worker --stage <stage>` subcommand, matching the
//! single-binary-many-roles shape the teacher's own CLI uses for its
//! scrape/server/db subcommands.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::worker::Stage;

pub struct WorkerDescriptor {
    pub id: u64,
    pub stage: Stage,
    pub child: Child,
    pub started_at: DateTime<Utc>,
}

impl WorkerDescriptor {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

/// Tracks the live set of worker processes per stage, keyed by a
/// supervisor-assigned id (not the OS pid, which is recycled).
#[derive(Default)]
pub struct WorkerPool {
    next_id: u64,
    workers: HashMap<u64, WorkerDescriptor>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count_for_stage(&self, stage: Stage) -> usize {
        self.workers.values().filter(|w| w.stage == stage).count()
    }

    pub fn ids_for_stage(&self, stage: Stage) -> Vec<u64> {
        self.workers
            .values()
            .filter(|w| w.stage == stage)
            .map(|w| w.id)
            .collect()
    }

    /// Live worker descriptors for `stage`, oldest-spawned first - the
    /// order the status snapshot (§6.3) lists a stage's `workers[]` in.
    pub fn for_stage(&self, stage: Stage) -> Vec<&WorkerDescriptor> {
        let mut workers: Vec<&WorkerDescriptor> =
            self.workers.values().filter(|w| w.stage == stage).collect();
        workers.sort_by_key(|w| w.id);
        workers
    }

    /// Spawn one worker process for `stage`, re-executing the current
    /// binary with a `worker` subcommand.
    pub fn spawn(
        &mut self,
        stage: Stage,
        binary: &std::path::Path,
        redis_url: &str,
        config_path: Option<&std::path::Path>,
    ) -> anyhow::Result<u64> {
        let mut cmd = Command::new(binary);
        cmd.arg("worker")
            .arg("--stage")
            .arg(stage.name())
            .arg("--redis-url")
            .arg(redis_url)
            .kill_on_drop(true);
        if let Some(path) = config_path {
            cmd.arg("--config").arg(path);
        }

        let child = cmd.spawn()?;
        let id = self.next_id;
        self.next_id += 1;
        info!(stage = %stage, worker_id = id, pid = ?child.id(), "spawned worker process");
        self.workers.insert(id, WorkerDescriptor { id, stage, child, started_at: Utc::now() });
        Ok(id)
    }

    /// Send a cooperative stop signal (SIGTERM) and remove the descriptor.
    /// The caller is responsible for waiting out the drain timeout before
    /// escalating to a hard kill.
    #[cfg(unix)]
    pub fn request_stop(&mut self, id: u64) -> anyhow::Result<()> {
        if let Some(worker) = self.workers.get(&id) {
            if let Some(pid) = worker.pid() {
                let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
                if result != 0 {
                    warn!(worker_id = id, pid, "SIGTERM delivery failed");
                }
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn request_stop(&mut self, _id: u64) -> anyhow::Result<()> {
        Ok(())
    }

    pub async fn kill(&mut self, id: u64) -> anyhow::Result<()> {
        if let Some(mut worker) = self.workers.remove(&id) {
            let _ = worker.child.kill().await;
        }
        Ok(())
    }

    pub fn remove(&mut self, id: u64) -> Option<WorkerDescriptor> {
        self.workers.remove(&id)
    }

    pub fn all_ids(&self) -> Vec<u64> {
        self.workers.keys().copied().collect()
    }

    pub fn get(&self, id: u64) -> Option<&WorkerDescriptor> {
        self.workers.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_for_stage_tracks_only_that_stage() {
        let pool = WorkerPool::new();
        assert_eq!(pool.count_for_stage(Stage::Fetch), 0);
    }
}
