//! Stall sweep (§4.3 "Recommended policy", §5 "at-least-once processing",
//! §8 scenario S4): a worker that dies between `dequeue` and
//! `complete_task`/`fail_task` leaves its task stuck in the processing set
//! forever, since the Queue Manager has no server-side lease TTL (§9 Open
//! Questions). This periodically scans each stage's processing set for
//! tasks whose `started_at` has aged past the stall timeout and reclaims
//! them via `fail_task(..., retry=...)`, subject to the stage's own retry
//! ceiling - the same interval-tick + stop-channel shape `QueueMonitor`
//! uses for its own sampling loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::queue::QueueManager;
use crate::worker::Stage;

const ALL_STAGES: [Stage; 4] = [Stage::Fetch, Stage::Clean, Stage::Persist, Stage::Index];

pub struct StallSweeper {
    queue: QueueManager,
    stall_timeout: Duration,
    retry_max: [(Stage, u32); 4],
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl StallSweeper {
    pub fn new(queue: QueueManager, stall_timeout: Duration, retry_max: [(Stage, u32); 4]) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self { queue, stall_timeout, retry_max, stop_tx, stop_rx }
    }

    fn retry_max_for(&self, stage: Stage) -> u32 {
        self.retry_max
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, n)| *n)
            .unwrap_or(3)
    }

    /// Scan every stage's input queue once and reclaim stalled leases.
    /// Returns the number of tasks reclaimed, for tests and for the
    /// calling loop's logging.
    pub async fn sweep_once(&self) -> usize {
        let mut reclaimed = 0;
        for stage in ALL_STAGES {
            let queue_name = stage.input_queue();
            let processing = match self.queue.list_processing(queue_name).await {
                Ok(tasks) => tasks,
                Err(e) => {
                    warn!(queue = queue_name, "stall sweep: list_processing failed: {e}");
                    continue;
                }
            };

            for task in processing {
                let Some(started_at) = task.started_at else {
                    continue;
                };
                let age = Utc::now() - started_at;
                let Ok(age) = age.to_std() else { continue };
                if age < self.stall_timeout {
                    continue;
                }

                let retry = task.retry_count < self.retry_max_for(stage);
                info!(
                    queue = queue_name,
                    task_id = %task.id,
                    retry_count = task.retry_count,
                    retry,
                    "stall sweep reclaiming task"
                );
                if let Err(e) = self
                    .queue
                    .fail_task(queue_name, &task.id, "stalled: lease reclaimed by stall sweep", retry)
                    .await
                {
                    warn!(queue = queue_name, task_id = %task.id, "stall sweep: fail_task failed: {e}");
                    continue;
                }
                reclaimed += 1;
            }
        }
        reclaimed
    }

    /// Start the periodic sweep as a background task.
    pub fn start(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let mut ticker = tokio::time::interval(interval);
        let mut stop_rx = self.stop_rx.clone();
        let sweeper = self;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                        let n = sweeper.sweep_once().await;
                        if n > 0 {
                            info!(reclaimed = n, "stall sweep reclaimed stalled leases");
                        }
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::TaskEnvelope;
    use crate::queue::tests::fake::FakeQueueBackend;
    use crate::queue::TaskStatus;

    fn retry_max(n: u32) -> [(Stage, u32); 4] {
        [(Stage::Fetch, n), (Stage::Clean, n), (Stage::Persist, n), (Stage::Index, n)]
    }

    #[tokio::test]
    async fn reclaims_a_task_stuck_past_the_stall_timeout() {
        let queue = QueueManager::new(Arc::new(FakeQueueBackend::new()));
        let env = TaskEnvelope::seed("https://example.com/", "demo");
        let id = queue.enqueue(Stage::Fetch.input_queue(), env, None).await.unwrap();
        queue
            .dequeue(Stage::Fetch.input_queue(), false, Duration::from_millis(10))
            .await
            .unwrap()
            .expect("leased");

        // The fake backend stamps `started_at` at dequeue time, so a
        // zero-duration stall timeout is already "expired".
        let sweeper = StallSweeper::new(queue.clone(), Duration::from_millis(0), retry_max(3));
        let reclaimed = sweeper.sweep_once().await;
        assert_eq!(reclaimed, 1);

        let status = queue.get_task_status(&id).await.unwrap();
        assert_eq!(status.status, TaskStatus::Pending);
        assert_eq!(status.retry_count, 1);
    }

    #[tokio::test]
    async fn leaves_a_fresh_lease_untouched() {
        let queue = QueueManager::new(Arc::new(FakeQueueBackend::new()));
        let env = TaskEnvelope::seed("https://example.com/", "demo");
        let id = queue.enqueue(Stage::Fetch.input_queue(), env, None).await.unwrap();
        queue
            .dequeue(Stage::Fetch.input_queue(), false, Duration::from_millis(10))
            .await
            .unwrap();

        let sweeper = StallSweeper::new(queue.clone(), Duration::from_secs(3600), retry_max(3));
        let reclaimed = sweeper.sweep_once().await;
        assert_eq!(reclaimed, 0);

        let status = queue.get_task_status(&id).await.unwrap();
        assert_eq!(status.status, TaskStatus::Processing);
    }

    #[tokio::test]
    async fn exhausted_retry_ceiling_moves_to_failed_instead_of_retrying() {
        let queue = QueueManager::new(Arc::new(FakeQueueBackend::new()));
        let env = TaskEnvelope::seed("https://example.com/", "demo");
        let id = queue.enqueue(Stage::Fetch.input_queue(), env, None).await.unwrap();
        queue
            .dequeue(Stage::Fetch.input_queue(), false, Duration::from_millis(10))
            .await
            .unwrap();

        // retry_max = 0: the first stall sweep already exhausts the ceiling.
        let sweeper = StallSweeper::new(queue.clone(), Duration::from_millis(0), retry_max(0));
        sweeper.sweep_once().await;

        let status = queue.get_task_status(&id).await.unwrap();
        assert_eq!(status.status, TaskStatus::Failed);
    }
}
