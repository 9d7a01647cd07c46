//! Handler base and the shared stage loop (§4.4).
//!
//! All four stages share one loop, differing only in which queues they
//! read from/write to and which `Handler` they bind. This mirrors the
//! `PipelineStage`/`PipelineRunner` split the teacher project uses for its
//! own batch pipelines, generalized from "drain a DB table" to "lease from
//! a queue".

pub mod clean;
pub mod fetch;
pub mod index;
pub mod persist;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::StageConfig;
use crate::envelope::TaskEnvelope;
use crate::queue::{QueueManager, QueueTask};

/// The closed tagged set of pipeline stages (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Stage {
    Fetch,
    Clean,
    Persist,
    Index,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Clean => "clean",
            Stage::Persist => "persist",
            Stage::Index => "index",
        }
    }

    pub fn input_queue(&self) -> &'static str {
        match self {
            Stage::Fetch => crate::queue::QUEUE_URL,
            Stage::Clean => crate::queue::QUEUE_CRAWL,
            Stage::Persist => crate::queue::QUEUE_CLEAN,
            Stage::Index => crate::queue::QUEUE_INDEX,
        }
    }

    pub fn output_queue(&self) -> Option<&'static str> {
        match self {
            Stage::Fetch => Some(crate::queue::QUEUE_CRAWL),
            Stage::Clean => Some(crate::queue::QUEUE_CLEAN),
            Stage::Persist => Some(crate::queue::QUEUE_INDEX),
            Stage::Index => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Errors a `Handler::process` implementation may raise (§4.4, §7).
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Retry up to the stage's cap, then fail permanently (connect/timeout,
    /// 5xx, 429, transient downstream errors).
    #[error("transient: {0}")]
    Transient(String),
    /// Move straight to failed (4xx other than 429, parse failures beyond
    /// fallback, malformed input).
    #[error("permanent: {0}")]
    Permanent(String),
}

/// Point-in-time counters a handler may expose for the admin status surface
/// (§6.3 `config`/worker stats).
#[derive(Debug, Clone, Default)]
pub struct HandlerStats {
    pub processed: u64,
    pub failed: u64,
}

/// The capability every stage handler implements (§9): `process` plus
/// optional lifecycle hooks. `on_start`/`on_stop` default to no-ops so
/// simple handlers don't need boilerplate overrides.
#[async_trait]
pub trait Handler: Send + Sync {
    /// `retry_count` is the task's current retry count at lease time (0 on
    /// first attempt), so handlers whose transient errors call for
    /// increasing backoff (§4.4 fetcher: "connect/timeout retry <= 3 with
    /// increasing backoff") can scale their own delay by it rather than
    /// the stage loop enforcing one blanket policy for every handler.
    async fn process(
        &self,
        envelope: TaskEnvelope,
        retry_count: u32,
    ) -> Result<Option<TaskEnvelope>, HandlerError>;

    async fn on_start(&self) {}
    async fn on_stop(&self) {}
    fn stats(&self) -> HandlerStats {
        HandlerStats::default()
    }
}

/// Drives one stage's lease loop: dequeue, process, complete/fail, forward.
/// This is the literal pseudocode from §4.4 made concrete.
pub struct StageLoop {
    pub stage: Stage,
    pub queue: QueueManager,
    pub config: StageConfig,
}

impl StageLoop {
    pub fn new(stage: Stage, queue: QueueManager, config: StageConfig) -> Self {
        Self { stage, queue, config }
    }

    /// Run until `stop_rx` reports true. Checked between lease iterations
    /// (§5 "Workers observe a cooperative stop signal between lease
    /// iterations").
    pub async fn run(&self, handler: &dyn Handler, mut stop_rx: watch::Receiver<bool>) {
        handler.on_start().await;
        info!(stage = %self.stage, "stage loop starting");

        loop {
            if *stop_rx.borrow() {
                break;
            }

            let task = tokio::select! {
                res = self.queue.dequeue(self.stage.input_queue(), true, self.config.poll_interval) => res,
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                    continue;
                }
            };

            let task = match task {
                Ok(Some(task)) => task,
                Ok(None) => continue,
                Err(e) => {
                    warn!(stage = %self.stage, "dequeue failed, backing off: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            self.handle_one(handler, task).await;
        }

        handler.on_stop().await;
        info!(stage = %self.stage, "stage loop stopped");
    }

    async fn handle_one(&self, handler: &dyn Handler, task: QueueTask) {
        let input_queue = self.stage.input_queue();
        debug!(stage = %self.stage, task_id = %task.id, "leased task");

        match handler.process(task.data, task.retry_count).await {
            Ok(output) => {
                if let Err(e) = self.queue.complete_task(input_queue, &task.id, None).await {
                    error!(stage = %self.stage, task_id = %task.id, "complete_task failed: {e}");
                    return;
                }

                if let (Some(output_queue), Some(envelope)) = (self.stage.output_queue(), output) {
                    if let Err(e) = self.queue.enqueue(output_queue, envelope, None).await {
                        // DownstreamEnqueueFailed (§7): the upstream task is
                        // already completed; log the incident rather than
                        // retry the whole stage, bounded by content-hash
                        // idempotency if the URL is reseeded by an operator.
                        error!(
                            stage = %self.stage,
                            task_id = %task.id,
                            "downstream enqueue to {output_queue} failed: {e}"
                        );
                    }
                }
            }
            Err(HandlerError::Transient(msg)) => {
                let retry = task.retry_count < self.config.retry_max;
                if let Err(e) = self
                    .queue
                    .fail_task(input_queue, &task.id, &msg, retry)
                    .await
                {
                    error!(stage = %self.stage, task_id = %task.id, "fail_task failed: {e}");
                }
            }
            Err(HandlerError::Permanent(msg)) => {
                if let Err(e) = self
                    .queue
                    .fail_task(input_queue, &task.id, &msg, false)
                    .await
                {
                    error!(stage = %self.stage, task_id = %task.id, "fail_task failed: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::tests::fake::FakeQueueBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct AlwaysTransient(AtomicUsize);

    #[async_trait]
    impl Handler for AlwaysTransient {
        async fn process(&self, _: TaskEnvelope, _retry_count: u32) -> Result<Option<TaskEnvelope>, HandlerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(HandlerError::Transient("boom".to_string()))
        }
    }

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn process(&self, env: TaskEnvelope, _retry_count: u32) -> Result<Option<TaskEnvelope>, HandlerError> {
            Ok(Some(env))
        }
    }

    #[tokio::test]
    async fn successful_process_completes_and_forwards() {
        let queue = QueueManager::new(Arc::new(FakeQueueBackend::new()));
        let env = TaskEnvelope::seed("https://example.com/", "demo");
        queue.enqueue(Stage::Fetch.input_queue(), env, None).await.unwrap();

        let stage_loop = StageLoop::new(Stage::Fetch, queue.clone(), StageConfig::default());
        let task = queue
            .dequeue(Stage::Fetch.input_queue(), false, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        stage_loop.handle_one(&Echo, task).await;

        let crawl_metrics = queue.get_queue_metrics(Stage::Fetch.output_queue().unwrap()).await.unwrap();
        assert_eq!(crawl_metrics.pending, 1);
        let url_metrics = queue.get_queue_metrics(Stage::Fetch.input_queue()).await.unwrap();
        assert_eq!(url_metrics.completed, 1);
    }

    #[tokio::test]
    async fn transient_error_retries_until_cap_then_fails() {
        let queue = QueueManager::new(Arc::new(FakeQueueBackend::new()));
        let env = TaskEnvelope::seed("https://example.com/", "demo");
        let id = queue.enqueue(Stage::Fetch.input_queue(), env, None).await.unwrap();

        let config = StageConfig { retry_max: 2, ..StageConfig::default() };
        let stage_loop = StageLoop::new(Stage::Fetch, queue.clone(), config);
        let handler = AlwaysTransient(AtomicUsize::new(0));

        for _ in 0..3 {
            let task = queue
                .dequeue(Stage::Fetch.input_queue(), false, Duration::from_millis(10))
                .await
                .unwrap()
                .expect("task still available for retry");
            stage_loop.handle_one(&handler, task).await;
        }

        let status = queue.get_task_status(&id).await.unwrap();
        assert_eq!(status.status, crate::queue::TaskStatus::Failed);
        assert_eq!(status.retry_count, 2);
    }
}
