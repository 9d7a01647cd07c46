//! `QueueBackend` - the storage-agnostic seam behind `QueueManager`.
//!
//! Grounded on the claim/complete/fail shape the teacher project uses for
//! its own work-queue abstraction: a trait kept deliberately narrow so a
//! fake in-memory implementation can stand in for tests without spinning up
//! Redis (see `queue::tests::fake`).

use std::time::Duration;

use async_trait::async_trait;

use super::error::QueueError;
use super::metrics::QueueMetrics;
use super::task::QueueTask;
use crate::envelope::TaskEnvelope;

#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Create task metadata and push `task_id` onto the pending list.
    /// Returns the assigned id (§4.1 `enqueue`).
    async fn enqueue(
        &self,
        queue: &str,
        data: TaskEnvelope,
        task_id: Option<String>,
    ) -> Result<String, QueueError>;

    /// Atomically pop one id from pending and move it to processing,
    /// stamping `started_at`. Blocks up to `timeout` when `block` is true
    /// (§4.1 `dequeue`, §5 `T_poll`).
    async fn dequeue(
        &self,
        queue: &str,
        block: bool,
        timeout: Duration,
    ) -> Result<Option<QueueTask>, QueueError>;

    /// Move a task from processing to completed. No-op if the task is not
    /// currently in processing (§4.1).
    async fn complete_task(
        &self,
        queue: &str,
        task_id: &str,
        result: Option<String>,
    ) -> Result<(), QueueError>;

    /// Move a task out of processing, either back to pending with an
    /// incremented `retry_count` (`retry = true`) or to failed (`retry =
    /// false`) (§4.1).
    async fn fail_task(
        &self,
        queue: &str,
        task_id: &str,
        error: &str,
        retry: bool,
    ) -> Result<(), QueueError>;

    async fn get_task_status(&self, task_id: &str) -> Result<QueueTask, QueueError>;

    async fn get_queue_metrics(&self, queue: &str) -> Result<QueueMetrics, QueueError>;

    async fn get_queue_length(&self, queue: &str) -> Result<u64, QueueError>;

    /// Empty the pending list only; processing/completed/failed sets are
    /// untouched (§8 scenario S6).
    async fn clear_queue(&self, queue: &str) -> Result<bool, QueueError>;

    /// Full task records currently in the processing set, for the stall
    /// sweep (§4.3 "scans the processing set for tasks last touched by
    /// that worker"). Unordered.
    async fn list_processing(&self, queue: &str) -> Result<Vec<QueueTask>, QueueError>;
}
