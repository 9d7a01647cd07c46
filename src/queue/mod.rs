//! Queue Manager (§4.1) - atomic task-state transitions and metrics.

mod backend;
mod error;
pub mod monitor;
mod redis_backend;
mod task;

pub mod metrics;

pub use backend::QueueBackend;
pub use error::QueueError;
pub use metrics::QueueMetrics;
pub use monitor::{QueueHealthStatus, QueueMonitor};
pub use redis_backend::RedisQueueBackend;
pub use task::{QueueTask, TaskStatus};

use std::sync::Arc;
use std::time::Duration;

use crate::envelope::TaskEnvelope;

/// Standard queue names (§3.3).
pub const QUEUE_URL: &str = "url";
pub const QUEUE_CRAWL: &str = "crawl";
pub const QUEUE_CLEAN: &str = "clean";
pub const QUEUE_INDEX: &str = "index";

/// Thin facade over a `QueueBackend`. Exists so call sites depend on a
/// concrete, cloneable type rather than threading `Arc<dyn QueueBackend>`
/// through every signature.
#[derive(Clone)]
pub struct QueueManager {
    backend: Arc<dyn QueueBackend>,
}

impl QueueManager {
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self { backend }
    }

    pub async fn connect_redis(redis_url: &str) -> Result<Self, QueueError> {
        let backend = RedisQueueBackend::connect(redis_url).await?;
        Ok(Self::new(Arc::new(backend)))
    }

    pub fn backend(&self) -> Arc<dyn QueueBackend> {
        self.backend.clone()
    }

    pub async fn enqueue(
        &self,
        queue: &str,
        data: TaskEnvelope,
        task_id: Option<String>,
    ) -> Result<String, QueueError> {
        self.backend.enqueue(queue, data, task_id).await
    }

    pub async fn dequeue(
        &self,
        queue: &str,
        block: bool,
        timeout: Duration,
    ) -> Result<Option<QueueTask>, QueueError> {
        self.backend.dequeue(queue, block, timeout).await
    }

    pub async fn complete_task(
        &self,
        queue: &str,
        task_id: &str,
        result: Option<String>,
    ) -> Result<(), QueueError> {
        self.backend.complete_task(queue, task_id, result).await
    }

    pub async fn fail_task(
        &self,
        queue: &str,
        task_id: &str,
        error: &str,
        retry: bool,
    ) -> Result<(), QueueError> {
        self.backend.fail_task(queue, task_id, error, retry).await
    }

    pub async fn get_task_status(&self, task_id: &str) -> Result<QueueTask, QueueError> {
        self.backend.get_task_status(task_id).await
    }

    pub async fn get_queue_metrics(&self, queue: &str) -> Result<QueueMetrics, QueueError> {
        self.backend.get_queue_metrics(queue).await
    }

    pub async fn get_queue_length(&self, queue: &str) -> Result<u64, QueueError> {
        self.backend.get_queue_length(queue).await
    }

    pub async fn clear_queue(&self, queue: &str) -> Result<bool, QueueError> {
        self.backend.clear_queue(queue).await
    }

    /// Full task records currently leased (processing), for the stall
    /// sweep (§4.3).
    pub async fn list_processing(&self, queue: &str) -> Result<Vec<QueueTask>, QueueError> {
        self.backend.list_processing(queue).await
    }
}
