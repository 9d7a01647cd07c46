//! Queue task record (§3.2) - distinct from the envelope it carries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::TaskEnvelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retry,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Retry => "retry",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "processing" => Some(TaskStatus::Processing),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "retry" => Some(TaskStatus::Retry),
            _ => None,
        }
    }
}

/// A single queue task record (§3.2). `data` is the envelope; control
/// fields (`status`, `retry_count`, timestamps, `error`, `result`) are
/// owned entirely by the Queue Manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueTask {
    pub id: String,
    pub queue: String,
    pub status: TaskStatus,
    pub data: TaskEnvelope,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub result: Option<String>,
}
