//! Per-queue metrics (§4.2 sampled fields, §6.3 admin read surface).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub queue: String,
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub avg_processing_time_ms: f64,
    pub last_activity_time: Option<DateTime<Utc>>,
}

impl QueueMetrics {
    pub fn error_rate(&self) -> f64 {
        let denom = self.completed + self.failed;
        if denom == 0 {
            0.0
        } else {
            self.failed as f64 / denom as f64
        }
    }
}
