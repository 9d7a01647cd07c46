//! Queue Monitor - fixed-interval health sampling and alert dispatch (§4.2).

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tracing::{error, warn};

use super::backend::QueueBackend;
use super::error::QueueError;
use super::metrics::QueueMetrics;
use crate::config::MonitorConfig;

/// Derived health for one queue, sampled on a fixed interval and handed to
/// every registered callback.
#[derive(Debug, Clone)]
pub struct QueueHealthStatus {
    pub queue: String,
    pub metrics: QueueMetrics,
    /// `last_activity_time` older than `activity_timeout` AND work is
    /// outstanding.
    pub stalled: bool,
    pub backlog_size_warning: bool,
    pub error_rate_warning: bool,
}

type AlertCallback = Arc<dyn Fn(&QueueHealthStatus) -> anyhow::Result<()> + Send + Sync>;

pub struct QueueMonitor {
    backend: Arc<dyn QueueBackend>,
    queues: Vec<String>,
    config: MonitorConfig,
    callbacks: Arc<Mutex<Vec<AlertCallback>>>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl QueueMonitor {
    pub fn new(backend: Arc<dyn QueueBackend>, queues: Vec<String>, config: MonitorConfig) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            backend,
            queues,
            config,
            callbacks: Arc::new(Mutex::new(Vec::new())),
            stop_tx,
            stop_rx,
        }
    }

    /// Register a callback. Callbacks must be non-blocking; the monitor
    /// swallows (logs) any error they return rather than letting it
    /// interrupt sampling of the remaining queues.
    pub async fn on_alert<F>(&self, callback: F)
    where
        F: Fn(&QueueHealthStatus) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callbacks.lock().await.push(Arc::new(callback));
    }

    /// Sample every queue once and return their health statuses, without
    /// starting the background loop. Used directly by the admin status
    /// surface (§6.3) and by tests.
    pub async fn sample_once(&self) -> Result<Vec<QueueHealthStatus>, QueueError> {
        let mut statuses = Vec::with_capacity(self.queues.len());
        for queue in &self.queues {
            let metrics = self.backend.get_queue_metrics(queue).await?;
            statuses.push(self.evaluate(queue, metrics));
        }
        Ok(statuses)
    }

    fn evaluate(&self, queue: &str, metrics: QueueMetrics) -> QueueHealthStatus {
        let stalled = metrics
            .last_activity_time
            .map(|t| {
                let idle = Utc::now() - t;
                idle.to_std().unwrap_or_default() > self.config.activity_timeout
                    && (metrics.pending + metrics.processing) > 0
            })
            .unwrap_or(false);

        let backlog_size_warning = metrics.pending > self.config.max_pending_threshold;
        let error_rate_warning = metrics.error_rate() > self.config.max_error_rate;

        QueueHealthStatus {
            queue: queue.to_string(),
            metrics,
            stalled,
            backlog_size_warning,
            error_rate_warning,
        }
    }

    /// Start the sampling loop as a background task. Returns a handle the
    /// caller can drop without affecting the loop - use `stop()` to halt it.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let mut interval = tokio::time::interval(self.config.sample_interval);
        let mut stop_rx = self.stop_rx.clone();
        let monitor = self;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                        match monitor.sample_once().await {
                            Ok(statuses) => monitor.dispatch(&statuses).await,
                            Err(e) => warn!("queue monitor sample failed: {e}"),
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

    async fn dispatch(&self, statuses: &[QueueHealthStatus]) {
        let callbacks = self.callbacks.lock().await;
        for status in statuses {
            for cb in callbacks.iter() {
                if let Err(e) = cb(status) {
                    error!("queue monitor callback failed for {}: {e}", status.queue);
                }
            }
        }
    }

    /// Halt the sampling loop at the next interval boundary (§4.2).
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::tests::fake::FakeQueueBackend;

    #[tokio::test]
    async fn stalled_requires_both_idle_time_and_outstanding_work() {
        let backend: Arc<dyn QueueBackend> = Arc::new(FakeQueueBackend::new());
        let monitor = QueueMonitor::new(
            backend,
            vec!["url".to_string()],
            MonitorConfig {
                sample_interval: std::time::Duration::from_secs(1),
                activity_timeout: std::time::Duration::from_millis(0),
                max_pending_threshold: 1,
                max_error_rate: 0.5,
            },
        );

        let metrics = QueueMetrics {
            queue: "url".to_string(),
            pending: 0,
            processing: 0,
            completed: 5,
            failed: 0,
            avg_processing_time_ms: 0.0,
            last_activity_time: Some(Utc::now() - chrono::Duration::hours(1)),
        };
        let status = monitor.evaluate("url", metrics);
        assert!(!status.stalled, "no outstanding work means not stalled");
    }

    #[tokio::test]
    async fn backlog_warning_trips_above_threshold() {
        let backend: Arc<dyn QueueBackend> = Arc::new(FakeQueueBackend::new());
        let monitor = QueueMonitor::new(
            backend,
            vec!["url".to_string()],
            MonitorConfig {
                max_pending_threshold: 10,
                ..MonitorConfig {
                    sample_interval: std::time::Duration::from_secs(1),
                    activity_timeout: std::time::Duration::from_secs(120),
                    max_pending_threshold: 10,
                    max_error_rate: 0.5,
                }
            },
        );
        let metrics = QueueMetrics {
            queue: "url".to_string(),
            pending: 11,
            processing: 0,
            completed: 0,
            failed: 0,
            avg_processing_time_ms: 0.0,
            last_activity_time: None,
        };
        assert!(monitor.evaluate("url", metrics).backlog_size_warning);
    }
}
