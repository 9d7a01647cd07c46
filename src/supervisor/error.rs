use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("supervisor already running")]
    AlreadyRunning,
    #[error("failed to spawn worker process: {0}")]
    SpawnFailed(String),
    #[error("scale operation timed out after {0:?}")]
    ScaleTimeout(std::time::Duration),
    #[error("unknown worker id requested for restart: {0}")]
    UnknownWorker(u64),
}
