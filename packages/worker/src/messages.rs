//! Message and error types for the runner actor.

use chrono::{DateTime, Utc};
use export_core::StoreError;
use ractor::RpcReplyPort;

use crate::config::ConfigError;
use crate::processor::JobReport;

/// Messages for the RunnerActor.
#[derive(Debug)]
pub enum RunnerMessage {
    /// Check the window and heartbeat, then claim and process one job.
    Poll,

    /// Report what the runner has done so far.
    Status { reply: RpcReplyPort<RunnerSnapshot> },

    /// Stop polling and release the liveness claim.
    Shutdown,
}

/// Point-in-time view of a running runner.
#[derive(Debug, Clone)]
pub struct RunnerSnapshot {
    pub runner_id: String,
    pub window_ends_at: DateTime<Utc>,
    pub jobs_processed: u64,
    pub last_job: Option<JobReport>,
}

/// Errors that stop a worker before or outside job processing.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("failed to create working directory under {path}: {source}")]
    WorkDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to spawn runner: {0}")]
    Spawn(#[from] ractor::SpawnErr),
}
