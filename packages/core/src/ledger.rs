//! Store interfaces the worker loop depends on.
//!
//! The job ledger and the liveness record are owned by external stores.
//! These traits are the narrow surface the worker needs; the `db` crate
//! implements them on SurrealDB and tests implement them in memory.

use std::future::Future;
use std::pin::Pin;

use crate::{ActivationClaim, ExportOutput, Job, JobCompletion, JobId, RunnerHeartbeat};

/// Errors raised by store implementations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Future type returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Job ledger operations used by the worker.
pub trait JobStore: Send + Sync + 'static {
    /// Atomically move the oldest `queued` job to `processing`.
    ///
    /// Must not hand the same job to two concurrent callers.
    fn claim_next(&self) -> StoreFuture<'_, Option<Job>>;

    /// Add one published output to the job. Existing outputs are kept.
    fn record_output<'a>(
        &'a self,
        id: JobId,
        format: &'a str,
        output: &'a ExportOutput,
    ) -> StoreFuture<'a, ()>;

    /// Write the terminal status, error and completion time.
    fn finish<'a>(&'a self, id: JobId, completion: &'a JobCompletion) -> StoreFuture<'a, ()>;
}

/// Liveness record operations.
///
/// Every mutation is a read-check-write that must be atomic across processes.
pub trait LivenessStore: Send + Sync + 'static {
    fn read(&self) -> StoreFuture<'_, Option<RunnerHeartbeat>>;

    /// Take the active claim if the record is inactive or stale.
    ///
    /// Returns `false` when another live worker holds it.
    fn try_activate<'a>(&'a self, claim: &'a ActivationClaim) -> StoreFuture<'a, bool>;

    /// Refresh `last_active` and `current_job_id`.
    ///
    /// Returns `false` if `runner_id` no longer owns the claim.
    fn beat<'a>(&'a self, runner_id: &'a str, current_job: Option<JobId>) -> StoreFuture<'a, bool>;

    /// Release the claim. A no-op returning `false` for a non-owner.
    fn deactivate<'a>(&'a self, runner_id: &'a str) -> StoreFuture<'a, bool>;
}
