//! SurrealDB-backed implementations of the worker's store traits.

use export_core::{
    ActivationClaim, ExportOutput, Job, JobCompletion, JobId, JobStore, LivenessStore,
    RunnerHeartbeat, StoreFuture,
};

use crate::repositories::{HeartbeatRepository, JobRepository};

/// Job ledger on the global SurrealDB connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct SurrealJobStore;

impl JobStore for SurrealJobStore {
    fn claim_next(&self) -> StoreFuture<'_, Option<Job>> {
        Box::pin(async move { Ok(JobRepository::claim_next().await?) })
    }

    fn record_output<'a>(
        &'a self,
        id: JobId,
        format: &'a str,
        output: &'a ExportOutput,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move { Ok(JobRepository::record_output(id, format, output).await?) })
    }

    fn finish<'a>(&'a self, id: JobId, completion: &'a JobCompletion) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            JobRepository::finish(id, completion).await?;
            Ok(())
        })
    }
}

/// Liveness record on the global SurrealDB connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct SurrealLivenessStore;

impl LivenessStore for SurrealLivenessStore {
    fn read(&self) -> StoreFuture<'_, Option<RunnerHeartbeat>> {
        Box::pin(async move { Ok(HeartbeatRepository::get().await?) })
    }

    fn try_activate<'a>(&'a self, claim: &'a ActivationClaim) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(HeartbeatRepository::try_activate(claim).await?) })
    }

    fn beat<'a>(&'a self, runner_id: &'a str, current_job: Option<JobId>) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(HeartbeatRepository::beat(runner_id, current_job).await?) })
    }

    fn deactivate<'a>(&'a self, runner_id: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(HeartbeatRepository::deactivate(runner_id).await?) })
    }
}
