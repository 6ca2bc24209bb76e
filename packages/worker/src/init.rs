//! Wires the worker to its database, object storage and engine.

use std::sync::Arc;

use db::{DbConfig, SurrealJobStore, SurrealLivenessStore, init as init_db};
use storage::Storage;

use crate::config::WorkerConfig;
use crate::engine::SubprocessEngine;
use crate::messages::RunnerMessage;
use crate::processor::{JobProcessor, ProcessorSettings};
use crate::publish::ArtifactPublisher;
use crate::runner_actor::{RunnerSettings, start_runner};

/// Initialize the export worker and start its runner.
///
/// Returns `None` when another runner already holds the liveness claim.
pub async fn init_worker(
    config: WorkerConfig,
) -> Result<
    Option<(ractor::ActorRef<RunnerMessage>, tokio::task::JoinHandle<()>)>,
    Box<dyn std::error::Error>,
> {
    tracing::info!(runner_id = %config.runner_id, "Initializing export worker...");

    init_db(DbConfig::from_env()?).await?;

    let storage = Storage::from_env().await?;
    tracing::info!(backend = storage.kind_str(), "Object storage ready");

    let settings = ProcessorSettings::new(config.runner_id.clone())
        .with_work_root(config.work_root.clone())
        .with_engine_timeout(config.engine_timeout)
        .with_status_write_attempts(config.status_write_attempts);

    let processor = JobProcessor::new(
        Arc::new(SurrealJobStore),
        Arc::new(SurrealLivenessStore),
        Arc::new(SubprocessEngine::blender(config.engine_bin.clone())),
        Arc::new(ArtifactPublisher::new(storage, config.artifact_retention)),
        settings,
    );

    let runner = start_runner(
        Arc::new(processor),
        RunnerSettings {
            poll_interval: config.poll_interval,
            window: config.runner_window,
            stale_after: config.heartbeat_stale,
        },
    )
    .await?;

    if runner.is_some() {
        tracing::info!("Export worker initialized");
    }
    Ok(runner)
}
