//! Runner actor: the poll loop that claims and processes export jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use export_core::ActivationClaim;
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::messages::{RunnerMessage, RunnerSnapshot, WorkerError};
use crate::processor::{JobProcessor, JobReport};

/// Timing of one runner activation.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Delay before polling again after an empty claim.
    pub poll_interval: Duration,
    /// How long the runner keeps polling after activation.
    pub window: Duration,
    /// Heartbeat age after which another runner may take over.
    pub stale_after: Duration,
}

/// State for the runner actor.
pub struct RunnerState {
    processor: Arc<JobProcessor>,
    poll_interval: Duration,
    window_ends_at: DateTime<Utc>,
    jobs_processed: u64,
    last_job: Option<JobReport>,
}

impl RunnerState {
    fn runner_id(&self) -> &str {
        &self.processor.settings().runner_id
    }

    fn window_elapsed(&self) -> bool {
        Utc::now() >= self.window_ends_at
    }

    fn snapshot(&self) -> RunnerSnapshot {
        RunnerSnapshot {
            runner_id: self.runner_id().to_string(),
            window_ends_at: self.window_ends_at,
            jobs_processed: self.jobs_processed,
            last_job: self.last_job.clone(),
        }
    }
}

/// Runner actor arguments.
pub struct RunnerArgs {
    pub processor: Arc<JobProcessor>,
    pub poll_interval: Duration,
    pub window_ends_at: DateTime<Utc>,
}

/// Polls the job store until its window closes, one job at a time.
pub struct RunnerActor;

impl Actor for RunnerActor {
    type Msg = RunnerMessage;
    type State = RunnerState;
    type Arguments = RunnerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let state = RunnerState {
            processor: args.processor,
            poll_interval: args.poll_interval,
            window_ends_at: args.window_ends_at,
            jobs_processed: 0,
            last_job: None,
        };
        tracing::info!(
            runner_id = %state.runner_id(),
            window_ends_at = %state.window_ends_at,
            "Starting runner"
        );

        myself.send_message(RunnerMessage::Poll)?;
        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            RunnerMessage::Poll => {
                if state.window_elapsed() {
                    tracing::info!(
                        runner_id = %state.runner_id(),
                        jobs_processed = state.jobs_processed,
                        "Runner window elapsed, stopping"
                    );
                    myself.stop(Some("window elapsed".into()));
                    return Ok(());
                }

                match state
                    .processor
                    .liveness()
                    .beat(state.runner_id(), None)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(runner_id = %state.runner_id(), "Liveness claim lost, stopping");
                        myself.stop(Some("liveness claim lost".into()));
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::warn!(runner_id = %state.runner_id(), error = %e, "Heartbeat write failed");
                    }
                }

                match state.processor.jobs().claim_next().await {
                    Ok(Some(job)) => {
                        let report = state.processor.process_job(&job).await;
                        state.jobs_processed += 1;
                        state.last_job = Some(report);
                        myself.send_message(RunnerMessage::Poll)?;
                    }
                    Ok(None) => {
                        tracing::debug!(runner_id = %state.runner_id(), "No queued jobs");
                        schedule_poll(&myself, state.poll_interval);
                    }
                    Err(e) => {
                        tracing::warn!(runner_id = %state.runner_id(), error = %e, "Failed to claim job");
                        schedule_poll(&myself, state.poll_interval);
                    }
                }
            }

            RunnerMessage::Status { reply } => {
                let _ = reply.send(state.snapshot());
            }

            RunnerMessage::Shutdown => {
                tracing::info!(runner_id = %state.runner_id(), "Shutting down runner");
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match state
            .processor
            .liveness()
            .deactivate(state.runner_id())
            .await
        {
            Ok(true) => tracing::info!(runner_id = %state.runner_id(), "Runner marked inactive"),
            Ok(false) => {
                tracing::debug!(runner_id = %state.runner_id(), "Liveness claim already released")
            }
            Err(e) => {
                tracing::error!(runner_id = %state.runner_id(), error = %e, "Failed to mark runner inactive")
            }
        }
        Ok(())
    }
}

fn schedule_poll(myself: &ActorRef<RunnerMessage>, after: Duration) {
    let myself = myself.clone();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        // The runner may have stopped in the meantime.
        let _ = myself.send_message(RunnerMessage::Poll);
    });
}

/// Take the liveness claim and start polling.
///
/// Returns `Ok(None)` when another live runner holds the claim.
pub async fn start_runner(
    processor: Arc<JobProcessor>,
    settings: RunnerSettings,
) -> Result<Option<(ActorRef<RunnerMessage>, tokio::task::JoinHandle<()>)>, WorkerError> {
    let runner_id = processor.settings().runner_id.clone();
    let window = chrono::Duration::from_std(settings.window).unwrap_or(chrono::Duration::MAX);
    let stale_after =
        chrono::Duration::from_std(settings.stale_after).unwrap_or(chrono::Duration::MAX);
    let window_ends_at = Utc::now()
        .checked_add_signed(window)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);

    let claim = ActivationClaim {
        runner_id: runner_id.clone(),
        window_ends_at,
        stale_after,
    };
    if !processor.liveness().try_activate(&claim).await? {
        tracing::info!(runner_id = %runner_id, "Another runner is active, not starting");
        return Ok(None);
    }

    let liveness = processor.liveness().clone();
    let args = RunnerArgs {
        processor,
        poll_interval: settings.poll_interval,
        window_ends_at,
    };
    match Actor::spawn(Some(format!("export-runner-{runner_id}")), RunnerActor, args).await {
        Ok((actor, handle)) => Ok(Some((actor, handle))),
        Err(e) => {
            if let Err(release) = liveness.deactivate(&runner_id).await {
                tracing::error!(runner_id = %runner_id, error = %release, "Failed to release liveness claim");
            }
            Err(e.into())
        }
    }
}
