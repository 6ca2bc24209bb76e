//! Processes one claimed job: every requested format, then the final verdict.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use export_core::{
    ExportFormat, ExportOutput, Job, JobCompletion, JobId, JobStatus, JobStore, LivenessStore,
    StoreError, extension_for, sanitize_id,
};
use futures_util::FutureExt;

use crate::classify::OutputClassifier;
use crate::engine::Engine;
use crate::messages::WorkerError;
use crate::publish::ArtifactSink;
use crate::script::ExportScriptBuilder;

/// Prefix of the error text when no format produced an export.
pub const NO_VALID_EXPORTS: &str = "no valid exports";

/// Knobs for [`JobProcessor`].
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Parent of the per-job working directories.
    pub work_root: PathBuf,
    pub engine_timeout: Duration,
    pub runner_id: String,
    /// Attempts for the terminal status write.
    pub status_write_attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub status_retry_delay: Duration,
}

impl ProcessorSettings {
    pub fn new(runner_id: impl Into<String>) -> Self {
        Self {
            work_root: std::env::temp_dir(),
            engine_timeout: Duration::from_secs(300),
            runner_id: runner_id.into(),
            status_write_attempts: 3,
            status_retry_delay: Duration::from_millis(500),
        }
    }

    pub fn with_work_root(mut self, work_root: impl Into<PathBuf>) -> Self {
        self.work_root = work_root.into();
        self
    }

    pub fn with_engine_timeout(mut self, timeout: Duration) -> Self {
        self.engine_timeout = timeout;
        self
    }

    pub fn with_status_write_attempts(mut self, attempts: u32) -> Self {
        self.status_write_attempts = attempts.max(1);
        self
    }

    pub fn with_status_retry_delay(mut self, delay: Duration) -> Self {
        self.status_retry_delay = delay;
        self
    }
}

/// Outcome of one job, as written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub job_id: JobId,
    pub status: JobStatus,
    pub error: Option<String>,
    /// Formats published, in request order.
    pub published: Vec<String>,
    /// Formats skipped without invoking the engine.
    pub skipped: Vec<String>,
    /// Whether the terminal status reached the store.
    pub persisted: bool,
}

/// Per-format results for one job.
#[derive(Debug, Default)]
struct Tally {
    published: Vec<String>,
    skipped: Vec<String>,
    failures: Vec<String>,
}

impl Tally {
    fn fail(&mut self, format_id: &str, reason: impl std::fmt::Display) {
        self.failures.push(format!("{format_id}: {reason}"));
    }

    fn completion(&self) -> JobCompletion {
        let failures = (!self.failures.is_empty()).then(|| self.failures.join("; "));

        if !self.published.is_empty() {
            return JobCompletion {
                status: JobStatus::Done,
                error: failures,
                completed_at: Utc::now(),
            };
        }

        let detail = match failures {
            Some(failures) => failures,
            None if !self.skipped.is_empty() => format!(
                "no formats attempted (skipped unsupported: {})",
                self.skipped.join(", ")
            ),
            None => "no formats requested".to_string(),
        };
        JobCompletion::failed(format!("{NO_VALID_EXPORTS}: {detail}"))
    }
}

/// Runs the build, engine, classify and publish pipeline for claimed jobs.
pub struct JobProcessor {
    jobs: Arc<dyn JobStore>,
    liveness: Arc<dyn LivenessStore>,
    engine: Arc<dyn Engine>,
    sink: Arc<dyn ArtifactSink>,
    builder: ExportScriptBuilder,
    classifier: OutputClassifier,
    settings: ProcessorSettings,
}

impl JobProcessor {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        liveness: Arc<dyn LivenessStore>,
        engine: Arc<dyn Engine>,
        sink: Arc<dyn ArtifactSink>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            jobs,
            liveness,
            engine,
            sink,
            builder: ExportScriptBuilder,
            classifier: OutputClassifier,
            settings,
        }
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    pub fn liveness(&self) -> &Arc<dyn LivenessStore> {
        &self.liveness
    }

    /// Process a job already claimed as `processing`.
    ///
    /// Never fails: anything that goes wrong ends up in the job's error text.
    pub async fn process_job(&self, job: &Job) -> JobReport {
        let job_id = job.id;
        tracing::info!(job_id = %job_id, formats = ?job.formats, "Processing job");
        self.refresh_heartbeat(Some(job_id)).await;

        let (completion, tally) = match self.create_work_dir(job_id) {
            Ok(work_dir) => {
                let outcome = AssertUnwindSafe(self.run_formats(job, work_dir.path()))
                    .catch_unwind()
                    .await;

                let path = work_dir.path().to_path_buf();
                if let Err(e) = work_dir.close() {
                    tracing::warn!(job_id = %job_id, path = %path.display(), error = %e, "Failed to remove working directory");
                }

                match outcome {
                    Ok(tally) => (tally.completion(), tally),
                    Err(panic) => {
                        let message = panic_message(&*panic);
                        tracing::error!(job_id = %job_id, error = %message, "Job processing panicked");
                        (JobCompletion::failed(message), Tally::default())
                    }
                }
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Job could not start");
                (JobCompletion::failed(e.to_string()), Tally::default())
            }
        };

        let persisted = self.write_completion(job_id, &completion).await;
        self.refresh_heartbeat(None).await;

        tracing::info!(
            job_id = %job_id,
            status = %completion.status,
            published = tally.published.len(),
            skipped = tally.skipped.len(),
            "Job finished"
        );

        JobReport {
            job_id,
            status: completion.status,
            error: completion.error,
            published: tally.published,
            skipped: tally.skipped,
            persisted,
        }
    }

    fn create_work_dir(&self, job_id: JobId) -> Result<tempfile::TempDir, WorkerError> {
        tempfile::Builder::new()
            .prefix(&format!("export-{job_id}-"))
            .tempdir_in(&self.settings.work_root)
            .map_err(|source| WorkerError::WorkDir {
                path: self.settings.work_root.display().to_string(),
                source,
            })
    }

    async fn run_formats(&self, job: &Job, work_dir: &Path) -> Tally {
        let mut tally = Tally::default();

        for (index, format_id) in job.formats.iter().enumerate() {
            if ExportFormat::from_id(format_id).is_some_and(|format| !format.is_supported()) {
                tracing::info!(job_id = %job.id, format = %format_id, "Skipping unsupported format");
                tally.skipped.push(format_id.clone());
                continue;
            }

            let attempt = AssertUnwindSafe(self.export_format(job, index, format_id, work_dir))
                .catch_unwind()
                .await;

            match attempt {
                Ok(Ok(output)) => {
                    tracing::info!(job_id = %job.id, format = %format_id, size = output.size, "Format exported");
                    tally.published.push(format_id.clone());
                }
                Ok(Err(reason)) => {
                    tracing::warn!(job_id = %job.id, format = %format_id, reason = %reason, "Format failed");
                    tally.fail(format_id, reason);
                }
                Err(panic) => {
                    let message = panic_message(&*panic);
                    tracing::error!(job_id = %job.id, format = %format_id, error = %message, "Format panicked");
                    tally.fail(format_id, format!("unexpected error: {message}"));
                }
            }

            // Every attempted format counts as progress, whatever its outcome.
            self.refresh_heartbeat(Some(job.id)).await;
        }

        tally
    }

    /// One format end to end. The error is the reason text recorded on the job.
    async fn export_format(
        &self,
        job: &Job,
        index: usize,
        format_id: &str,
        work_dir: &Path,
    ) -> Result<ExportOutput, String> {
        let slot = match sanitize_id(format_id) {
            s if s.is_empty() => format!("{index:02}"),
            s => format!("{index:02}-{s}"),
        };
        let format_dir = work_dir.join(slot);
        tokio::fs::create_dir_all(&format_dir)
            .await
            .map_err(|e| format!("failed to prepare working directory: {e}"))?;

        let output_path = format_dir.join(format!("model.{}", extension_for(format_id)));
        let program = self
            .builder
            .build(job.script.as_deref(), &output_path, format_id);

        let run = self
            .engine
            .run(&program, &format_dir, self.settings.engine_timeout)
            .await;
        tracing::debug!(
            job_id = %job.id,
            format = %format_id,
            exit_code = ?run.exit_code,
            timed_out = run.timed_out,
            output_bytes = run.output.len(),
            "Engine finished"
        );

        let (exists, size) = match tokio::fs::metadata(&output_path).await {
            Ok(meta) if meta.is_file() => (true, meta.len()),
            _ => (false, 0),
        };

        let verdict = self.classifier.classify(&run.output, exists, size);
        if !verdict.accepted {
            return Err(verdict.summary());
        }
        if !verdict.reasons.is_empty() {
            tracing::warn!(job_id = %job.id, format = %format_id, reasons = %verdict.summary(), "Export accepted with warnings");
        }

        let output = self
            .sink
            .publish(&output_path, job.id, format_id)
            .await
            .map_err(|e| format!("upload failed: {e}"))?;

        self.jobs
            .record_output(job.id, format_id, &output)
            .await
            .map_err(|e| format!("failed to record output: {e}"))?;

        Ok(output)
    }

    async fn write_completion(&self, job_id: JobId, completion: &JobCompletion) -> bool {
        let attempts = self.settings.status_write_attempts.max(1);
        let mut delay = self.settings.status_retry_delay;

        for attempt in 1..=attempts {
            match self.jobs.finish(job_id, completion).await {
                Ok(()) => return true,
                Err(StoreError::NotFound(e)) => {
                    tracing::error!(job_id = %job_id, error = %e, "Job no longer processing, final status dropped");
                    return false;
                }
                Err(e) if attempt < attempts => {
                    tracing::warn!(job_id = %job_id, attempt, error = %e, "Final status write failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, attempts, error = %e, "Giving up on final status write");
                }
            }
        }
        false
    }

    /// Best effort. Failures are logged and never interrupt a job.
    pub async fn refresh_heartbeat(&self, current_job: Option<JobId>) -> bool {
        match self
            .liveness
            .beat(&self.settings.runner_id, current_job)
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(runner_id = %self.settings.runner_id, "Heartbeat refused, liveness claim lost");
                false
            }
            Err(e) => {
                tracing::warn!(runner_id = %self.settings.runner_id, error = %e, "Heartbeat write failed");
                false
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
