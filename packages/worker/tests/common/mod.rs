#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use export_core::{
    ActivationClaim, ExportOutput, Job, JobCompletion, JobId, JobStatus, JobStore, LivenessStore,
    RunnerHeartbeat, RunnerStatus, StoreError, StoreFuture,
};
use storage::{Storage, StorageConfig, StorageError};
use worker::{
    ArtifactPublisher, ArtifactSink, Engine, EngineFuture, EngineRun, JobProcessor,
    ProcessorSettings, PublishError, PublishFuture,
};

/// Job ledger kept in memory, with injectable finish failures.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<BTreeMap<JobId, Job>>,
    failing_finishes: AtomicU32,
    finish_calls: AtomicU32,
}

impl MemoryJobStore {
    pub fn insert(&self, job: Job) -> JobId {
        let id = job.id;
        self.jobs.lock().unwrap().insert(id, job);
        id
    }

    pub fn job(&self, id: JobId) -> Job {
        self.jobs.lock().unwrap().get(&id).cloned().expect("job exists")
    }

    /// Make the next `n` finish calls fail with a backend error.
    pub fn fail_next_finishes(&self, n: u32) {
        self.failing_finishes.store(n, Ordering::SeqCst);
    }

    pub fn finish_calls(&self) -> u32 {
        self.finish_calls.load(Ordering::SeqCst)
    }

    /// Claim directly, the way the runner would before processing.
    pub fn claim(&self, id: JobId) -> Job {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&id).expect("job exists");
        job.status = JobStatus::Processing;
        job.started_at = Some(Utc::now());
        job.clone()
    }
}

impl JobStore for MemoryJobStore {
    fn claim_next(&self) -> StoreFuture<'_, Option<Job>> {
        Box::pin(async move {
            let mut jobs = self.jobs.lock().unwrap();
            let next = jobs
                .values_mut()
                .filter(|job| job.status == JobStatus::Queued)
                .min_by_key(|job| (job.created_at, job.id));
            Ok(next.map(|job| {
                job.status = JobStatus::Processing;
                job.started_at = Some(Utc::now());
                job.clone()
            }))
        })
    }

    fn record_output<'a>(
        &'a self,
        id: JobId,
        format: &'a str,
        output: &'a ExportOutput,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs
                .get_mut(&id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            job.outputs.insert(format.to_string(), output.clone());
            Ok(())
        })
    }

    fn finish<'a>(&'a self, id: JobId, completion: &'a JobCompletion) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.finish_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failing_finishes.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_finishes.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Backend("connection reset".into()));
            }

            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get_mut(&id) {
                Some(job) if job.status == JobStatus::Processing => {
                    job.complete(completion);
                    Ok(())
                }
                _ => Err(StoreError::NotFound(id.to_string())),
            }
        })
    }
}

/// Liveness record kept in memory.
#[derive(Default)]
pub struct MemoryLivenessStore {
    record: Mutex<Option<RunnerHeartbeat>>,
    beats: AtomicU32,
}

impl MemoryLivenessStore {
    pub fn current(&self) -> Option<RunnerHeartbeat> {
        self.record.lock().unwrap().clone()
    }

    pub fn beats(&self) -> u32 {
        self.beats.load(Ordering::SeqCst)
    }

    /// Overwrite the record as if another runner took over.
    pub fn hand_over_to(&self, runner_id: &str) {
        let mut record = self.record.lock().unwrap();
        let version = record.as_ref().map_or(0, |r| r.version) + 1;
        *record = Some(RunnerHeartbeat::activated(
            runner_id,
            Utc::now() + chrono::Duration::hours(1),
            Utc::now(),
            version,
        ));
    }
}

impl LivenessStore for MemoryLivenessStore {
    fn read(&self) -> StoreFuture<'_, Option<RunnerHeartbeat>> {
        Box::pin(async move { Ok(self.current()) })
    }

    fn try_activate<'a>(&'a self, claim: &'a ActivationClaim) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let now = Utc::now();
            let mut record = self.record.lock().unwrap();
            let version = match record.as_ref() {
                Some(current) if !current.is_claimable(now, claim.stale_after) => {
                    return Ok(false);
                }
                Some(current) => current.version + 1,
                None => 1,
            };
            *record = Some(RunnerHeartbeat::activated(
                claim.runner_id.clone(),
                claim.window_ends_at,
                now,
                version,
            ));
            Ok(true)
        })
    }

    fn beat<'a>(&'a self, runner_id: &'a str, current_job: Option<JobId>) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            self.beats.fetch_add(1, Ordering::SeqCst);
            let mut record = self.record.lock().unwrap();
            match record.as_mut() {
                Some(hb) if hb.is_owned_by(runner_id) => {
                    hb.last_active = Utc::now();
                    hb.current_job_id = current_job;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn deactivate<'a>(&'a self, runner_id: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut record = self.record.lock().unwrap();
            match record.as_mut() {
                Some(hb) if hb.is_owned_by(runner_id) => {
                    hb.status = RunnerStatus::Inactive;
                    hb.current_job_id = None;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }
}

/// What the fake engine does for one format.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Export a file of this many bytes.
    Write(usize),
    /// The user script raises, the export still writes this many bytes.
    UserErrorThenWrite(usize),
    /// The scene is empty.
    ZeroObjects,
    /// Exceed the engine timeout.
    Timeout,
    /// Panic inside the engine call.
    Panic,
}

/// Engine stand-in that reads the generated program instead of running it.
#[derive(Default)]
pub struct FakeEngine {
    behaviors: HashMap<String, Behavior>,
    calls: Mutex<Vec<String>>,
    work_dirs: Mutex<Vec<PathBuf>>,
}

impl FakeEngine {
    pub fn with(mut self, format: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(format.to_string(), behavior);
        self
    }

    /// Formats the engine was invoked for, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn work_dirs(&self) -> Vec<PathBuf> {
        self.work_dirs.lock().unwrap().clone()
    }
}

/// Value of a `NAME = "literal"` line in a generated program.
fn program_literal(program: &str, name: &str) -> Option<String> {
    let prefix = format!("{name} = ");
    program
        .lines()
        .find_map(|line| line.strip_prefix(&prefix))
        .and_then(|literal| serde_json::from_str(literal).ok())
}

fn finished(output: impl Into<String>, exit_code: i32) -> EngineRun {
    EngineRun {
        output: output.into(),
        failed: exit_code != 0,
        timed_out: false,
        exit_code: Some(exit_code),
    }
}

impl Engine for FakeEngine {
    fn run<'a>(&'a self, program: &'a str, work_dir: &'a Path, timeout: Duration) -> EngineFuture<'a> {
        Box::pin(async move {
            self.work_dirs.lock().unwrap().push(work_dir.to_path_buf());

            let Some(format) = program_literal(program, "FORMAT_ID") else {
                self.calls.lock().unwrap().push("<unknown>".into());
                return finished("UNKNOWN_FORMAT: unrecognized\n", 2);
            };
            self.calls.lock().unwrap().push(format.clone());

            let output_path = PathBuf::from(program_literal(program, "OUTPUT_PATH").expect("output path"));
            let behavior = self
                .behaviors
                .get(&format)
                .cloned()
                .unwrap_or(Behavior::Write(4096));

            match behavior {
                Behavior::Write(size) => {
                    std::fs::write(&output_path, vec![0u8; size]).unwrap();
                    finished("SELECTED_OBJECTS: 1\nEXPORT_SUCCESS: selection\n", 0)
                }
                Behavior::UserErrorThenWrite(size) => {
                    std::fs::write(&output_path, vec![0u8; size]).unwrap();
                    finished(
                        "USER_SCRIPT_ERROR: NameError: name 'cube' is not defined\n\
                         SELECTED_OBJECTS: 1\nEXPORT_SUCCESS: selection\n",
                        0,
                    )
                }
                Behavior::ZeroObjects => finished(
                    "SELECTED_OBJECTS: 0\nZERO_OBJECTS_SELECTED: no exportable objects in scene\n",
                    3,
                ),
                Behavior::Timeout => EngineRun {
                    output: format!("ENGINE_TIMEOUT: killed after {}s\n", timeout.as_secs_f64()),
                    failed: true,
                    timed_out: true,
                    exit_code: None,
                },
                Behavior::Panic => panic!("engine crashed for {format}"),
            }
        })
    }
}

/// Sink whose uploads always fail.
pub struct FailingSink;

impl ArtifactSink for FailingSink {
    fn publish<'a>(&'a self, _file: &'a Path, _job_id: JobId, _format_id: &'a str) -> PublishFuture<'a> {
        Box::pin(async move {
            Err(PublishError::Storage(StorageError::InvalidConfig(
                "bucket unavailable".into(),
            )))
        })
    }
}

pub async fn memory_publisher() -> ArtifactPublisher {
    let storage = Storage::new(StorageConfig::memory()).await.unwrap();
    ArtifactPublisher::new(storage, chrono::Duration::hours(24))
}

pub struct Harness {
    pub jobs: Arc<MemoryJobStore>,
    pub liveness: Arc<MemoryLivenessStore>,
    pub engine: Arc<FakeEngine>,
    pub work_root: tempfile::TempDir,
    pub processor: Arc<JobProcessor>,
}

impl Harness {
    pub async fn new(engine: FakeEngine) -> Self {
        Self::with_sink(engine, Arc::new(memory_publisher().await)).await
    }

    pub async fn with_sink(engine: FakeEngine, sink: Arc<dyn ArtifactSink>) -> Self {
        let jobs = Arc::new(MemoryJobStore::default());
        let liveness = Arc::new(MemoryLivenessStore::default());
        let engine = Arc::new(engine);
        let work_root = tempfile::tempdir().unwrap();
        let runner_id = ulid::Ulid::new().to_string();

        let settings = ProcessorSettings::new(runner_id)
            .with_work_root(work_root.path())
            .with_engine_timeout(Duration::from_secs(300))
            .with_status_retry_delay(Duration::from_millis(1));

        let processor = Arc::new(JobProcessor::new(
            jobs.clone(),
            liveness.clone(),
            engine.clone(),
            sink,
            settings,
        ));

        Self {
            jobs,
            liveness,
            engine,
            work_root,
            processor,
        }
    }

    pub fn runner_id(&self) -> &str {
        &self.processor.settings().runner_id
    }

    /// Entries left under the work root.
    pub fn leftover_work_dirs(&self) -> usize {
        std::fs::read_dir(self.work_root.path()).unwrap().count()
    }

    pub async fn activate(&self) {
        let claim = ActivationClaim {
            runner_id: self.runner_id().to_string(),
            window_ends_at: Utc::now() + chrono::Duration::hours(1),
            stale_after: chrono::Duration::minutes(10),
        };
        assert!(self.liveness.try_activate(&claim).await.unwrap());
    }
}
