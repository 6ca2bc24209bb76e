//! Export worker for the 3D export pipeline.
//!
//! This crate turns queued jobs (a user script plus a list of formats) into
//! published model files by driving a headless engine once per format.
//!
//! # Architecture
//!
//! - `ExportScriptBuilder` - Generates the engine program for one format
//! - `SubprocessEngine` - Runs a program with a timeout and captures output
//! - `OutputClassifier` - Decides whether a run produced a usable file
//! - `ArtifactPublisher` - Uploads accepted files to object storage
//! - `JobProcessor` - Runs all formats of a job and writes the verdict
//! - `RunnerActor` - Polls for jobs until its time window closes
//!
//! # Usage
//!
//! ```ignore
//! use worker::{WorkerConfig, init_worker};
//!
//! let config = WorkerConfig::from_env()?;
//! if let Some((runner, handle)) = init_worker(config).await? {
//!     handle.await?;
//! }
//! ```

pub mod classify;
mod config;
pub mod engine;
mod init;
pub mod markers;
mod messages;
mod processor;
pub mod publish;
mod runner_actor;
pub mod script;

pub use classify::{Classification, MIN_VALID_SIZE, OutputClassifier};
pub use config::{ConfigError, WorkerConfig};
pub use engine::{Engine, EngineFuture, EngineRun, SubprocessEngine};
pub use init::init_worker;
pub use messages::{RunnerMessage, RunnerSnapshot, WorkerError};
pub use processor::{JobProcessor, JobReport, NO_VALID_EXPORTS, ProcessorSettings};
pub use publish::{ArtifactPublisher, ArtifactSink, PublishError, PublishFuture, artifact_key};
pub use runner_actor::{RunnerActor, RunnerSettings, start_runner};
pub use script::ExportScriptBuilder;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
