//! Core domain types for the export worker.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobStatus and ExportOutput for submissions
//! - ExportFormat for the closed set of output formats
//! - RunnerHeartbeat for worker liveness
//! - JobStore and LivenessStore, the store seams the worker runs against

mod format;
mod heartbeat;
mod job;
mod ledger;

pub use format::{
    DEFAULT_CONTENT_TYPE, ExportFormat, UNSUPPORTED_FORMATS, content_type_for, extension_for,
    sanitize_id,
};
pub use heartbeat::{ActivationClaim, RunnerHeartbeat, RunnerStatus};
pub use job::{ExportOutput, Job, JobCompletion, JobId, JobStatus};
pub use ledger::{JobStore, LivenessStore, StoreError, StoreFuture};
