//! Job domain types for export submissions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a job.
///
/// Transitions only move forward: `queued → processing → done | failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for a worker to claim it.
    #[default]
    Queued,
    /// Claimed by the active worker.
    Processing,
    /// At least one format was exported and published.
    Done,
    /// No format produced a usable export.
    Failed,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// Get a simple status string for display and queries.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A published export for one format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOutput {
    /// Retrieval URL for the stored file.
    pub url: String,
    /// Size of the uploaded file in bytes.
    pub size: u64,
    /// Advisory expiry of the stored file.
    pub expires_at: DateTime<Utc>,
}

/// Final verdict written when a job leaves `processing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCompletion {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl JobCompletion {
    /// Verdict for a job that could not be processed at all.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            error: Some(error.into()),
            completed_at: Utc::now(),
        }
    }
}

/// A job is one user submission: a script plus the formats to export it to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    #[serde(rename = "job_id")]
    pub id: JobId,
    /// Untrusted user script fragment. Never parsed by the worker.
    #[serde(default)]
    pub script: Option<String>,
    /// Requested output format ids, in request order.
    #[serde(default)]
    pub formats: Vec<String>,
    /// Current status.
    #[serde(default)]
    pub status: JobStatus,
    /// Published exports keyed by format id.
    #[serde(default)]
    pub outputs: BTreeMap<String, ExportOutput>,
    /// Aggregate failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When a worker claimed the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new queued job.
    pub fn new<I, S>(script: impl Into<String>, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: JobId::new(),
            script: Some(script.into()),
            formats: formats.into_iter().map(Into::into).collect(),
            status: JobStatus::Queued,
            outputs: BTreeMap::new(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Drop the script, as if the submitter sent none.
    pub fn without_script(mut self) -> Self {
        self.script = None;
        self
    }

    /// Apply a completion verdict to the in-memory copy.
    pub fn complete(&mut self, completion: &JobCompletion) {
        self.status = completion.status;
        self.error = completion.error.clone();
        self.completed_at = Some(completion.completed_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
    }

    #[test]
    fn job_id_is_stored_as_job_id_field() {
        let job = Job::new("import bpy", ["glb", "fbx"]);
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["job_id"], serde_json::json!(job.id.to_string()));
        assert!(value.get("id").is_none());
        assert_eq!(value["status"], "queued");

        let back: Job = serde_json::from_value(value).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn missing_optional_fields_default() {
        let job = Job::new("", ["stl"]).without_script();
        let mut value = serde_json::to_value(&job).unwrap();
        value.as_object_mut().unwrap().remove("outputs");
        let back: Job = serde_json::from_value(value).unwrap();
        assert!(back.script.is_none());
        assert!(back.outputs.is_empty());
        assert!(back.started_at.is_none());
    }
}
