//! The process-wide liveness record for the export worker.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::JobId;

/// Whether a worker currently holds the active claim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerStatus {
    Active,
    #[default]
    Inactive,
}

/// Shared liveness document. One well-known record per deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerHeartbeat {
    pub status: RunnerStatus,
    /// Worker process that owns the active claim.
    #[serde(default)]
    pub runner_id: String,
    pub last_active: DateTime<Utc>,
    /// After this instant the owning loop stops polling.
    pub window_ends_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_job_id: Option<JobId>,
    /// Compare-and-swap counter, bumped on every activation.
    #[serde(default)]
    pub version: u64,
}

impl RunnerHeartbeat {
    /// A fresh active record for `runner_id`.
    pub fn activated(
        runner_id: impl Into<String>,
        window_ends_at: DateTime<Utc>,
        now: DateTime<Utc>,
        version: u64,
    ) -> Self {
        Self {
            status: RunnerStatus::Active,
            runner_id: runner_id.into(),
            last_active: now,
            window_ends_at,
            current_job_id: None,
            version,
        }
    }

    /// True if the last update is older than `stale_after`.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        now - self.last_active > stale_after
    }

    /// A new worker may take over when nobody is active or the owner went quiet.
    pub fn is_claimable(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        self.status == RunnerStatus::Inactive || self.is_stale(now, stale_after)
    }

    pub fn is_owned_by(&self, runner_id: &str) -> bool {
        self.status == RunnerStatus::Active && self.runner_id == runner_id
    }
}

/// Parameters of an activation attempt.
#[derive(Debug, Clone)]
pub struct ActivationClaim {
    pub runner_id: String,
    pub window_ends_at: DateTime<Utc>,
    pub stale_after: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_record_is_claimable_only_once_stale() {
        let now = Utc::now();
        let stale_after = Duration::minutes(10);
        let mut hb = RunnerHeartbeat::activated("a", now + Duration::hours(1), now, 1);

        assert!(!hb.is_claimable(now + Duration::minutes(5), stale_after));
        assert!(hb.is_claimable(now + Duration::minutes(11), stale_after));

        hb.status = RunnerStatus::Inactive;
        assert!(hb.is_claimable(now, stale_after));
    }

    #[test]
    fn ownership_requires_active_status() {
        let now = Utc::now();
        let mut hb = RunnerHeartbeat::activated("a", now, now, 1);
        assert!(hb.is_owned_by("a"));
        assert!(!hb.is_owned_by("b"));
        hb.status = RunnerStatus::Inactive;
        assert!(!hb.is_owned_by("a"));
    }
}
