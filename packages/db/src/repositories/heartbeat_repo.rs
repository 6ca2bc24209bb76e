//! Heartbeat repository: the single liveness record.

use chrono::Utc;
use export_core::{ActivationClaim, JobId, RunnerHeartbeat, RunnerStatus};

use crate::{DbError, get_db};

/// Repository for the well-known `runner_heartbeat:current` record.
pub struct HeartbeatRepository;

const TABLE: &str = "runner_heartbeat";
const RECORD: &str = "current";

impl HeartbeatRepository {
    /// Read the liveness record, if any worker ever wrote one.
    pub async fn get() -> Result<Option<RunnerHeartbeat>, DbError> {
        let db = get_db()?;
        let record: Option<RunnerHeartbeat> = db.select((TABLE, RECORD)).await?;
        Ok(record)
    }

    /// Take the active claim if nobody live holds it.
    ///
    /// This is an optimistic compare-and-swap on `version`: the staleness
    /// check happens on the value that was read, and the write only lands if
    /// nobody bumped the version in between.
    pub async fn try_activate(claim: &ActivationClaim) -> Result<bool, DbError> {
        let db = get_db()?;
        let now = Utc::now();

        let Some(current) = Self::get().await? else {
            let fresh = RunnerHeartbeat::activated(&claim.runner_id, claim.window_ends_at, now, 1);
            // A concurrent creator makes this fail on the duplicate record id.
            let created: Result<Option<RunnerHeartbeat>, _> =
                db.create((TABLE, RECORD)).content(fresh).await;
            return match created {
                Ok(record) => Ok(record.is_some()),
                Err(err) => {
                    tracing::debug!(error = %err, "Heartbeat record created concurrently");
                    Ok(false)
                }
            };
        };

        if !current.is_claimable(now, claim.stale_after) {
            tracing::debug!(
                owner = %current.runner_id,
                last_active = %current.last_active,
                "Liveness record held by a live worker"
            );
            return Ok(false);
        }

        let next = RunnerHeartbeat::activated(
            &claim.runner_id,
            claim.window_ends_at,
            now,
            current.version + 1,
        );

        let mut result = db
            .query(
                r#"
                UPDATE type::thing($tb, $id)
                CONTENT $next
                WHERE version = $expected
                RETURN AFTER
                "#,
            )
            .bind(("tb", TABLE))
            .bind(("id", RECORD))
            .bind(("next", next))
            .bind(("expected", current.version as i64))
            .await?;

        let records: Vec<RunnerHeartbeat> = result.take(0)?;
        Ok(!records.is_empty())
    }

    /// Refresh the owner's heartbeat.
    pub async fn beat(runner_id: &str, current_job: Option<JobId>) -> Result<bool, DbError> {
        let db = get_db()?;

        let mut result = db
            .query(
                r#"
                UPDATE type::thing($tb, $id)
                SET last_active = $now, current_job_id = $job
                WHERE status = "active" AND runner_id = $runner
                RETURN AFTER
                "#,
            )
            .bind(("tb", TABLE))
            .bind(("id", RECORD))
            .bind(("now", Utc::now()))
            .bind(("job", current_job.map(|id| id.to_string())))
            .bind(("runner", runner_id.to_string()))
            .await?;

        let records: Vec<RunnerHeartbeat> = result.take(0)?;
        Ok(!records.is_empty())
    }

    /// Release the owner's claim.
    pub async fn deactivate(runner_id: &str) -> Result<bool, DbError> {
        let db = get_db()?;

        let mut result = db
            .query(
                r#"
                UPDATE type::thing($tb, $id)
                SET status = $inactive, last_active = $now, current_job_id = NONE
                WHERE status = "active" AND runner_id = $runner
                RETURN AFTER
                "#,
            )
            .bind(("tb", TABLE))
            .bind(("id", RECORD))
            .bind(("inactive", RunnerStatus::Inactive))
            .bind(("now", Utc::now()))
            .bind(("runner", runner_id.to_string()))
            .await?;

        let records: Vec<RunnerHeartbeat> = result.take(0)?;
        Ok(!records.is_empty())
    }
}
