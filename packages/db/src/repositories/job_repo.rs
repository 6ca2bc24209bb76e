//! Job repository: the shared job ledger.

use chrono::Utc;
use export_core::{ExportOutput, Job, JobCompletion, JobId};

use crate::{DbError, get_db};

/// Repository for job persistence operations.
pub struct JobRepository;

/// How many candidates a single claim call tries before reporting an empty queue.
const CLAIM_ATTEMPTS: usize = 5;

impl JobRepository {
    /// Create a new job in the database.
    ///
    /// Used by the submission side; the worker never creates jobs.
    pub async fn create(job: &Job) -> Result<Job, DbError> {
        let db = get_db()?;

        let record: Option<Job> = db
            .create(("job", job.id.to_string()))
            .content(job.clone())
            .await?;

        record.ok_or_else(|| DbError::Query("Failed to create job".into()))
    }

    /// Get a job by ID.
    pub async fn get(id: JobId) -> Result<Job, DbError> {
        let db = get_db()?;

        let record: Option<Job> = db.select(("job", id.to_string())).await?;

        record.ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))
    }

    /// Claim the oldest queued job.
    ///
    /// Oldest means earliest `created_at`, ties broken by id. `created_at` is
    /// cast before ordering since records written through serde hold it as text.
    ///
    /// The status flip is a conditional update on `status = "queued"`, so when
    /// two workers race for the same record exactly one update matches. The
    /// loser moves on to the next candidate.
    pub async fn claim_next() -> Result<Option<Job>, DbError> {
        let db = get_db()?;

        for _ in 0..CLAIM_ATTEMPTS {
            let mut result = db
                .query(
                    r#"
                    SELECT *, <datetime> created_at AS queued_at FROM job
                    WHERE status = "queued"
                    ORDER BY queued_at ASC, job_id ASC
                    LIMIT 1
                    "#,
                )
                .await?;

            let candidates: Vec<Job> = result.take(0)?;
            let Some(candidate) = candidates.into_iter().next() else {
                return Ok(None);
            };

            let mut result = db
                .query(
                    r#"
                    UPDATE type::thing('job', $id)
                    SET status = "processing", started_at = $now
                    WHERE status = "queued"
                    RETURN AFTER
                    "#,
                )
                .bind(("id", candidate.id.to_string()))
                .bind(("now", Utc::now()))
                .await?;

            let claimed: Vec<Job> = result.take(0)?;
            if let Some(job) = claimed.into_iter().next() {
                return Ok(Some(job));
            }

            tracing::debug!(job_id = %candidate.id, "Job claimed by another worker");
        }

        Ok(None)
    }

    /// Merge one output into the job's `outputs` map.
    pub async fn record_output(
        id: JobId,
        format: &str,
        output: &ExportOutput,
    ) -> Result<(), DbError> {
        let db = get_db()?;

        let value = serde_json::to_value(output).map_err(|e| DbError::Query(e.to_string()))?;
        let mut outputs = serde_json::Map::new();
        outputs.insert(format.to_string(), value);

        // MERGE is recursive, so outputs recorded earlier stay in place.
        let record: Option<Job> = db
            .update(("job", id.to_string()))
            .merge(serde_json::json!({ "outputs": outputs }))
            .await?;

        record
            .map(|_| ())
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))
    }

    /// Move a `processing` job to its terminal status.
    ///
    /// Jobs in any other status are left untouched and reported as not found.
    pub async fn finish(id: JobId, completion: &JobCompletion) -> Result<Job, DbError> {
        let db = get_db()?;

        let mut result = db
            .query(
                r#"
                UPDATE type::thing('job', $id)
                MERGE $patch
                WHERE status = "processing"
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("patch", completion.clone()))
            .await?;

        let records: Vec<Job> = result.take(0)?;

        records
            .into_iter()
            .next()
            .ok_or_else(|| DbError::NotFound(format!("Processing job not found: {}", id)))
    }
}
