//! Database schema definitions using SurrealQL.

use crate::{DbError, get_db};

/// Initialize the database schema.
///
/// This creates all necessary tables, fields, and indexes. Safe to run on every start.
pub async fn init_schema() -> Result<(), DbError> {
    let db = get_db()?;

    tracing::info!("Initializing database schema...");

    db.query(JOB_SCHEMA).await?.check()?;
    db.query(HEARTBEAT_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema.
///
/// Timestamps are written by the worker and read back into typed fields, so
/// only the fields the worker filters or orders on are typed here.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMALESS;

DEFINE FIELD IF NOT EXISTS job_id ON job TYPE string;
DEFINE FIELD IF NOT EXISTS status ON job TYPE string
    ASSERT $value IN ["queued", "processing", "done", "failed"];
DEFINE FIELD IF NOT EXISTS formats ON job TYPE array<string> DEFAULT [];

DEFINE INDEX IF NOT EXISTS job_status ON job FIELDS status;
-- Claim order: oldest queued job first, id breaks ties
DEFINE INDEX IF NOT EXISTS job_claim_order ON job FIELDS status, created_at, job_id;
"#;

/// Liveness record schema. A single well-known record lives in this table.
const HEARTBEAT_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS runner_heartbeat SCHEMALESS;

DEFINE FIELD IF NOT EXISTS status ON runner_heartbeat TYPE string
    ASSERT $value IN ["active", "inactive"];
DEFINE FIELD IF NOT EXISTS runner_id ON runner_heartbeat TYPE string DEFAULT "";
DEFINE FIELD IF NOT EXISTS version ON runner_heartbeat TYPE int DEFAULT 0;
"#;
