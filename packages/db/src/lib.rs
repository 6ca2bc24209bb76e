//! SurrealDB integration for the export worker.
//!
//! This crate provides database connectivity, repositories for the job
//! ledger and the liveness record, and the store implementations the
//! worker loop runs against.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod schema;
mod stores;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError, get_db, init_db};
pub use schema::init_schema;
pub use stores::{SurrealJobStore, SurrealLivenessStore};

/// Initialize the database with the given configuration.
///
/// This should be called once at application startup.
pub async fn init(config: DbConfig) -> Result<(), DbError> {
    init_db(config).await?;
    init_schema().await?;
    Ok(())
}
