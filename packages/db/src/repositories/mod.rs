//! Repository implementations for database operations.

mod heartbeat_repo;
mod job_repo;

pub use heartbeat_repo::HeartbeatRepository;
pub use job_repo::JobRepository;
