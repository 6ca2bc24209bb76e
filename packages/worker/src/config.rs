//! Worker settings read from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ulid::Ulid;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime configuration of the export worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long a runner keeps polling after it activates.
    pub runner_window: Duration,
    pub poll_interval: Duration,
    pub engine_bin: PathBuf,
    pub engine_timeout: Duration,
    /// Heartbeats older than this let another runner take over.
    pub heartbeat_stale: Duration,
    pub work_root: PathBuf,
    pub artifact_retention: chrono::Duration,
    pub runner_id: String,
    pub status_write_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            runner_window: Duration::from_secs(3300),
            poll_interval: Duration::from_secs(5),
            engine_bin: PathBuf::from("blender"),
            engine_timeout: Duration::from_secs(300),
            heartbeat_stale: Duration::from_secs(600),
            work_root: std::env::temp_dir(),
            artifact_retention: chrono::Duration::hours(24),
            runner_id: Ulid::new().to_string(),
            status_write_attempts: 3,
        }
    }
}

impl WorkerConfig {
    /// Build a config from environment variables.
    ///
    /// - `RUNNER_WINDOW_SECS` (default: 3300)
    /// - `POLL_INTERVAL_SECS` (default: 5)
    /// - `ENGINE_BIN` (default: `blender`)
    /// - `ENGINE_TIMEOUT_SECS` (default: 300)
    /// - `HEARTBEAT_STALE_SECS` (default: 600)
    /// - `WORK_ROOT` (default: system temp dir)
    /// - `ARTIFACT_RETENTION_HOURS` (default: 24)
    /// - `RUNNER_ID` (default: a fresh ULID)
    /// - `STATUS_WRITE_ATTEMPTS` (default: 3)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`WorkerConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).and_then(non_empty);
        let defaults = Self::default();

        let secs = |var: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match get(var) {
                Some(raw) => parse_positive::<u64>(var, &raw).map(Duration::from_secs),
                None => Ok(default),
            }
        };

        let artifact_retention = match get("ARTIFACT_RETENTION_HOURS") {
            Some(raw) => {
                let hours = parse_positive::<i64>("ARTIFACT_RETENTION_HOURS", &raw)?;
                chrono::Duration::try_hours(hours).ok_or_else(|| ConfigError::Invalid {
                    var: "ARTIFACT_RETENTION_HOURS",
                    value: raw,
                    reason: "out of range".into(),
                })?
            }
            None => defaults.artifact_retention,
        };

        let status_write_attempts = match get("STATUS_WRITE_ATTEMPTS") {
            Some(raw) => parse_positive::<u32>("STATUS_WRITE_ATTEMPTS", &raw)?,
            None => defaults.status_write_attempts,
        };

        Ok(Self {
            runner_window: secs("RUNNER_WINDOW_SECS", defaults.runner_window)?,
            poll_interval: secs("POLL_INTERVAL_SECS", defaults.poll_interval)?,
            engine_bin: get("ENGINE_BIN").map(PathBuf::from).unwrap_or(defaults.engine_bin),
            engine_timeout: secs("ENGINE_TIMEOUT_SECS", defaults.engine_timeout)?,
            heartbeat_stale: secs("HEARTBEAT_STALE_SECS", defaults.heartbeat_stale)?,
            work_root: get("WORK_ROOT").map(PathBuf::from).unwrap_or(defaults.work_root),
            artifact_retention,
            runner_id: get("RUNNER_ID").unwrap_or(defaults.runner_id),
            status_write_attempts,
        })
    }
}

fn parse_positive<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let invalid = |reason: String| ConfigError::Invalid {
        var,
        value: raw.to_string(),
        reason,
    };
    let value = raw.trim().parse::<T>().map_err(|e| invalid(e.to_string()))?;
    if value <= T::default() {
        return Err(invalid("must be greater than zero".into()));
    }
    Ok(value)
}

fn non_empty(s: String) -> Option<String> {
    let s = s.trim().to_string();
    if s.is_empty() { None } else { Some(s) }
}
