//! Database connection management with lazy initialization.

use std::sync::LazyLock;
use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect};
use surrealdb::opt::auth::Root;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Global database instance using lazy initialization.
static DB: LazyLock<OnceCell<Surreal<Any>>> = LazyLock::new(OnceCell::new);

/// Database connection wrapper.
pub type Database = Surreal<Any>;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Connection endpoint: "mem://", "rocksdb://path", "ws://host:port", ...
    pub endpoint: String,
    /// Namespace to use
    pub namespace: String,
    /// Database name to use
    pub database: String,
    /// Optional root credentials for authentication
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "exports".to_string(),
            database: "main".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    /// Create a config for in-memory testing.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Create a config for RocksDB persistence (requires rocksdb feature).
    pub fn rocksdb(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("rocksdb://{}", path.into()),
            ..Default::default()
        }
    }

    /// Build a config from environment variables.
    ///
    /// - `DB_ENDPOINT` (default: `mem://`)
    /// - `DB_NAMESPACE` (default: `exports`)
    /// - `DB_DATABASE` (default: `main`)
    /// - `DB_USER` / `DB_PASS` (root credentials, both or neither)
    pub fn from_env() -> Result<Self, DbError> {
        let defaults = Self::default();
        let endpoint = env_non_empty("DB_ENDPOINT").unwrap_or(defaults.endpoint);
        let namespace = env_non_empty("DB_NAMESPACE").unwrap_or(defaults.namespace);
        let database = env_non_empty("DB_DATABASE").unwrap_or(defaults.database);

        let credentials = match (env_non_empty("DB_USER"), env_non_empty("DB_PASS")) {
            (Some(user), Some(pass)) => Some((user, pass)),
            (None, None) => None,
            _ => {
                return Err(DbError::Config(
                    "DB_USER and DB_PASS must be set together".into(),
                ));
            }
        };

        Ok(Self {
            endpoint,
            namespace,
            database,
            credentials,
        })
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set root credentials for authentication.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database not initialized - call init_db first")]
    NotInitialized,
    #[error("Invalid database config: {0}")]
    Config(String),
    #[error("Connection error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<DbError> for export_core::StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => export_core::StoreError::NotFound(what),
            other => export_core::StoreError::Backend(other.to_string()),
        }
    }
}

/// Initialize the database connection.
///
/// This should be called once at application startup before any database operations.
/// Later calls return the existing connection.
pub async fn init_db(config: DbConfig) -> Result<&'static Database, DbError> {
    DB.get_or_try_init(|| async {
        tracing::info!("Connecting to database: {}", config.endpoint);

        let db = connect(&config.endpoint).await?;

        if let Some((username, password)) = &config.credentials {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns(&config.namespace).use_db(&config.database).await?;

        tracing::info!(
            "Connected to database: {}/{}",
            config.namespace,
            config.database
        );

        Ok(db)
    })
    .await
}

/// Get the database connection.
pub fn get_db() -> Result<&'static Database, DbError> {
    DB.get().ok_or(DbError::NotInitialized)
}
