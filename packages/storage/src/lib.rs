//! Object storage for exported model files.
//!
//! - S3-compatible storage in production
//! - On-disk storage for local runs
//! - In-memory storage for tests
//!
//! A small wrapper around `object_store`, which already provides all three
//! backends. On top of it this crate adds key prefixing, content types and
//! retrieval URLs.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path;
use object_store::{Attribute, Attributes, ObjectStore, ObjectStoreExt, PutOptions, PutPayload};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    S3,
    Filesystem,
    Memory,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::S3 => "s3",
            StorageKind::Filesystem => "filesystem",
            StorageKind::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub allow_http: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub virtual_hosted_style: bool,
}

#[derive(Debug, Clone)]
pub enum StorageBackendConfig {
    S3(S3Config),
    Filesystem { root: PathBuf },
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendConfig,
    /// Optional key prefix applied to all object keys.
    pub prefix: Option<String>,
    /// Optional public base URL (CDN or bucket website) used for retrieval URLs.
    pub public_url: Option<String>,
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: StorageBackendConfig::Memory,
            prefix: None,
            public_url: None,
        }
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackendConfig::Filesystem { root: root.into() },
            prefix: None,
            public_url: None,
        }
    }

    pub fn s3(cfg: S3Config) -> Self {
        Self {
            backend: StorageBackendConfig::S3(cfg),
            prefix: None,
            public_url: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = non_empty(prefix.into());
        self
    }

    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = non_empty(url.into());
        self
    }

    /// Build a config from environment variables.
    ///
    /// Selection rules:
    /// - If `STORAGE_BACKEND` is set: use it (`s3`, `filesystem`, `memory`)
    /// - Otherwise: default to filesystem (`./data/object_store`)
    ///
    /// S3 env vars (S3-compatible):
    /// - `S3_BUCKET` (required when backend is `s3`)
    /// - `AWS_REGION` (default: `us-east-1`)
    /// - `S3_ENDPOINT` (optional, e.g. `http://localhost:9000`)
    /// - `S3_ALLOW_HTTP` (`true`/`false`, default: auto true if endpoint is http://)
    /// - `S3_VIRTUAL_HOSTED_STYLE` (`true`/`false`, default: false)
    /// - `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN` (optional)
    ///
    /// Filesystem env vars:
    /// - `STORAGE_FS_ROOT` (default: `./data/object_store`)
    ///
    /// Common:
    /// - `STORAGE_PREFIX` (optional, e.g. `exports-prod/`)
    /// - `STORAGE_PUBLIC_URL` (optional, e.g. `https://cdn.example.com`)
    pub fn from_env() -> Result<Self, StorageError> {
        let backend = std::env::var("STORAGE_BACKEND").ok().and_then(non_empty);
        let prefix = std::env::var("STORAGE_PREFIX").unwrap_or_default();
        let public_url = std::env::var("STORAGE_PUBLIC_URL").unwrap_or_default();

        let cfg = match backend.as_deref() {
            Some("s3") => Self::s3(read_s3_config()?),
            Some("filesystem") | Some("fs") | None => Self::filesystem(fs_root_from_env()),
            Some("memory") | Some("mem") => Self::memory(),
            Some(other) => {
                return Err(StorageError::InvalidConfig(format!(
                    "unsupported STORAGE_BACKEND={other} (expected s3|filesystem|memory)"
                )));
            }
        };

        Ok(cfg.with_prefix(prefix).with_public_url(public_url))
    }
}

/// Where a stored object can be fetched from, derived from the backend config.
#[derive(Debug, Clone)]
enum UrlBase {
    Public(String),
    S3 {
        bucket: String,
        region: String,
        endpoint: Option<String>,
        virtual_hosted_style: bool,
    },
    Filesystem(PathBuf),
    Memory,
}

#[derive(Clone)]
pub struct Storage {
    kind: StorageKind,
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
    url_base: UrlBase,
}

impl Storage {
    pub fn kind_str(&self) -> &'static str {
        self.kind.as_str()
    }

    pub async fn new(cfg: StorageConfig) -> Result<Self, StorageError> {
        let (kind, store, url_base): (StorageKind, Arc<dyn ObjectStore>, UrlBase) =
            match cfg.backend {
                StorageBackendConfig::S3(s3) => {
                    let base = UrlBase::S3 {
                        bucket: s3.bucket.clone(),
                        region: s3.region.clone(),
                        endpoint: s3.endpoint.clone(),
                        virtual_hosted_style: s3.virtual_hosted_style,
                    };
                    (StorageKind::S3, Arc::new(build_s3(s3)?), base)
                }
                StorageBackendConfig::Filesystem { root } => {
                    ensure_dir(&root)?;
                    let root = std::fs::canonicalize(&root)?;
                    let fs = object_store::local::LocalFileSystem::new_with_prefix(&root)?;
                    (StorageKind::Filesystem, Arc::new(fs), UrlBase::Filesystem(root))
                }
                StorageBackendConfig::Memory => {
                    let mem = object_store::memory::InMemory::new();
                    (StorageKind::Memory, Arc::new(mem), UrlBase::Memory)
                }
            };

        let url_base = match cfg.public_url {
            Some(url) => UrlBase::Public(url.trim_end_matches('/').to_string()),
            None => url_base,
        };

        Ok(Self {
            kind,
            store,
            prefix: cfg.prefix.and_then(non_empty),
            url_base,
        })
    }

    pub async fn from_env() -> Result<Self, StorageError> {
        Self::new(StorageConfig::from_env()?).await
    }

    fn to_path(&self, key: &str) -> Result<Path, StorageError> {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Err(StorageError::InvalidConfig(
                "object key must not be empty".to_string(),
            ));
        }

        let joined = match self.prefix.as_deref() {
            Some(prefix) => {
                let prefix = prefix.trim_matches('/');
                if prefix.is_empty() {
                    key.to_string()
                } else {
                    format!("{prefix}/{key}")
                }
            }
            None => key.to_string(),
        };

        Ok(Path::from(joined))
    }

    pub async fn put_bytes(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        let path = self.to_path(key)?;
        self.store.put(&path, PutPayload::from(bytes)).await?;
        Ok(())
    }

    /// Store `bytes` under `key` with a content type. Overwrites any existing object.
    ///
    /// The local filesystem backend cannot persist attributes, so the content
    /// type is dropped there.
    pub async fn put_with_content_type(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        if self.kind == StorageKind::Filesystem {
            return self.put_bytes(key, bytes).await;
        }

        let path = self.to_path(key)?;
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };
        self.store
            .put_opts(&path, PutPayload::from(bytes), opts)
            .await?;
        Ok(())
    }

    pub async fn get_bytes(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.to_path(key)?;
        let res = self.store.get(&path).await?;
        Ok(res.bytes().await?)
    }

    /// Count objects stored under a key prefix.
    pub async fn count_under(&self, key_prefix: &str) -> Result<usize, StorageError> {
        use futures_util::TryStreamExt;

        let path = self.to_path(key_prefix)?;
        let objects: Vec<_> = self.store.list(Some(&path)).try_collect().await?;
        Ok(objects.len())
    }

    /// Durable retrieval URL for a stored key.
    pub fn url_for(&self, key: &str) -> Result<String, StorageError> {
        let path = self.to_path(key)?;
        let url = match &self.url_base {
            UrlBase::Public(base) => format!("{base}/{path}"),
            UrlBase::S3 {
                bucket,
                endpoint: Some(endpoint),
                ..
            } => format!("{}/{bucket}/{path}", endpoint.trim_end_matches('/')),
            UrlBase::S3 {
                bucket,
                region,
                endpoint: None,
                virtual_hosted_style: true,
            } => format!("https://{bucket}.s3.{region}.amazonaws.com/{path}"),
            UrlBase::S3 {
                bucket,
                region,
                endpoint: None,
                virtual_hosted_style: false,
            } => format!("https://s3.{region}.amazonaws.com/{bucket}/{path}"),
            UrlBase::Filesystem(root) => format!("file://{}/{path}", root.display()),
            UrlBase::Memory => format!("memory:///{path}"),
        };
        Ok(url)
    }
}

fn ensure_dir(root: &FsPath) -> Result<(), StorageError> {
    std::fs::create_dir_all(root)?;
    Ok(())
}

fn fs_root_from_env() -> PathBuf {
    std::env::var("STORAGE_FS_ROOT")
        .ok()
        .and_then(non_empty)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./data/object_store"))
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_bool_env(var_name: &str) -> Result<Option<bool>, StorageError> {
    let v = match std::env::var(var_name) {
        Ok(v) => v,
        Err(std::env::VarError::NotPresent) => return Ok(None),
        Err(e) => {
            return Err(StorageError::InvalidConfig(format!(
                "failed reading {var_name}: {e}"
            )));
        }
    };

    let normalized = v.trim().to_ascii_lowercase();
    let parsed = match normalized.as_str() {
        "1" | "true" | "yes" | "y" => true,
        "0" | "false" | "no" | "n" => false,
        _ => {
            return Err(StorageError::InvalidConfig(format!(
                "invalid boolean for {var_name}={v} (expected true/false)"
            )));
        }
    };
    Ok(Some(parsed))
}

fn read_s3_config() -> Result<S3Config, StorageError> {
    let bucket = std::env::var("S3_BUCKET")
        .ok()
        .and_then(non_empty)
        .ok_or_else(|| {
            StorageError::InvalidConfig("S3_BUCKET is required for s3 backend".into())
        })?;

    let region = std::env::var("AWS_REGION")
        .ok()
        .and_then(non_empty)
        .unwrap_or_else(|| "us-east-1".to_string());

    let endpoint = std::env::var("S3_ENDPOINT").ok().and_then(non_empty);
    let allow_http = match parse_bool_env("S3_ALLOW_HTTP")? {
        Some(v) => v,
        None => endpoint
            .as_deref()
            .is_some_and(|e| e.trim_start().to_ascii_lowercase().starts_with("http://")),
    };

    let virtual_hosted_style = parse_bool_env("S3_VIRTUAL_HOSTED_STYLE")?.unwrap_or(false);

    Ok(S3Config {
        bucket,
        region,
        endpoint,
        allow_http,
        access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok().and_then(non_empty),
        secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY")
            .ok()
            .and_then(non_empty),
        session_token: std::env::var("AWS_SESSION_TOKEN").ok().and_then(non_empty),
        virtual_hosted_style,
    })
}

fn build_s3(cfg: S3Config) -> Result<object_store::aws::AmazonS3, StorageError> {
    let mut builder = object_store::aws::AmazonS3Builder::new()
        .with_bucket_name(cfg.bucket)
        .with_region(cfg.region)
        .with_virtual_hosted_style_request(cfg.virtual_hosted_style);

    if let Some(endpoint) = cfg.endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    if cfg.allow_http {
        builder = builder.with_allow_http(true);
    }
    if let Some(access_key_id) = cfg.access_key_id {
        builder = builder.with_access_key_id(access_key_id);
    }
    if let Some(secret_access_key) = cfg.secret_access_key {
        builder = builder.with_secret_access_key(secret_access_key);
    }
    if let Some(session_token) = cfg.session_token {
        builder = builder.with_token(session_token);
    }

    Ok(builder.build()?)
}
