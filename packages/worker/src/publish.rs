//! Uploads accepted exports to object storage.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use bytes::Bytes;
use chrono::{Duration, Utc};
use export_core::{ExportOutput, JobId, content_type_for, extension_for, sanitize_id};
use storage::{Storage, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to read export file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Future type returned by [`ArtifactSink::publish`].
pub type PublishFuture<'a> = Pin<Box<dyn Future<Output = Result<ExportOutput, PublishError>> + Send + 'a>>;

/// Destination for accepted export files.
pub trait ArtifactSink: Send + Sync + 'static {
    fn publish<'a>(&'a self, file: &'a Path, job_id: JobId, format_id: &'a str)
    -> PublishFuture<'a>;
}

/// Storage key for one job's export in one format.
///
/// Stable across attempts so republishing overwrites instead of accumulating.
pub fn artifact_key(job_id: JobId, format_id: &str) -> String {
    let format = match sanitize_id(format_id) {
        s if s.is_empty() => "unknown".to_string(),
        s => s,
    };
    format!("exports/{job_id}/{format}/model.{}", extension_for(format_id))
}

/// Publishes to an object store and reports a retrieval URL.
pub struct ArtifactPublisher {
    storage: Storage,
    retention: Duration,
}

impl ArtifactPublisher {
    pub fn new(storage: Storage, retention: Duration) -> Self {
        Self { storage, retention }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    async fn upload(
        &self,
        file: &Path,
        job_id: JobId,
        format_id: &str,
    ) -> Result<ExportOutput, PublishError> {
        let data = tokio::fs::read(file).await.map_err(|source| PublishError::Read {
            path: file.display().to_string(),
            source,
        })?;
        let size = data.len() as u64;
        let key = artifact_key(job_id, format_id);

        self.storage
            .put_with_content_type(&key, Bytes::from(data), content_type_for(format_id))
            .await?;
        let url = self.storage.url_for(&key)?;

        tracing::debug!(job_id = %job_id, format = format_id, key = %key, size, "Published export");

        Ok(ExportOutput {
            url,
            size,
            expires_at: Utc::now() + self.retention,
        })
    }
}

impl ArtifactSink for ArtifactPublisher {
    fn publish<'a>(
        &'a self,
        file: &'a Path,
        job_id: JobId,
        format_id: &'a str,
    ) -> PublishFuture<'a> {
        Box::pin(self.upload(file, job_id, format_id))
    }
}
