//! Two-stage media transfer: Telegram fetch, then object-storage upload.
//!
//! Persisting the resulting metadata is left to the caller; a crash between
//! upload and persistence leaves an object the repair jobs reconcile.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::error::Result;
use crate::logging::OperationTimer;
use crate::media::{content_disposition, normalize_mime, storage_path};
use crate::metrics;
use crate::retry::{with_retry, Failure, RetryPolicy};
use crate::storage::{ObjectStorage, UploadOptions};
use crate::telegram::TelegramClient;

/// Where content ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMedia {
    /// Object key, `file_unique_id.ext`
    pub storage_path: String,
    /// Public URL of the object
    pub public_url: String,
    /// MIME type the object was uploaded with
    pub mime_type: String,
    /// Bytes uploaded
    pub size: i64,
}

/// Downloads media from Telegram and stores it under its deterministic key
#[derive(Clone)]
pub struct MediaDownloader {
    telegram: TelegramClient,
    storage: Arc<dyn ObjectStorage>,
    upload_policy: RetryPolicy,
    cache_control: String,
}

impl MediaDownloader {
    /// Create a downloader uploading with `upload_policy` retries
    #[must_use]
    pub fn new(
        telegram: TelegramClient,
        storage: Arc<dyn ObjectStorage>,
        upload_policy: RetryPolicy,
        cache_control: impl Into<String>,
    ) -> Self {
        Self {
            telegram,
            storage,
            upload_policy,
            cache_control: cache_control.into(),
        }
    }

    /// Storage backend shared with other components
    #[must_use]
    pub fn storage(&self) -> Arc<dyn ObjectStorage> {
        Arc::clone(&self.storage)
    }

    /// Fetch `file_id` from Telegram and upload it as `file_unique_id.ext`
    #[instrument(skip_all, fields(file_unique_id = %file_unique_id))]
    pub async fn download_and_upload(
        &self,
        file_id: &str,
        file_unique_id: &str,
        mime_type: Option<&str>,
    ) -> Result<StoredMedia> {
        let timer = OperationTimer::new("download_and_upload");
        let downloaded = self.telegram.fetch_file(file_id).await?;
        let stored = self.upload(file_unique_id, mime_type, &downloaded.bytes).await?;
        timer.finish();
        Ok(stored)
    }

    /// Upload bytes under the deterministic key, retrying transient failures
    pub async fn upload(&self, file_unique_id: &str, mime_type: Option<&str>, bytes: &[u8]) -> Result<StoredMedia> {
        let path = storage_path(file_unique_id, mime_type);
        let content_type = mime_type
            .map(normalize_mime)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let options = UploadOptions {
            content_type: content_type.clone(),
            content_disposition: content_disposition(Some(&content_type)),
            cache_control: self.cache_control.clone(),
            upsert: true,
        };

        with_retry("storage_upload", &self.upload_policy, |_| {
            let path = path.as_str();
            let options = &options;
            async move {
                self.storage
                    .upload(path, bytes, options)
                    .await
                    .map_err(Failure::classify)
            }
        })
        .await?;

        metrics::record_upload(options.content_disposition.as_str());
        info!(storage_path = %path, size = bytes.len(), "Stored media");

        Ok(StoredMedia {
            public_url: self.storage.public_url(&path),
            storage_path: path,
            mime_type: content_type,
            size: i64::try_from(bytes.len()).unwrap_or(i64::MAX),
        })
    }
}
