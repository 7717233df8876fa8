//! Object storage for media content
//!
//! [`ObjectStorage`] abstracts the bucket; [`SupabaseStorage`] talks to a
//! Supabase-compatible storage REST API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use tracing::debug;

use crate::config::StorageConfig;
use crate::error::{IngestError, Result};
use crate::logging::redact_secrets;
use crate::media::Disposition;

/// Per-upload headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    pub content_type: String,
    pub content_disposition: Disposition,
    pub cache_control: String,
    /// Overwrite an existing object at the same path
    pub upsert: bool,
}

/// Storage backend trait for the media bucket.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Write `data` at `path`.
    async fn upload(&self, path: &str, data: &[u8], options: &UploadOptions) -> Result<()>;

    /// Check whether an object exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Public URL for `path`; no network access.
    fn public_url(&self, path: &str) -> String;
}

/// Supabase storage REST client
#[derive(Clone)]
pub struct SupabaseStorage {
    http: Client,
    base_url: String,
    bucket: String,
    service_key: String,
}

impl SupabaseStorage {
    #[must_use]
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            http: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            service_key: config.service_key.clone(),
        }
    }

    fn object_url(&self, kind: &str, path: &str) -> String {
        format!("{}/storage/v1/object/{kind}{}/{path}", self.base_url, self.bucket)
    }

    fn failure(status: StatusCode, body: &str) -> IngestError {
        let text = format!("HTTP {status}: {}", redact_secrets(body));
        if status.is_client_error() && status != StatusCode::REQUEST_TIMEOUT && status != StatusCode::TOO_MANY_REQUESTS {
            IngestError::StorageRejected(text)
        } else {
            IngestError::Storage(text)
        }
    }
}

#[async_trait]
impl ObjectStorage for SupabaseStorage {
    async fn upload(&self, path: &str, data: &[u8], options: &UploadOptions) -> Result<()> {
        let response = self
            .http
            .post(self.object_url("", path))
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
            .header("content-type", &options.content_type)
            .header("content-disposition", options.content_disposition.as_str())
            .header("cache-control", format!("max-age={}", options.cache_control))
            .header("x-upsert", options.upsert.to_string())
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| IngestError::Storage(redact_secrets(&e.to_string()).into_owned()))?;

        let status = response.status();
        if status.is_success() {
            debug!(path, size = data.len(), "Uploaded object");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(Self::failure(status, &body))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        // A signed URL can only be minted for an object that exists
        let response = self
            .http
            .post(self.object_url("sign/", path))
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
            .json(&json!({ "expiresIn": 60 }))
            .send()
            .await
            .map_err(|e| IngestError::Storage(redact_secrets(&e.to_string()).into_owned()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND
            || (status == StatusCode::BAD_REQUEST && body.to_lowercase().contains("not found"))
        {
            return Ok(false);
        }
        Err(Self::failure(status, &body))
    }

    fn public_url(&self, path: &str) -> String {
        self.object_url("public/", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> SupabaseStorage {
        SupabaseStorage::new(&StorageConfig {
            base_url: "https://project.supabase.co/".into(),
            bucket: "media".into(),
            ..StorageConfig::default()
        })
    }

    #[test]
    fn public_url_layout() {
        assert_eq!(
            storage().public_url("F1.jpg"),
            "https://project.supabase.co/storage/v1/object/public/media/F1.jpg"
        );
    }

    #[test]
    fn client_errors_are_rejections() {
        assert!(matches!(
            SupabaseStorage::failure(StatusCode::FORBIDDEN, "denied"),
            IngestError::StorageRejected(_)
        ));
        assert!(matches!(
            SupabaseStorage::failure(StatusCode::TOO_MANY_REQUESTS, ""),
            IngestError::Storage(_)
        ));
        assert!(matches!(
            SupabaseStorage::failure(StatusCode::BAD_GATEWAY, ""),
            IngestError::Storage(_)
        ));
    }
}
