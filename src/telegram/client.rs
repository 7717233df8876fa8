//! Telegram file resolution and download
//!
//! `getFile` and the file download use separate retry budgets; both pass
//! through one shared [`Throttle`] so the bot never exceeds its request rate.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info};

use super::types::{ApiResponse, TgFile};
use crate::config::TelegramConfig;
use crate::error::{IngestError, Result};
use crate::logging::redact_secrets;
use crate::metrics;
use crate::retry::{with_retry, Failure, RetryPolicy};
use crate::throttle::Throttle;

/// Bytes fetched from Telegram
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    /// File content; never empty
    pub bytes: Vec<u8>,
    /// Remote path reported by `getFile`
    pub file_path: String,
}

/// Classify a Bot API failure.
///
/// "Temporarily unavailable" wins over everything else because Telegram
/// reports it as `wrong file_id or the file is temporarily unavailable`.
#[must_use]
pub fn classify_api_error(status: Option<u16>, description: &str) -> Failure {
    let lower = description.to_lowercase();
    let text = redact_secrets(description).into_owned();

    if lower.contains("temporarily unavailable") {
        return Failure::Retryable(IngestError::Telegram(text));
    }
    if lower.contains("invalid file_id") || lower.contains("wrong file_id") || lower.contains("file_id invalid") {
        return Failure::Permanent(IngestError::InvalidFileId(text));
    }
    match status {
        Some(429) => Failure::Retryable(IngestError::Telegram(text)),
        Some(code) if code >= 500 => Failure::Retryable(IngestError::Telegram(text)),
        Some(code) if code >= 400 => Failure::Permanent(IngestError::Telegram(text)),
        _ => Failure::Retryable(IngestError::Telegram(text)),
    }
}

fn transport_failure(context: &str, err: &reqwest::Error) -> Failure {
    Failure::Retryable(IngestError::Download(format!(
        "{context}: {}",
        redact_secrets(&err.to_string())
    )))
}

/// Client for the Bot API file endpoints
#[derive(Clone)]
pub struct TelegramClient {
    http: Client,
    token: String,
    api_base: String,
    file_base: String,
    throttle: Arc<Throttle>,
    metadata_policy: RetryPolicy,
    download_policy: RetryPolicy,
}

impl TelegramClient {
    /// Create a client from configuration
    #[must_use]
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            token: config.bot_token.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            file_base: config.file_base.trim_end_matches('/').to_string(),
            throttle: Arc::new(Throttle::new(Duration::from_millis(config.min_request_interval_ms))),
            metadata_policy: config.metadata_retry.clone(),
            download_policy: config.download_retry.clone(),
        }
    }

    /// Resolve a `file_id` to its remote path
    pub async fn get_file_path(&self, file_id: &str) -> Result<String> {
        let url = format!("{}/bot{}/getFile", self.api_base, self.token);

        let path = with_retry("telegram_get_file", &self.metadata_policy, |attempt| {
            let url = url.clone();
            async move {
                self.throttle.wait().await;
                debug!(attempt, "Resolving file path");

                let response = self
                    .http
                    .get(&url)
                    .query(&[("file_id", file_id)])
                    .send()
                    .await
                    .map_err(|e| transport_failure("getFile request failed", &e))?;
                let status = response.status().as_u16();
                let body = response
                    .text()
                    .await
                    .map_err(|e| transport_failure("getFile body unreadable", &e))?;

                let parsed: ApiResponse<TgFile> = match serde_json::from_str(&body) {
                    Ok(parsed) => parsed,
                    Err(_) => return Err(classify_api_error(Some(status), &body)),
                };

                if parsed.ok {
                    if let Some(path) = parsed.result.and_then(|f| f.file_path) {
                        return Ok(path);
                    }
                    return Err(Failure::Retryable(IngestError::Telegram(
                        "getFile returned no file_path".to_string(),
                    )));
                }

                let description = parsed.description.unwrap_or_else(|| format!("HTTP {status}"));
                Err(classify_api_error(parsed.error_code.or(Some(status)), &description))
            }
        })
        .await?;

        Ok(path)
    }

    /// Download the content at a remote path; empty bodies count as failures
    pub async fn download(&self, file_path: &str) -> Result<Vec<u8>> {
        let url = format!("{}/file/bot{}/{}", self.file_base, self.token, file_path);

        let bytes = with_retry("telegram_download", &self.download_policy, |attempt| {
            let url = url.clone();
            async move {
                self.throttle.wait().await;
                debug!(attempt, "Downloading file");

                let response = self
                    .http
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| transport_failure("download request failed", &e))?;
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    let description = if body.is_empty() { format!("HTTP {status}") } else { body };
                    return Err(classify_api_error(Some(status.as_u16()), &description));
                }

                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| transport_failure("download body unreadable", &e))?;
                if bytes.is_empty() {
                    return Err(Failure::Retryable(IngestError::Download(
                        "Downloaded file is empty".to_string(),
                    )));
                }
                Ok(bytes.to_vec())
            }
        })
        .await?;

        metrics::record_download_bytes(bytes.len());
        Ok(bytes)
    }

    /// Resolve and download a file in one go
    pub async fn fetch_file(&self, file_id: &str) -> Result<DownloadedFile> {
        let file_path = self.get_file_path(file_id).await?;
        let bytes = self.download(&file_path).await?;
        info!(file_path = %file_path, size = bytes.len(), "Fetched file from Telegram");
        Ok(DownloadedFile { bytes, file_path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporarily_unavailable_is_retryable_even_with_wrong_file_id() {
        let failure = classify_api_error(
            Some(400),
            "Bad Request: wrong file_id or the file is temporarily unavailable",
        );
        assert!(matches!(failure, Failure::Retryable(IngestError::Telegram(_))));
    }

    #[test]
    fn invalid_file_id_is_permanent() {
        let failure = classify_api_error(Some(400), "Bad Request: invalid file_id");
        assert!(matches!(failure, Failure::Permanent(IngestError::InvalidFileId(_))));
    }

    #[test]
    fn status_codes_decide_the_rest() {
        assert!(matches!(classify_api_error(Some(429), "Too Many Requests"), Failure::Retryable(_)));
        assert!(matches!(classify_api_error(Some(502), "Bad Gateway"), Failure::Retryable(_)));
        assert!(matches!(classify_api_error(Some(403), "Forbidden"), Failure::Permanent(_)));
    }
}
