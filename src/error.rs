//! Error types for the media-ingest library.
//!
//! This module provides custom error types using `thiserror` so every
//! component can return a structured failure instead of panicking across
//! boundaries. `IngestError::code` gives the stable `error_code` reported in
//! operation results and HTTP responses.

use thiserror::Error;

/// Errors that can occur while ingesting, syncing or repairing messages.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Input failed validation; never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// Telegram rejected the file reference; never retried
    #[error("Invalid file reference: {0}")]
    InvalidFileId(String),

    /// Telegram Bot API returned an error
    #[error("Telegram API error: {0}")]
    Telegram(String),

    /// Binary content could not be fetched
    #[error("Download error: {0}")]
    Download(String),

    /// Transient object-storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Object storage refused the request outright
    #[error("Storage rejected request: {0}")]
    StorageRejected(String),

    /// Transport-level HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Message not found
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Requested processing-state change is not allowed
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    /// The row kept changing underneath a conditional write
    #[error("Concurrent update: {0}")]
    Conflict(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// General error with context
    #[error("{0}")]
    Other(String),
}

impl IngestError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Database(_) | Self::Pool(_) => "database_error",
            Self::Validation(_) => "validation_error",
            Self::InvalidFileId(_) => "invalid_file_id",
            Self::Telegram(_) => "telegram_error",
            Self::Download(_) => "download_error",
            Self::Storage(_) => "storage_error",
            Self::StorageRejected(_) => "storage_rejected",
            Self::Http(_) => "http_error",
            Self::MessageNotFound(_) => "not_found",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::Conflict(_) => "conflict",
            Self::Serialization(_) => "serialization_error",
            Self::InvalidConfig(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::Other(_) => "internal_error",
        }
    }

    /// Whether a bounded retry may succeed where this attempt failed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Telegram(_)
                | Self::Download(_)
                | Self::Storage(_)
                | Self::Http(_)
                | Self::Pool(_)
                | Self::Conflict(_)
        )
    }
}

/// Convenience type alias for Result with `IngestError`
pub type Result<T> = std::result::Result<T, IngestError>;

impl From<anyhow::Error> for IngestError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
