//! Database schema definitions
//!
//! This module provides constants for table and column names used with rusqlite.
//! The tables themselves are created by the embedded migration in `migrations/`.

/// Media messages table schema
pub mod messages {
    /// Table name
    pub const TABLE: &str = "messages";
    /// Primary key column
    pub const ID: &str = "id";
    /// Telegram message id column
    pub const TELEGRAM_MESSAGE_ID: &str = "telegram_message_id";
    /// Telegram chat id column
    pub const CHAT_ID: &str = "chat_id";
    /// Chat type column
    pub const CHAT_TYPE: &str = "chat_type";
    /// Chat title column
    pub const CHAT_TITLE: &str = "chat_title";
    /// Album key column
    pub const MEDIA_GROUP_ID: &str = "media_group_id";
    /// Caption column
    pub const CAPTION: &str = "caption";
    /// Content-addressed key column
    pub const FILE_UNIQUE_ID: &str = "file_unique_id";
    /// Download reference column
    pub const FILE_ID: &str = "file_id";
    /// Download reference expiry column
    pub const FILE_ID_EXPIRES_AT: &str = "file_id_expires_at";
    /// Object-storage key column
    pub const STORAGE_PATH: &str = "storage_path";
    /// Public URL column
    pub const PUBLIC_URL: &str = "public_url";
    /// MIME type column
    pub const MIME_TYPE: &str = "mime_type";
    /// File size column
    pub const FILE_SIZE: &str = "file_size";
    /// Width column
    pub const WIDTH: &str = "width";
    /// Height column
    pub const HEIGHT: &str = "height";
    /// Duration column
    pub const DURATION: &str = "duration";
    /// Lifecycle state column
    pub const PROCESSING_STATE: &str = "processing_state";
    /// Current analysis JSON column
    pub const ANALYZED_CONTENT: &str = "analyzed_content";
    /// Analysis history JSON column
    pub const OLD_ANALYZED_CONTENT: &str = "old_analyzed_content";
    /// Canonical caption flag column
    pub const IS_ORIGINAL_CAPTION: &str = "is_original_caption";
    /// Group sync flag column
    pub const GROUP_CAPTION_SYNCED: &str = "group_caption_synced";
    /// Caption source reference column
    pub const MESSAGE_CAPTION_ID: &str = "message_caption_id";
    /// Correlation id column
    pub const CORRELATION_ID: &str = "correlation_id";
    /// Retry counter column
    pub const RETRY_COUNT: &str = "retry_count";
    /// Error text column
    pub const ERROR_MESSAGE: &str = "error_message";
    /// Duplicate flag column
    pub const IS_DUPLICATE: &str = "is_duplicate";
    /// Duplicate owner column
    pub const DUPLICATE_REFERENCE_ID: &str = "duplicate_reference_id";
    /// Redownload flag column
    pub const NEEDS_REDOWNLOAD: &str = "needs_redownload";
    /// Redownload reason column
    pub const REDOWNLOAD_REASON: &str = "redownload_reason";
    /// Redownload flag timestamp column
    pub const REDOWNLOAD_FLAGGED_AT: &str = "redownload_flagged_at";
    /// Redownload completion timestamp column
    pub const REDOWNLOAD_COMPLETED_AT: &str = "redownload_completed_at";
    /// Edited flag column
    pub const IS_EDITED: &str = "is_edited";
    /// Edit counter column
    pub const EDIT_COUNT: &str = "edit_count";
    /// Raw payload column
    pub const TELEGRAM_DATA: &str = "telegram_data";
    /// Creation timestamp column
    pub const CREATED_AT: &str = "created_at";
    /// Update timestamp column
    pub const UPDATED_AT: &str = "updated_at";
    /// Processing start timestamp column
    pub const PROCESSING_STARTED_AT: &str = "processing_started_at";
    /// Processing completion timestamp column
    pub const PROCESSING_COMPLETED_AT: &str = "processing_completed_at";
    /// Last error timestamp column
    pub const LAST_ERROR_AT: &str = "last_error_at";
    /// Write counter for conditional updates
    pub const ROW_VERSION: &str = "row_version";
}

/// Non-media messages table schema
pub mod other_messages {
    /// Table name
    pub const TABLE: &str = "other_messages";
    /// Primary key column
    pub const ID: &str = "id";
    /// Telegram message id column
    pub const TELEGRAM_MESSAGE_ID: &str = "telegram_message_id";
    /// Telegram chat id column
    pub const CHAT_ID: &str = "chat_id";
    /// Chat type column
    pub const CHAT_TYPE: &str = "chat_type";
    /// Message kind column
    pub const MESSAGE_TYPE: &str = "message_type";
    /// Message text column
    pub const MESSAGE_TEXT: &str = "message_text";
    /// Edited flag column
    pub const IS_EDITED: &str = "is_edited";
    /// Correlation id column
    pub const CORRELATION_ID: &str = "correlation_id";
    /// Raw payload column
    pub const TELEGRAM_DATA: &str = "telegram_data";
    /// Creation timestamp column
    pub const CREATED_AT: &str = "created_at";
    /// Update timestamp column
    pub const UPDATED_AT: &str = "updated_at";
}

/// Audit log table schema
pub mod audit_logs {
    /// Table name
    pub const TABLE: &str = "audit_logs";
    /// Event kind column
    pub const EVENT_TYPE: &str = "event_type";
    /// Entity column
    pub const ENTITY_ID: &str = "entity_id";
    /// Correlation id column
    pub const CORRELATION_ID: &str = "correlation_id";
    /// Previous state JSON column
    pub const PREVIOUS_STATE: &str = "previous_state";
    /// New state JSON column
    pub const NEW_STATE: &str = "new_state";
    /// Metadata JSON column
    pub const METADATA: &str = "metadata";
    /// Error text column
    pub const ERROR_MESSAGE: &str = "error_message";
    /// Event timestamp column
    pub const EVENT_TIMESTAMP: &str = "event_timestamp";
}

/// Storage validation cache schema
pub mod storage_validations {
    /// Table name
    pub const TABLE: &str = "storage_validations";
    /// Content key column
    pub const FILE_UNIQUE_ID: &str = "file_unique_id";
    /// Probed path column
    pub const STORAGE_PATH: &str = "storage_path";
    /// Probe timestamp column
    pub const LAST_CHECKED_AT: &str = "last_checked_at";
    /// Probe result column
    pub const IS_VALID: &str = "is_valid";
    /// Failure text column
    pub const ERROR_MESSAGE: &str = "error_message";
}
