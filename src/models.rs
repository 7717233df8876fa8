//! Data models for message ingestion and storage
//!
//! This module contains all data structures used throughout the service,
//! including stored media messages, audit entries, storage validation records
//! and the structured results returned to callers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::IngestError;

/// Position of a message in the ingestion/analysis lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    /// Stored, not yet queued for analysis
    #[default]
    Initialized,
    /// Waiting for the analyzer
    Pending,
    /// Analyzer is working on it
    Processing,
    /// Analysis stored
    Completed,
    /// Ingestion or analysis failed
    Error,
}

impl ProcessingState {
    /// All states, in lifecycle order
    pub const ALL: [Self; 5] = [
        Self::Initialized,
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Error,
    ];

    /// Database representation of the state
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingState {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "initialized" => Ok(Self::Initialized),
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(IngestError::Validation(format!("Unknown processing state: {other}"))),
        }
    }
}

/// A stored media message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Opaque primary key
    pub id: String,
    /// Telegram message id within the chat
    pub telegram_message_id: i64,
    /// Telegram chat id
    pub chat_id: i64,
    /// Chat type (private, group, channel...)
    pub chat_type: Option<String>,
    /// Chat title when the chat has one
    pub chat_title: Option<String>,
    /// Album key shared by all members of a media group
    pub media_group_id: Option<String>,
    /// Caption text as last received
    pub caption: Option<String>,
    /// Content-addressed dedup key
    pub file_unique_id: String,
    /// Session-scoped download reference
    pub file_id: String,
    /// Point after which `file_id` is not trusted
    pub file_id_expires_at: Option<DateTime<Utc>>,
    /// Deterministic object-storage key
    pub storage_path: Option<String>,
    /// Public URL of the stored object
    pub public_url: Option<String>,
    /// MIME type of the media
    pub mime_type: Option<String>,
    /// Size in bytes
    pub file_size: Option<i64>,
    /// Width in pixels
    pub width: Option<i64>,
    /// Height in pixels
    pub height: Option<i64>,
    /// Duration in seconds for audio/video
    pub duration: Option<i64>,
    /// Lifecycle state
    pub processing_state: ProcessingState,
    /// Current caption analysis
    pub analyzed_content: Option<Value>,
    /// Previous analyses, oldest first; only ever appended to
    pub old_analyzed_content: Vec<Value>,
    /// True for the group member holding the canonical analysis
    pub is_original_caption: bool,
    /// True once the group analysis was copied onto this member
    pub group_caption_synced: bool,
    /// Caption message this member was synced from
    pub message_caption_id: Option<String>,
    /// Correlation id of the last operation that touched the row
    pub correlation_id: Option<String>,
    /// Number of failed or reset processing attempts
    pub retry_count: i64,
    /// Human-readable failure description
    pub error_message: Option<String>,
    /// True when another message owns this file's storage
    pub is_duplicate: bool,
    /// Owning message for duplicates
    pub duplicate_reference_id: Option<String>,
    /// Storage content must be fetched again
    pub needs_redownload: bool,
    /// Why a redownload was requested
    pub redownload_reason: Option<String>,
    /// When the redownload flag was raised
    pub redownload_flagged_at: Option<DateTime<Utc>>,
    /// When the last redownload finished
    pub redownload_completed_at: Option<DateTime<Utc>>,
    /// True once an edit was received
    pub is_edited: bool,
    /// Number of edits received
    pub edit_count: i64,
    /// Raw inbound payload
    pub telegram_data: Option<Value>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
    /// When processing last started
    pub processing_started_at: Option<DateTime<Utc>>,
    /// When processing last completed
    pub processing_completed_at: Option<DateTime<Utc>>,
    /// When the last error was recorded
    pub last_error_at: Option<DateTime<Utc>>,
    /// Bumped by every write; state changes only apply to the version they read
    #[serde(default)]
    pub row_version: i64,
}

impl Message {
    /// Snapshot of the storage metadata other messages copy when they
    /// turn out to share this message's file.
    #[must_use]
    pub fn owner_snapshot(&self) -> Option<OwnerSnapshot> {
        let storage_path = self.storage_path.clone()?;
        Some(OwnerSnapshot {
            message_id: self.id.clone(),
            storage_path,
            public_url: self.public_url.clone(),
            mime_type: self.mime_type.clone(),
            width: self.width,
            height: self.height,
            file_size: self.file_size,
        })
    }

    /// Whether the stored `file_id` may still be used at `now`
    #[must_use]
    pub fn file_id_is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.file_id_expires_at.is_some_and(|expires| expires > now)
    }
}

/// Data for creating a new media message
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    /// Telegram message id
    pub telegram_message_id: i64,
    /// Telegram chat id
    pub chat_id: i64,
    /// Chat type
    pub chat_type: Option<String>,
    /// Chat title
    pub chat_title: Option<String>,
    /// Album key
    pub media_group_id: Option<String>,
    /// Caption text
    pub caption: Option<String>,
    /// Content-addressed key
    pub file_unique_id: String,
    /// Download reference
    pub file_id: String,
    /// Expiry of `file_id`
    pub file_id_expires_at: Option<DateTime<Utc>>,
    /// Object-storage key
    pub storage_path: String,
    /// Public URL of the stored object
    pub public_url: String,
    /// MIME type
    pub mime_type: Option<String>,
    /// Size in bytes
    pub file_size: Option<i64>,
    /// Width in pixels
    pub width: Option<i64>,
    /// Height in pixels
    pub height: Option<i64>,
    /// Duration in seconds
    pub duration: Option<i64>,
    /// Initial lifecycle state
    pub processing_state: Option<ProcessingState>,
    /// Correlation id of the ingesting operation
    pub correlation_id: Option<String>,
    /// Raw inbound payload
    pub telegram_data: Option<Value>,
    /// True when this message carries the group's caption
    pub is_original_caption: bool,
    /// True when another message already owns this file
    pub is_duplicate: bool,
    /// Owning message for duplicates
    pub duplicate_reference_id: Option<String>,
    /// Set when the content could not be stored yet
    pub needs_redownload: bool,
    /// Why the content must be fetched again
    pub redownload_reason: Option<String>,
}

/// Storage metadata of the message that owns a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerSnapshot {
    /// Owning message id
    pub message_id: String,
    /// Owner's storage key
    pub storage_path: String,
    /// Owner's public URL
    pub public_url: Option<String>,
    /// Owner's MIME type
    pub mime_type: Option<String>,
    /// Width in pixels
    pub width: Option<i64>,
    /// Height in pixels
    pub height: Option<i64>,
    /// Size in bytes
    pub file_size: Option<i64>,
}

/// Result of a duplicate lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuplicateCheck {
    /// True when an owner was found
    pub exists: bool,
    /// The owner's storage metadata
    pub owner: Option<OwnerSnapshot>,
}

/// A stored non-media message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtherMessage {
    /// Opaque primary key
    pub id: String,
    /// Telegram message id
    pub telegram_message_id: i64,
    /// Telegram chat id
    pub chat_id: i64,
    /// Chat type
    pub chat_type: Option<String>,
    /// Kind of message (text, unknown)
    pub message_type: String,
    /// Message text
    pub message_text: Option<String>,
    /// True once an edit was received
    pub is_edited: bool,
    /// Correlation id of the ingesting operation
    pub correlation_id: Option<String>,
    /// Raw inbound payload
    pub telegram_data: Option<Value>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

/// Kinds of audit events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A media message was stored
    MessageCreated,
    /// A media message was edited
    MessageEdited,
    /// Media fields were replaced
    MessageUpdated,
    /// Processing state changed
    StateTransition,
    /// A message was linked to an existing owner
    DuplicateDetected,
    /// Group analysis was propagated
    MediaGroupSynced,
    /// A group repair run finished
    MediaGroupRepaired,
    /// A storage validation run finished
    StorageValidated,
    /// Storage paths were recomputed
    StoragePathRepaired,
    /// A processing-flow repair run finished
    ProcessingFlowRepaired,
    /// Content was fetched again successfully
    RedownloadCompleted,
    /// Content could not be fetched again
    RedownloadFailed,
    /// Ingestion failed
    IngestionFailed,
    /// A non-media message was stored
    OtherMessageCreated,
    /// A non-media message was edited
    OtherMessageEdited,
}

impl AuditEventType {
    /// Database representation of the event type
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MessageCreated => "message_created",
            Self::MessageEdited => "message_edited",
            Self::MessageUpdated => "message_updated",
            Self::StateTransition => "state_transition",
            Self::DuplicateDetected => "duplicate_detected",
            Self::MediaGroupSynced => "media_group_synced",
            Self::MediaGroupRepaired => "media_group_repaired",
            Self::StorageValidated => "storage_validated",
            Self::StoragePathRepaired => "storage_path_repaired",
            Self::ProcessingFlowRepaired => "processing_flow_repaired",
            Self::RedownloadCompleted => "redownload_completed",
            Self::RedownloadFailed => "redownload_failed",
            Self::IngestionFailed => "ingestion_failed",
            Self::OtherMessageCreated => "other_message_created",
            Self::OtherMessageEdited => "other_message_edited",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Event kind
    pub event_type: AuditEventType,
    /// Message or group the event concerns
    pub entity_id: String,
    /// Correlation id of the operation
    pub correlation_id: Option<String>,
    /// State before the event
    pub previous_state: Option<Value>,
    /// State after the event
    pub new_state: Option<Value>,
    /// Free-form details
    pub metadata: Option<Value>,
    /// Failure text, if any
    pub error_message: Option<String>,
    /// When the event happened
    pub event_timestamp: DateTime<Utc>,
}

impl AuditLogEntry {
    /// Start an entry for `entity_id` stamped now
    #[must_use]
    pub fn new(event_type: AuditEventType, entity_id: impl Into<String>) -> Self {
        Self {
            event_type,
            entity_id: entity_id.into(),
            correlation_id: None,
            previous_state: None,
            new_state: None,
            metadata: None,
            error_message: None,
            event_timestamp: Utc::now(),
        }
    }

    /// Attach a correlation id
    #[must_use]
    pub fn correlation(mut self, correlation_id: &str) -> Self {
        self.correlation_id = Some(correlation_id.to_string());
        self
    }

    /// Attach before/after state
    #[must_use]
    pub fn states(mut self, previous: Option<Value>, new: Option<Value>) -> Self {
        self.previous_state = previous;
        self.new_state = new;
        self
    }

    /// Attach metadata
    #[must_use]
    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Attach an error message
    #[must_use]
    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// Cached storage-existence check for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageValidation {
    /// Content key the check applies to
    pub file_unique_id: String,
    /// Path that was probed
    pub storage_path: String,
    /// When the probe ran
    pub last_checked_at: DateTime<Utc>,
    /// Whether the object was present
    pub is_valid: bool,
    /// Why the check failed
    pub error_message: Option<String>,
}

/// Message counts per processing state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStats {
    /// Messages in `initialized`
    pub initialized: i64,
    /// Messages in `pending`
    pub pending: i64,
    /// Messages in `processing`
    pub processing: i64,
    /// Messages in `completed`
    pub completed: i64,
    /// Messages in `error`
    pub error: i64,
    /// Messages stuck in `processing` past the stall threshold
    pub stalled: i64,
    /// Messages flagged for redownload
    pub needs_redownload: i64,
    /// All media messages
    pub total: i64,
}

impl ProcessingStats {
    /// Record `count` messages in `state`
    pub fn add(&mut self, state: ProcessingState, count: i64) {
        match state {
            ProcessingState::Initialized => self.initialized += count,
            ProcessingState::Pending => self.pending += count,
            ProcessingState::Processing => self.processing += count,
            ProcessingState::Completed => self.completed += count,
            ProcessingState::Error => self.error += count,
        }
        self.total += count;
    }
}

/// Structured outcome of an operation on one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    /// True on success, including soft successes such as duplicates
    pub success: bool,
    /// Message the operation concerned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Human-readable failure text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Stable failure code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl OperationResult {
    /// Successful outcome for `message_id`
    #[must_use]
    pub fn ok(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            error_message: None,
            error_code: None,
        }
    }

    /// Success with nothing stored, e.g. an update without a message
    #[must_use]
    pub const fn ignored() -> Self {
        Self {
            success: true,
            message_id: None,
            error_message: None,
            error_code: None,
        }
    }

    /// Failed outcome built from an error
    #[must_use]
    pub fn failed(message_id: Option<String>, err: &IngestError) -> Self {
        Self {
            success: false,
            message_id,
            error_message: Some(err.to_string()),
            error_code: Some(err.code().to_string()),
        }
    }
}
