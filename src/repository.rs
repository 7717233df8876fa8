//! Message persistence with audit trail
//!
//! `MessageStore` is the only writer of media messages outside the repair
//! jobs' bulk paths. Every mutation emits an audit event; audit failures are
//! absorbed by [`AuditLogger`].

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::audit::AuditLogger;
use crate::db::Database;
use crate::duplicate::DuplicateDetector;
use crate::error::{IngestError, Result};
use crate::media::storage_path;
use crate::media_group::MediaGroupSynchronizer;
use crate::models::{AuditEventType, AuditLogEntry, Message, NewMessage, OwnerSnapshot, ProcessingState};
use crate::state::{plan_transition, TransitionPlan, TransitionRequest};
use crate::telegram::FileRef;
use crate::validation::InputValidator;

/// Result of [`MessageStore::create`]
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    /// A new row was written
    Created(Message),
    /// The Telegram message was already stored; nothing changed
    AlreadyExists(Message),
}

impl CreateOutcome {
    /// The stored row, new or existing
    #[must_use]
    pub const fn message(&self) -> &Message {
        match self {
            Self::Created(m) | Self::AlreadyExists(m) => m,
        }
    }

    /// Take the stored row
    #[must_use]
    pub fn into_message(self) -> Message {
        match self {
            Self::Created(m) | Self::AlreadyExists(m) => m,
        }
    }
}

/// Result of [`MessageStore::transition_state`]
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The state changed; carries the updated row
    Applied(Message),
    /// The request was already in effect; carries the row as read
    NoOp(Message),
}

impl TransitionOutcome {
    /// Take the row
    #[must_use]
    pub fn into_message(self) -> Message {
        match self {
            Self::Applied(m) | Self::NoOp(m) => m,
        }
    }
}

/// Caption edit received for a stored media message
#[derive(Debug, Clone, Default)]
pub struct MediaEdit {
    /// Caption after the edit; `None` when it was removed
    pub caption: Option<String>,
    /// Group id carried by the edit, if any
    pub media_group_id: Option<String>,
    /// Raw edited message
    pub telegram_data: Option<Value>,
}

/// Audit reason recorded when a caption edit sends a message back for analysis
pub const EDIT_REQUEUE_REASON: &str = "Caption changed by edit";

const STATE_WRITE_ATTEMPTS: u32 = 3;

enum Written {
    Unchanged(Message),
    Changed { previous: Message, current: Message },
}

fn state_snapshot(message: &Message) -> Value {
    json!({
        "processing_state": message.processing_state,
        "retry_count": message.retry_count,
        "error_message": message.error_message,
        "analyzed_content": message.analyzed_content,
    })
}

/// Typed, audited access to media messages
#[derive(Clone)]
pub struct MessageStore {
    db: Database,
    audit: AuditLogger,
    detector: DuplicateDetector,
    synchronizer: MediaGroupSynchronizer,
    file_id_freshness: Duration,
}

impl MessageStore {
    /// Create a store stamping `file_id`s fresh for `file_id_freshness_hours`
    #[must_use]
    pub fn new(db: Database, synchronizer: MediaGroupSynchronizer, file_id_freshness_hours: i64) -> Self {
        Self {
            audit: AuditLogger::new(db.clone()),
            detector: DuplicateDetector::new(db.clone()),
            db,
            synchronizer,
            file_id_freshness: Duration::hours(file_id_freshness_hours),
        }
    }

    /// Underlying database
    #[must_use]
    pub const fn db(&self) -> &Database {
        &self.db
    }

    /// Audit writer shared with the repair jobs
    #[must_use]
    pub const fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Duplicate lookups
    #[must_use]
    pub const fn detector(&self) -> &DuplicateDetector {
        &self.detector
    }

    /// Media group synchronizer
    #[must_use]
    pub const fn synchronizer(&self) -> &MediaGroupSynchronizer {
        &self.synchronizer
    }

    /// Expiry stamped on a `file_id` received now
    #[must_use]
    pub fn file_id_expiry(&self) -> chrono::DateTime<Utc> {
        Utc::now() + self.file_id_freshness
    }

    /// Load a message or fail with `MessageNotFound`
    pub fn get(&self, id: &str) -> Result<Message> {
        self.db
            .get_message(id)?
            .ok_or_else(|| IngestError::MessageNotFound(id.to_string()))
    }

    /// Store a new media message.
    ///
    /// Redelivery of an already stored Telegram message is a soft success.
    pub fn create(&self, mut new_message: NewMessage, correlation_id: &str) -> Result<CreateOutcome> {
        InputValidator::validate_new_message(&new_message)?;

        if let Some(existing) = self
            .detector
            .check_message(new_message.telegram_message_id, new_message.chat_id)
        {
            debug!(message_id = %existing.id, "Message already stored");
            return Ok(CreateOutcome::AlreadyExists(existing));
        }

        new_message.correlation_id = Some(correlation_id.to_string());
        if new_message.file_id_expires_at.is_none() {
            new_message.file_id_expires_at = Some(self.file_id_expiry());
        }

        let Some(message) = self.db.insert_message(&new_message)? else {
            // Lost a race with a concurrent delivery of the same message
            let existing = self
                .db
                .find_by_telegram_id(new_message.telegram_message_id, new_message.chat_id)?
                .ok_or_else(|| IngestError::Other("insert conflicted but no row found".to_string()))?;
            return Ok(CreateOutcome::AlreadyExists(existing));
        };

        let event = if message.is_duplicate {
            AuditEventType::DuplicateDetected
        } else {
            AuditEventType::MessageCreated
        };
        self.audit.log(
            AuditLogEntry::new(event, message.id.as_str())
                .correlation(correlation_id)
                .states(None, Some(state_snapshot(&message)))
                .metadata(json!({
                    "file_unique_id": message.file_unique_id,
                    "media_group_id": message.media_group_id,
                    "storage_path": message.storage_path,
                    "duplicate_reference_id": message.duplicate_reference_id,
                })),
        );
        info!(
            message_id = %message.id,
            file_unique_id = %message.file_unique_id,
            duplicate = message.is_duplicate,
            "Stored media message"
        );

        Ok(CreateOutcome::Created(message))
    }

    /// Store a message whose content is already owned by another message
    pub fn create_duplicate(
        &self,
        mut new_message: NewMessage,
        owner: &OwnerSnapshot,
        correlation_id: &str,
    ) -> Result<CreateOutcome> {
        new_message.is_duplicate = true;
        new_message.duplicate_reference_id = Some(owner.message_id.clone());
        new_message.storage_path.clone_from(&owner.storage_path);
        new_message.public_url = owner.public_url.clone().unwrap_or_default();
        new_message.mime_type = owner.mime_type.clone().or(new_message.mime_type);
        new_message.width = owner.width.or(new_message.width);
        new_message.height = owner.height.or(new_message.height);
        new_message.file_size = owner.file_size.or(new_message.file_size);
        self.create(new_message, correlation_id)
    }

    /// Re-read `id`, apply `change` and write it back only if nobody else
    /// wrote the row in between. `change` returning `false` leaves the row as is.
    fn write_current(&self, id: &str, mut change: impl FnMut(&mut Message) -> Result<bool>) -> Result<Written> {
        for attempt in 1..=STATE_WRITE_ATTEMPTS {
            let previous = self.get(id)?;
            let mut message = previous.clone();
            if !change(&mut message)? {
                return Ok(Written::Unchanged(message));
            }
            if self.db.save_message_if_current(&mut message)? {
                return Ok(Written::Changed { previous, current: message });
            }
            debug!(message_id = %id, attempt, "Row changed concurrently, re-reading");
        }
        Err(IngestError::Conflict(format!("message {id} kept changing")))
    }

    /// Apply a state change, or do nothing when it is already in effect.
    ///
    /// Concurrent identical requests resolve to one `Applied` and `NoOp` for
    /// the rest, so each transition is audited once.
    pub fn transition_state(&self, id: &str, request: TransitionRequest, correlation_id: &str) -> Result<TransitionOutcome> {
        let target = request.target;
        let written = self.write_current(id, |message| {
            if plan_transition(message, &request)? == TransitionPlan::NoOp {
                return Ok(false);
            }
            let now = Utc::now();
            if let Some(content) = &request.analyzed_content {
                if let Some(old) = message.analyzed_content.take() {
                    if &old != content {
                        message.old_analyzed_content.push(old);
                    }
                }
                message.analyzed_content = Some(content.clone());
            }

            match target {
                ProcessingState::Processing => message.processing_started_at = Some(now),
                ProcessingState::Completed => {
                    message.processing_completed_at = Some(now);
                    message.error_message = None;
                }
                ProcessingState::Error => {
                    if let Some(reason) = &request.error_message {
                        message.error_message = Some(reason.clone());
                    }
                    message.last_error_at = Some(now);
                    message.retry_count += 1;
                }
                ProcessingState::Initialized | ProcessingState::Pending => {}
            }
            message.processing_state = target;
            message.correlation_id = Some(correlation_id.to_string());
            Ok(true)
        })?;

        let (previous, message) = match written {
            Written::Unchanged(message) => {
                debug!(message_id = %id, state = %message.processing_state, "Transition is a no-op");
                return Ok(TransitionOutcome::NoOp(message));
            }
            Written::Changed { previous, current } => (previous, current),
        };

        let mut entry = AuditLogEntry::new(AuditEventType::StateTransition, message.id.as_str())
            .correlation(correlation_id)
            .states(Some(state_snapshot(&previous)), Some(state_snapshot(&message)));
        if let Some(reason) = message.error_message.as_deref().filter(|_| target == ProcessingState::Error) {
            entry = entry.error(reason);
        }
        self.audit.log(entry);
        info!(message_id = %message.id, state = %target, "Processing state changed");

        Ok(TransitionOutcome::Applied(message))
    }

    /// Hand a pending message to the analyzer
    pub fn begin_processing(&self, id: &str, correlation_id: &str) -> Result<TransitionOutcome> {
        self.transition_state(id, TransitionRequest::to(ProcessingState::Processing), correlation_id)
    }

    /// Mark a message failed with `reason`
    pub fn mark_error(&self, id: &str, reason: &str, correlation_id: &str) -> Result<TransitionOutcome> {
        self.transition_state(id, TransitionRequest::failed(reason), correlation_id)
    }

    /// Store the analyzer's result, complete the message and fan the result
    /// out to the rest of its media group
    pub async fn record_analysis(&self, id: &str, content: Value, correlation_id: &str) -> Result<TransitionOutcome> {
        let outcome = self.transition_state(id, TransitionRequest::completed(content), correlation_id)?;

        if let TransitionOutcome::Applied(message) = &outcome {
            if message.media_group_id.is_some() {
                if let Err(err) = self
                    .synchronizer
                    .sync_from_source(&message.id, Default::default(), correlation_id)
                    .await
                {
                    warn!(message_id = %message.id, error = %err, "Group sync after analysis failed");
                }
            }
        }

        Ok(outcome)
    }

    /// Explicit reset to `pending`, recording `reason` as the error message.
    ///
    /// This and a caption edit are the only ways a message moves backwards;
    /// both count a retry and audit a state transition.
    pub fn reset_to_pending(&self, id: &str, reason: &str, correlation_id: &str) -> Result<Message> {
        self.requeue(id, reason, Some(reason), correlation_id)
    }

    fn requeue(&self, id: &str, reason: &str, error_message: Option<&str>, correlation_id: &str) -> Result<Message> {
        let written = self.write_current(id, |message| {
            message.processing_state = ProcessingState::Pending;
            message.retry_count += 1;
            message.error_message = error_message.map(ToString::to_string);
            message.processing_started_at = None;
            message.correlation_id = Some(correlation_id.to_string());
            Ok(true)
        })?;
        let Written::Changed { previous, current: message } = written else {
            return Err(IngestError::Other(format!("reset of {id} wrote nothing")));
        };

        self.audit.log(
            AuditLogEntry::new(AuditEventType::StateTransition, message.id.as_str())
                .correlation(correlation_id)
                .states(Some(state_snapshot(&previous)), Some(state_snapshot(&message)))
                .metadata(json!({ "reset": true, "reason": reason })),
        );
        info!(message_id = %message.id, reason, "Message reset to pending");
        Ok(message)
    }

    /// Record a caption edit.
    ///
    /// When the caption changed, the current analysis moves to history and the
    /// message is reset to `pending` for analysis again.
    pub fn apply_edit(&self, id: &str, edit: MediaEdit, correlation_id: &str) -> Result<Message> {
        let mut caption_changed = false;
        let written = self.write_current(id, |message| {
            caption_changed = edit.caption != message.caption;
            message.is_edited = true;
            message.edit_count += 1;
            if edit.telegram_data.is_some() {
                message.telegram_data.clone_from(&edit.telegram_data);
            }
            if edit.media_group_id.is_some() {
                message.media_group_id.clone_from(&edit.media_group_id);
            }

            if caption_changed {
                if let Some(old) = message.analyzed_content.take() {
                    message.old_analyzed_content.push(old);
                }
                message.caption.clone_from(&edit.caption);
                message.is_original_caption = message.caption.is_some();
                message.group_caption_synced = false;
                message.message_caption_id = None;
                message.processing_completed_at = None;
            }
            message.correlation_id = Some(correlation_id.to_string());
            Ok(true)
        })?;
        let Written::Changed { previous, current: message } = written else {
            return Err(IngestError::Other(format!("edit of {id} wrote nothing")));
        };

        self.audit.log(
            AuditLogEntry::new(AuditEventType::MessageEdited, message.id.as_str())
                .correlation(correlation_id)
                .states(Some(state_snapshot(&previous)), Some(state_snapshot(&message)))
                .metadata(json!({
                    "caption_changed": caption_changed,
                    "edit_count": message.edit_count,
                })),
        );
        info!(message_id = %message.id, caption_changed, edit_count = message.edit_count, "Applied edit");

        if caption_changed {
            return self.requeue(&message.id, EDIT_REQUEUE_REASON, None, correlation_id);
        }
        Ok(message)
    }

    /// Replace the media of a stored message.
    ///
    /// `stored` is `None` when the new content could not be transferred; the
    /// message then keeps the deterministic path and is flagged for redownload.
    pub fn update_media(
        &self,
        id: &str,
        file: &FileRef,
        stored: Option<(&str, &str)>,
        correlation_id: &str,
    ) -> Result<Message> {
        let mut message = self.get(id)?;
        let previous = json!({
            "file_unique_id": message.file_unique_id,
            "storage_path": message.storage_path,
        });

        message.file_unique_id.clone_from(&file.file_unique_id);
        message.file_id.clone_from(&file.file_id);
        message.file_id_expires_at = Some(self.file_id_expiry());
        message.mime_type = Some(file.mime_type.clone());
        message.file_size = file.file_size;
        message.width = file.width;
        message.height = file.height;
        message.duration = file.duration;
        message.is_duplicate = false;
        message.duplicate_reference_id = None;

        match stored {
            Some((path, url)) => {
                message.storage_path = Some(path.to_string());
                message.public_url = Some(url.to_string());
                message.needs_redownload = false;
                message.redownload_reason = None;
            }
            None => {
                message.storage_path = Some(storage_path(&file.file_unique_id, Some(&file.mime_type)));
                message.needs_redownload = true;
                message.redownload_reason = Some("Media replaced by edit could not be fetched".to_string());
                message.redownload_flagged_at = Some(Utc::now());
            }
        }
        message.correlation_id = Some(correlation_id.to_string());
        self.db.save_message(&mut message)?;

        self.audit.log(
            AuditLogEntry::new(AuditEventType::MessageUpdated, message.id.as_str())
                .correlation(correlation_id)
                .states(
                    Some(previous),
                    Some(json!({
                        "file_unique_id": message.file_unique_id,
                        "storage_path": message.storage_path,
                    })),
                ),
        );
        Ok(message)
    }

    /// Flag a message's content for refetching
    pub fn flag_for_redownload(&self, id: &str, reason: &str, correlation_id: &str) -> Result<Message> {
        let mut message = self.get(id)?;
        if message.needs_redownload && message.redownload_reason.as_deref() == Some(reason) {
            return Ok(message);
        }
        message.needs_redownload = true;
        message.redownload_reason = Some(reason.to_string());
        message.redownload_flagged_at = Some(Utc::now());
        message.correlation_id = Some(correlation_id.to_string());
        self.db.save_message(&mut message)?;

        self.audit.log(
            AuditLogEntry::new(AuditEventType::MessageUpdated, message.id.as_str())
                .correlation(correlation_id)
                .metadata(json!({ "needs_redownload": true, "reason": reason })),
        );
        Ok(message)
    }

    /// Rewrite a message's storage location and flag it for redownload
    pub fn set_storage_path(
        &self,
        id: &str,
        path: &str,
        public_url: &str,
        reason: &str,
        correlation_id: &str,
    ) -> Result<Message> {
        let mut message = self.get(id)?;
        let previous = json!({ "storage_path": message.storage_path, "public_url": message.public_url });

        message.storage_path = Some(path.to_string());
        message.public_url = Some(public_url.to_string());
        message.needs_redownload = true;
        message.redownload_reason = Some(reason.to_string());
        message.redownload_flagged_at = Some(Utc::now());
        message.correlation_id = Some(correlation_id.to_string());
        self.db.save_message(&mut message)?;

        self.audit.log(
            AuditLogEntry::new(AuditEventType::StoragePathRepaired, message.id.as_str())
                .correlation(correlation_id)
                .states(
                    Some(previous),
                    Some(json!({ "storage_path": path, "public_url": public_url })),
                )
                .metadata(json!({ "reason": reason })),
        );
        Ok(message)
    }

    /// Record a successful refetch
    pub fn complete_redownload(
        &self,
        id: &str,
        path: &str,
        public_url: &str,
        file_id: &str,
        correlation_id: &str,
    ) -> Result<Message> {
        let mut message = self.get(id)?;
        let file_id_refreshed = message.file_id != file_id;
        message.storage_path = Some(path.to_string());
        message.public_url = Some(public_url.to_string());
        if file_id_refreshed {
            message.file_id = file_id.to_string();
            message.file_id_expires_at = Some(self.file_id_expiry());
        }
        message.needs_redownload = false;
        message.redownload_reason = None;
        message.redownload_completed_at = Some(Utc::now());
        message.correlation_id = Some(correlation_id.to_string());
        self.db.save_message(&mut message)?;

        self.audit.log(
            AuditLogEntry::new(AuditEventType::RedownloadCompleted, message.id.as_str())
                .correlation(correlation_id)
                .metadata(json!({ "storage_path": path, "file_id_refreshed": file_id_refreshed })),
        );
        Ok(message)
    }

    /// Promote a duplicate whose owner disappeared to own its content
    pub fn promote_orphan(&self, id: &str, correlation_id: &str) -> Result<Message> {
        let mut message = self.get(id)?;
        let previous_owner = message.duplicate_reference_id.take();
        message.is_duplicate = false;
        message.needs_redownload = true;
        message.redownload_reason = Some("Duplicate reference no longer exists".to_string());
        message.redownload_flagged_at = Some(Utc::now());
        message.correlation_id = Some(correlation_id.to_string());
        self.db.save_message(&mut message)?;

        self.audit.log(
            AuditLogEntry::new(AuditEventType::MessageUpdated, message.id.as_str())
                .correlation(correlation_id)
                .metadata(json!({ "promoted_orphan": true, "previous_owner": previous_owner })),
        );
        Ok(message)
    }
}
