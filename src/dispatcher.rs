//! Entry point for webhook updates and operator-triggered repair actions

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::audit::AuditLogger;
use crate::capabilities::{SqlCapabilities, StoreCapabilities};
use crate::config::AppConfig;
use crate::db::Database;
use crate::downloader::MediaDownloader;
use crate::error::{IngestError, Result};
use crate::media::storage_path;
use crate::media_group::{MediaGroupSynchronizer, SyncOptions};
use crate::metrics::{self, record_ingestion};
use crate::models::{AuditEventType, AuditLogEntry, Message, NewMessage, OperationResult, OtherMessage, ProcessingState};
use crate::repair::{RepairMode, RepairService};
use crate::repository::{CreateOutcome, MediaEdit, MessageStore};
use crate::storage::ObjectStorage;
use crate::telegram::{
    EventKind, FileRef, InboundEvent, MediaAttachment, MessageContent, TelegramClient, TgMessage, Update,
};
use crate::validation::InputValidator;

/// Operator-triggered maintenance actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManagementAction {
    Redownload,
    Validate,
    RepairStoragePaths,
    RepairMediaGroups,
    RepairProcessingFlow,
}

impl ManagementAction {
    /// Wire name of the action
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Redownload => "redownload",
            Self::Validate => "validate",
            Self::RepairStoragePaths => "repair-storage-paths",
            Self::RepairMediaGroups => "repair-media-groups",
            Self::RepairProcessingFlow => "repair-processing-flow",
        }
    }
}

impl fmt::Display for ManagementAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ManagementAction {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "redownload" => Ok(Self::Redownload),
            "validate" => Ok(Self::Validate),
            "repair-storage-paths" => Ok(Self::RepairStoragePaths),
            "repair-media-groups" => Ok(Self::RepairMediaGroups),
            "repair-processing-flow" => Ok(Self::RepairProcessingFlow),
            other => Err(IngestError::Validation(format!("Unknown action: {other}"))),
        }
    }
}

const fn default_only_newest() -> bool {
    true
}

/// Action-specific switches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementOptions {
    /// Validate the most recent messages first
    #[serde(default = "default_only_newest")]
    pub only_newest: bool,
    /// Group repair mode: full, specific or standard
    #[serde(default)]
    pub mode: Option<String>,
    /// Accepted caption message for a specific group repair
    #[serde(default)]
    pub source_message_id: Option<String>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub sync_edit_history: bool,
}

impl Default for ManagementOptions {
    fn default() -> Self {
        Self {
            only_newest: default_only_newest(),
            mode: None,
            source_message_id: None,
            force: false,
            sync_edit_history: false,
        }
    }
}

/// Body of the management endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementRequest {
    pub action: ManagementAction,
    #[serde(default)]
    pub message_ids: Option<Vec<String>>,
    #[serde(default)]
    pub media_group_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub options: ManagementOptions,
}

impl ManagementRequest {
    /// Request for `action` with no targets or options
    #[must_use]
    pub fn new(action: ManagementAction) -> Self {
        Self {
            action,
            message_ids: None,
            media_group_id: None,
            limit: None,
            options: ManagementOptions::default(),
        }
    }
}

/// Reply of the management endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagementResponse {
    pub success: bool,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// Routes inbound updates and management requests
#[derive(Clone)]
pub struct WebhookDispatcher {
    store: MessageStore,
    downloader: MediaDownloader,
    repair: RepairService,
}

impl WebhookDispatcher {
    #[must_use]
    pub const fn new(store: MessageStore, downloader: MediaDownloader, repair: RepairService) -> Self {
        Self {
            store,
            downloader,
            repair,
        }
    }

    /// Wire every component against `db` and `storage` using `config`
    #[must_use]
    pub fn from_config(config: &AppConfig, db: Database, storage: Arc<dyn ObjectStorage>) -> Self {
        let capabilities: Arc<dyn StoreCapabilities> = Arc::new(SqlCapabilities::new(db.clone()));
        let synchronizer =
            MediaGroupSynchronizer::new(db.clone(), AuditLogger::new(db.clone()), Arc::clone(&capabilities));
        let store = MessageStore::new(db, synchronizer, config.processing.file_id_freshness_hours);
        let downloader = MediaDownloader::new(
            TelegramClient::new(&config.telegram),
            Arc::clone(&storage),
            config.storage.upload_retry.clone(),
            config.storage.cache_control.clone(),
        );
        let repair = RepairService::new(
            store.clone(),
            capabilities,
            storage,
            Some(downloader.clone()),
            config.processing.clone(),
        );
        Self::new(store, downloader, repair)
    }

    /// Message store
    #[must_use]
    pub const fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Repair jobs
    #[must_use]
    pub const fn repair(&self) -> &RepairService {
        &self.repair
    }

    /// Handle one webhook update
    #[instrument(skip_all, fields(update_id = update.update_id))]
    pub async fn handle_update(&self, update: Update) -> OperationResult {
        let Some(event) = InboundEvent::from_update(update) else {
            info!("Update carries no message, ignoring");
            return OperationResult::ignored();
        };
        let correlation_id = Uuid::new_v4().to_string();

        let handled = match event.message.content() {
            MessageContent::Media(attachment) => self.handle_media(&event, &attachment, &correlation_id).await,
            MessageContent::Text(text) => self.handle_other(&event, "text", Some(text), &correlation_id),
            MessageContent::Unknown => self.handle_other(&event, "unknown", None, &correlation_id),
        };

        handled.unwrap_or_else(|err| {
            warn!(
                correlation_id = %correlation_id,
                telegram_message_id = event.message.message_id,
                error = %err,
                "Update handling failed"
            );
            OperationResult::failed(None, &err)
        })
    }

    async fn handle_media(
        &self,
        event: &InboundEvent,
        attachment: &MediaAttachment,
        correlation_id: &str,
    ) -> Result<OperationResult> {
        let message = &event.message;
        let existing = self
            .store
            .detector()
            .check_message(message.message_id, message.chat.id);

        match (event.kind, existing) {
            (EventKind::New, Some(existing)) => {
                info!(message_id = %existing.id, "Redelivered message, already stored");
                record_ingestion(attachment.kind().as_str(), "redelivered");
                Ok(OperationResult::ok(existing.id))
            }
            (EventKind::Edited, Some(existing)) => self.handle_media_edit(message, attachment, &existing, correlation_id).await,
            (_, None) => self.ingest_media(message, attachment, correlation_id).await,
        }
    }

    async fn ingest_media(
        &self,
        message: &TgMessage,
        attachment: &MediaAttachment,
        correlation_id: &str,
    ) -> Result<OperationResult> {
        let file = attachment.file_ref();
        let kind = file.kind.as_str();
        let mut new_message = new_media_message(message, &file)?;

        let duplicate = self.store.detector().check_file(&file.file_unique_id);
        if let Some(owner) = duplicate.owner {
            let stored = self
                .store
                .create_duplicate(new_message, &owner, correlation_id)?
                .into_message();
            metrics::record_duplicate();
            record_ingestion(kind, "duplicate");
            self.sync_joiner(&stored, correlation_id).await;
            return Ok(OperationResult::ok(stored.id));
        }

        match self
            .downloader
            .download_and_upload(&file.file_id, &file.file_unique_id, Some(&file.mime_type))
            .await
        {
            Ok(stored) => {
                new_message.storage_path = stored.storage_path;
                new_message.public_url = stored.public_url;
                new_message.mime_type = Some(stored.mime_type);
                new_message.file_size = new_message.file_size.or(Some(stored.size));

                let outcome = self.store.create(new_message, correlation_id)?;
                if let CreateOutcome::Created(created) = &outcome {
                    record_ingestion(kind, "created");
                    self.sync_joiner(created, correlation_id).await;
                }
                Ok(OperationResult::ok(outcome.into_message().id))
            }
            Err(err) => {
                record_ingestion(kind, "failed");
                self.record_failed_ingestion(new_message, &file, &err, correlation_id)
            }
        }
    }

    /// Persist a message whose content could not be transferred, in `error`
    /// and flagged for redownload
    fn record_failed_ingestion(
        &self,
        mut new_message: NewMessage,
        file: &FileRef,
        err: &IngestError,
        correlation_id: &str,
    ) -> Result<OperationResult> {
        let path = storage_path(&file.file_unique_id, Some(&file.mime_type));
        new_message.public_url = self.downloader.storage().public_url(&path);
        new_message.storage_path = path;
        new_message.needs_redownload = true;
        new_message.redownload_reason = Some(err.to_string());

        let stored = match self.store.create(new_message, correlation_id)? {
            CreateOutcome::Created(m) => m,
            CreateOutcome::AlreadyExists(m) => return Ok(OperationResult::ok(m.id)),
        };
        self.store.mark_error(&stored.id, &err.to_string(), correlation_id)?;
        self.store.audit().log(
            AuditLogEntry::new(AuditEventType::IngestionFailed, stored.id.as_str())
                .correlation(correlation_id)
                .metadata(json!({
                    "file_unique_id": file.file_unique_id,
                    "error_code": err.code(),
                }))
                .error(err.to_string()),
        );

        Ok(OperationResult::failed(Some(stored.id), err))
    }

    async fn handle_media_edit(
        &self,
        message: &TgMessage,
        attachment: &MediaAttachment,
        existing: &Message,
        correlation_id: &str,
    ) -> Result<OperationResult> {
        let file = attachment.file_ref();

        if file.file_unique_id != existing.file_unique_id {
            let stored = self
                .downloader
                .download_and_upload(&file.file_id, &file.file_unique_id, Some(&file.mime_type))
                .await;
            match &stored {
                Ok(stored) => {
                    self.store.update_media(
                        &existing.id,
                        &file,
                        Some((&stored.storage_path, &stored.public_url)),
                        correlation_id,
                    )?;
                }
                Err(err) => {
                    warn!(message_id = %existing.id, error = %err, "Edited media could not be fetched");
                    self.store.update_media(&existing.id, &file, None, correlation_id)?;
                }
            }
        }

        let caption = message
            .trimmed_caption()
            .map(|c| InputValidator::sanitize_text(&c))
            .filter(|c| !c.is_empty());
        let edited = self.store.apply_edit(
            &existing.id,
            MediaEdit {
                caption,
                media_group_id: message.media_group_id.clone(),
                telegram_data: serde_json::to_value(message).ok(),
            },
            correlation_id,
        )?;
        record_ingestion(file.kind.as_str(), "edited");
        Ok(OperationResult::ok(edited.id))
    }

    /// Best-effort sync of a new member into an already analysed group
    async fn sync_joiner(&self, message: &Message, correlation_id: &str) {
        if let Err(err) = self.store.synchronizer().sync_new_member(message, correlation_id).await {
            warn!(message_id = %message.id, error = %err, "Group sync for new member failed");
        }
    }

    fn handle_other(
        &self,
        event: &InboundEvent,
        message_type: &str,
        text: Option<String>,
        correlation_id: &str,
    ) -> Result<OperationResult> {
        let message = &event.message;
        let db = self.store.db();
        let telegram_data = serde_json::to_value(message).ok();
        let text = text.map(|t| InputValidator::sanitize_text(&t));

        if let Some(existing) = db.find_other_message(message.message_id, message.chat.id)? {
            if event.kind == EventKind::Edited {
                db.update_other_message_text(&existing.id, text.as_deref(), telegram_data.as_ref())?;
                self.store.audit().log(
                    AuditLogEntry::new(AuditEventType::OtherMessageEdited, existing.id.as_str())
                        .correlation(correlation_id)
                        .states(
                            Some(json!({ "message_text": existing.message_text })),
                            Some(json!({ "message_text": text })),
                        ),
                );
            }
            return Ok(OperationResult::ok(existing.id));
        }

        let now = Utc::now();
        let other = OtherMessage {
            id: Uuid::new_v4().to_string(),
            telegram_message_id: message.message_id,
            chat_id: message.chat.id,
            chat_type: message.chat.chat_type.clone(),
            message_type: message_type.to_string(),
            message_text: text,
            is_edited: event.kind == EventKind::Edited,
            correlation_id: Some(correlation_id.to_string()),
            telegram_data,
            created_at: now,
            updated_at: now,
        };

        if !db.insert_other_message(&other)? {
            let existing = db
                .find_other_message(message.message_id, message.chat.id)?
                .ok_or_else(|| IngestError::Other("insert conflicted but no row found".to_string()))?;
            return Ok(OperationResult::ok(existing.id));
        }
        self.store.audit().log(
            AuditLogEntry::new(AuditEventType::OtherMessageCreated, other.id.as_str())
                .correlation(correlation_id)
                .metadata(json!({ "message_type": message_type, "chat_id": other.chat_id })),
        );
        metrics::record_other_message(message_type);
        Ok(OperationResult::ok(other.id))
    }

    /// Run a management action
    #[instrument(skip_all, fields(action = %request.action))]
    pub async fn handle_management(&self, request: ManagementRequest) -> ManagementResponse {
        let correlation_id = Uuid::new_v4().to_string();
        match self.run_management(&request, &correlation_id).await {
            Ok(data) => ManagementResponse {
                success: true,
                correlation_id,
                data: Some(data),
                error: None,
                error_code: None,
            },
            Err(err) => {
                warn!(correlation_id = %correlation_id, error = %err, "Management action failed");
                ManagementResponse {
                    success: false,
                    correlation_id,
                    data: None,
                    error: Some(err.to_string()),
                    error_code: Some(err.code().to_string()),
                }
            }
        }
    }

    async fn run_management(&self, request: &ManagementRequest, correlation_id: &str) -> Result<Value> {
        let config = self.repair.config();
        InputValidator::validate_management_request(request, config.max_batch_limit)?;
        let limit = request.limit.unwrap_or(config.validation_batch_size);
        let ids = request.message_ids.as_deref();

        let data = match request.action {
            ManagementAction::Redownload => serde_json::to_value(self.repair.redownload(ids, limit, correlation_id).await?)?,
            ManagementAction::Validate => serde_json::to_value(
                self.repair
                    .validate_storage_files(limit, request.options.only_newest, correlation_id)
                    .await?,
            )?,
            ManagementAction::RepairStoragePaths => {
                serde_json::to_value(self.repair.repair_storage_paths(limit, correlation_id)?)?
            }
            ManagementAction::RepairMediaGroups => {
                let mode = RepairMode::from_request(request)?;
                let options = SyncOptions {
                    sync_edit_history: request.options.sync_edit_history,
                    force: request.options.force,
                };
                serde_json::to_value(
                    self.repair
                        .repair_media_groups(&mode, options, limit, correlation_id)
                        .await?,
                )?
            }
            ManagementAction::RepairProcessingFlow => serde_json::to_value(
                self.repair
                    .repair_processing_flow(ids, limit, correlation_id)
                    .await?,
            )?,
        };
        Ok(data)
    }
}

/// Build the row for a new media message, before storage fields are known
fn new_media_message(message: &TgMessage, file: &FileRef) -> Result<NewMessage> {
    let caption = message
        .trimmed_caption()
        .map(|c| InputValidator::sanitize_text(&c))
        .filter(|c| !c.is_empty());

    Ok(NewMessage {
        telegram_message_id: message.message_id,
        chat_id: message.chat.id,
        chat_type: message.chat.chat_type.clone(),
        chat_title: message.chat.title.clone(),
        media_group_id: message.media_group_id.clone(),
        is_original_caption: caption.is_some(),
        caption,
        file_unique_id: file.file_unique_id.clone(),
        file_id: file.file_id.clone(),
        mime_type: Some(file.mime_type.clone()),
        file_size: file.file_size,
        width: file.width,
        height: file.height,
        duration: file.duration,
        processing_state: Some(ProcessingState::Pending),
        telegram_data: Some(serde_json::to_value(message)?),
        ..NewMessage::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn management_request_reads_camel_case() {
        let request: ManagementRequest = serde_json::from_value(json!({
            "action": "repair-media-groups",
            "mediaGroupId": "G1",
            "limit": 10,
            "options": { "mode": "specific", "sourceMessageId": "m1", "syncEditHistory": true }
        }))
        .unwrap();

        assert_eq!(request.action, ManagementAction::RepairMediaGroups);
        assert_eq!(request.media_group_id.as_deref(), Some("G1"));
        assert_eq!(request.limit, Some(10));
        assert_eq!(request.options.source_message_id.as_deref(), Some("m1"));
        assert!(request.options.sync_edit_history);
        assert!(request.options.only_newest);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let parsed = serde_json::from_value::<ManagementRequest>(json!({ "action": "reboot" }));
        assert!(parsed.is_err());
        assert!("reboot".parse::<ManagementAction>().is_err());
    }

    #[test]
    fn action_names_round_trip() {
        for action in [
            ManagementAction::Redownload,
            ManagementAction::Validate,
            ManagementAction::RepairStoragePaths,
            ManagementAction::RepairMediaGroups,
            ManagementAction::RepairProcessingFlow,
        ] {
            assert_eq!(action.as_str().parse::<ManagementAction>().ok(), Some(action));
            assert_eq!(serde_json::to_value(action).unwrap(), json!(action.as_str()));
        }
    }

    #[test]
    fn new_message_marks_captioned_member_as_original() {
        let message: TgMessage = serde_json::from_value(json!({
            "message_id": 7,
            "chat": { "id": -100, "type": "supergroup", "title": "Deals" },
            "caption": "  Widget x2  ",
            "media_group_id": "G1",
            "photo": [{ "file_id": "fid", "file_unique_id": "F1", "width": 10, "height": 10 }]
        }))
        .unwrap();
        let MessageContent::Media(attachment) = message.content() else {
            panic!("expected media");
        };

        let new_message = new_media_message(&message, &attachment.file_ref()).unwrap();
        assert_eq!(new_message.caption.as_deref(), Some("Widget x2"));
        assert!(new_message.is_original_caption);
        assert_eq!(new_message.processing_state, Some(ProcessingState::Pending));
        assert_eq!(new_message.mime_type.as_deref(), Some("image/jpeg"));
        assert_eq!(new_message.chat_title.as_deref(), Some("Deals"));
    }
}
