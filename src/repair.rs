//! Repair and validation jobs
//!
//! Each job re-drives the ingestion primitives to heal drift between the
//! message table, object storage and group consistency. Jobs are safe to run
//! repeatedly; a run over healthy data changes nothing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::capabilities::StoreCapabilities;
use crate::config::ProcessingConfig;
use crate::dispatcher::ManagementRequest;
use crate::downloader::MediaDownloader;
use crate::error::{IngestError, Result};
use crate::logging::OperationTimer;
use crate::media::{is_expected_storage_path, storage_path};
use crate::media_group::{SyncOptions, SyncReport};
use crate::metrics;
use crate::models::{
    AuditEventType, AuditLogEntry, Message, ProcessingState, ProcessingStats, StorageValidation,
};
use crate::repository::MessageStore;
use crate::state::{StallPolicy, TransitionRequest, STALLED_RESET_REASON};
use crate::storage::ObjectStorage;

/// Redownload reason for rows without a storage path
pub const MISSING_PATH_REASON: &str = "Missing storage path";
/// Redownload reason for rows whose object is gone
pub const MISSING_OBJECT_REASON: &str = "File missing from storage";
/// Redownload reason when the path could not be rewritten
pub const PATH_MISMATCH_REASON: &str = "Storage path mismatch";
/// Reset reason for messages requeued out of `error`
pub const ERROR_RESET_REASON: &str = "Reset from error state during repair";

/// How `repair-media-groups` picks its work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairMode {
    /// Scan every group for divergent members and resync them
    Full,
    /// Force-sync one group from an accepted or elected source
    Specific {
        media_group_id: String,
        source_message_id: Option<String>,
    },
    /// Delegate to the store's bulk repair capability
    Standard,
}

impl RepairMode {
    /// Resolve the mode named by a management request.
    ///
    /// Without an explicit mode a request naming a group is `specific`, any
    /// other request is `standard`.
    pub fn from_request(request: &ManagementRequest) -> Result<Self> {
        let specific = |group: Option<&String>| {
            group
                .cloned()
                .map(|media_group_id| Self::Specific {
                    media_group_id,
                    source_message_id: request.options.source_message_id.clone(),
                })
                .ok_or_else(|| {
                    IngestError::Validation("mediaGroupId is required for specific group repair".to_string())
                })
        };

        match request.options.mode.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("full") => Ok(Self::Full),
            Some("standard") => Ok(Self::Standard),
            Some("specific") => specific(request.media_group_id.as_ref()),
            Some(other) => Err(IngestError::Validation(format!("Unknown repair mode: {other}"))),
            None if request.media_group_id.is_some() => specific(request.media_group_id.as_ref()),
            None => Ok(Self::Standard),
        }
    }

    /// Mode name as reported back to callers
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Specific { .. } => "specific",
            Self::Standard => "standard",
        }
    }
}

enum StorageCheck {
    Valid,
    MissingPath,
    MissingObject,
    Unknown,
}

/// Result of `validate-storage-files`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageValidationReport {
    /// Candidates probed
    pub checked: usize,
    /// Objects found at their recorded path
    pub valid: usize,
    /// Rows with no recorded path
    pub missing_path: usize,
    /// Rows whose object is gone
    pub missing_object: usize,
    /// Probes that failed without an answer
    pub probe_errors: usize,
    /// Messages flagged for redownload
    pub flagged_message_ids: Vec<String>,
    /// Messages whose repair could not be written, as `id: error`
    pub failures: Vec<String>,
}

/// Result of `repair-storage-paths`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRepairReport {
    pub checked: usize,
    pub repaired: usize,
    pub repaired_message_ids: Vec<String>,
    /// Messages that could not be rewritten, as `id: error`
    pub failures: Vec<String>,
}

/// Result of `repair-media-groups`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRepairReport {
    /// Mode that ran
    pub mode: String,
    /// Rows rewritten across all groups
    pub fixed_count: usize,
    pub groups: Vec<SyncReport>,
    /// Groups or steps that failed, with their error
    pub failures: Vec<String>,
}

/// Result of `repair-processing-flow`, with stats taken on either side
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRepairReport {
    /// Rows whose state text was normalized
    pub enum_fixes: usize,
    /// Pending group members completed from an analysed sibling
    pub orphans_promoted: usize,
    pub stalled_reset: usize,
    pub errors_reset: usize,
    /// Initialized messages with a caption moved to pending
    pub initialized_queued: usize,
    pub before: ProcessingStats,
    pub after: ProcessingStats,
    /// Steps or messages that failed, with their error
    pub failures: Vec<String>,
}

/// Outcome for one message in a redownload batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedownloadResult {
    pub message_id: String,
    pub success: bool,
    /// True when a group member's `file_id` was used instead of the message's own
    pub used_group_file_id: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of `redownload-files`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedownloadReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<RedownloadResult>,
}

/// Maintenance jobs over the message store and object storage
#[derive(Clone)]
pub struct RepairService {
    store: MessageStore,
    capabilities: Arc<dyn StoreCapabilities>,
    storage: Arc<dyn ObjectStorage>,
    downloader: Option<MediaDownloader>,
    stall: StallPolicy,
    config: ProcessingConfig,
}

impl RepairService {
    /// Create the service; without a downloader `redownload-files` returns a config error
    #[must_use]
    pub fn new(
        store: MessageStore,
        capabilities: Arc<dyn StoreCapabilities>,
        storage: Arc<dyn ObjectStorage>,
        downloader: Option<MediaDownloader>,
        config: ProcessingConfig,
    ) -> Self {
        Self {
            store,
            capabilities,
            storage,
            downloader,
            stall: StallPolicy::from_secs(config.stall_threshold_secs),
            config,
        }
    }

    /// Processing limits the jobs run with
    #[must_use]
    pub const fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    /// Current processing statistics
    pub async fn stats(&self) -> Result<ProcessingStats> {
        self.capabilities.processing_stats(self.stall.cutoff(Utc::now())).await
    }

    /// Probe object storage for each candidate and cache the result
    pub async fn validate_storage_files(
        &self,
        limit: usize,
        only_newest: bool,
        correlation_id: &str,
    ) -> Result<StorageValidationReport> {
        let timer = OperationTimer::new("validate_storage_files");
        let mut report = StorageValidationReport::default();

        for message in self.store.db().validation_candidates(limit, only_newest)? {
            report.checked += 1;
            match self.validate_one(&message, correlation_id).await {
                Ok(StorageCheck::Valid) => report.valid += 1,
                Ok(StorageCheck::MissingPath) => {
                    report.missing_path += 1;
                    report.flagged_message_ids.push(message.id);
                }
                Ok(StorageCheck::MissingObject) => {
                    report.missing_object += 1;
                    report.flagged_message_ids.push(message.id);
                }
                Ok(StorageCheck::Unknown) => report.probe_errors += 1,
                Err(err) => {
                    warn!(message_id = %message.id, error = %err, "Storage validation write failed");
                    report.failures.push(format!("{}: {err}", message.id));
                }
            }
        }

        metrics::record_repair_fixes("validate", report.missing_path + report.missing_object);
        self.store.audit().log(
            AuditLogEntry::new(AuditEventType::StorageValidated, "storage")
                .correlation(correlation_id)
                .metadata(json!({
                    "checked": report.checked,
                    "valid": report.valid,
                    "missing_path": report.missing_path,
                    "missing_object": report.missing_object,
                    "probe_errors": report.probe_errors,
                    "failures": report.failures.len(),
                    "only_newest": only_newest,
                })),
        );
        info!(
            checked = report.checked,
            valid = report.valid,
            flagged = report.flagged_message_ids.len(),
            elapsed_ms = timer.finish(),
            "Storage validation finished"
        );
        Ok(report)
    }

    async fn validate_one(&self, message: &Message, correlation_id: &str) -> Result<StorageCheck> {
        let Some(path) = message.storage_path.clone().filter(|p| !p.trim().is_empty()) else {
            let path = storage_path(&message.file_unique_id, message.mime_type.as_deref());
            let url = self.storage.public_url(&path);
            self.store
                .set_storage_path(&message.id, &path, &url, MISSING_PATH_REASON, correlation_id)?;
            self.record_validation(message, &path, false, Some(MISSING_PATH_REASON))?;
            return Ok(StorageCheck::MissingPath);
        };

        match self.storage.exists(&path).await {
            Ok(true) => {
                self.record_validation(message, &path, true, None)?;
                Ok(StorageCheck::Valid)
            }
            Ok(false) => {
                self.store
                    .flag_for_redownload(&message.id, MISSING_OBJECT_REASON, correlation_id)?;
                self.record_validation(message, &path, false, Some(MISSING_OBJECT_REASON))?;
                Ok(StorageCheck::MissingObject)
            }
            Err(err) => {
                warn!(message_id = %message.id, storage_path = %path, error = %err, "Storage probe failed");
                self.record_validation(message, &path, false, Some(&err.to_string()))?;
                Ok(StorageCheck::Unknown)
            }
        }
    }

    fn record_validation(&self, message: &Message, path: &str, is_valid: bool, error: Option<&str>) -> Result<()> {
        self.store.db().upsert_storage_validation(&StorageValidation {
            file_unique_id: message.file_unique_id.clone(),
            storage_path: path.to_string(),
            last_checked_at: Utc::now(),
            is_valid,
            error_message: error.map(ToString::to_string),
        })
    }

    /// Rewrite storage paths that disagree with the deterministic key
    pub fn repair_storage_paths(&self, limit: usize, correlation_id: &str) -> Result<PathRepairReport> {
        let timer = OperationTimer::new("repair_storage_paths");
        let mut report = PathRepairReport::default();

        for message in self.store.db().all_messages(limit)? {
            report.checked += 1;
            let mime = message.mime_type.as_deref();
            if is_expected_storage_path(message.storage_path.as_deref(), &message.file_unique_id, mime) {
                continue;
            }

            let reason = if message.storage_path.as_deref().is_none_or(|p| p.trim().is_empty()) {
                MISSING_PATH_REASON
            } else {
                PATH_MISMATCH_REASON
            };
            let path = storage_path(&message.file_unique_id, mime);
            let url = self.storage.public_url(&path);
            match self.store.set_storage_path(&message.id, &path, &url, reason, correlation_id) {
                Ok(_) => {
                    report.repaired += 1;
                    report.repaired_message_ids.push(message.id);
                }
                Err(err) => {
                    warn!(message_id = %message.id, error = %err, "Storage path repair failed");
                    report.failures.push(format!("{}: {err}", message.id));
                }
            }
        }

        metrics::record_repair_fixes("repair-storage-paths", report.repaired);
        self.store.audit().log(
            AuditLogEntry::new(AuditEventType::StoragePathRepaired, "storage_paths")
                .correlation(correlation_id)
                .metadata(json!({
                    "checked": report.checked,
                    "repaired": report.repaired,
                    "failures": report.failures.len(),
                })),
        );
        info!(
            checked = report.checked,
            repaired = report.repaired,
            elapsed_ms = timer.finish(),
            "Storage path repair finished"
        );
        Ok(report)
    }

    /// Bring media groups back to a single canonical analysis
    pub async fn repair_media_groups(
        &self,
        mode: &RepairMode,
        options: SyncOptions,
        limit: usize,
        correlation_id: &str,
    ) -> Result<GroupRepairReport> {
        let timer = OperationTimer::new("repair_media_groups");
        let synchronizer = self.store.synchronizer();
        let mut groups = Vec::new();
        let mut failures = Vec::new();
        let mut fixed_count = 0;

        match mode {
            RepairMode::Full => {
                let broken_groups = synchronizer.detect_broken_groups(limit).unwrap_or_else(|err| {
                    warn!(error = %err, "Broken group scan failed");
                    failures.push(err.to_string());
                    Vec::new()
                });
                for broken in broken_groups {
                    match synchronizer
                        .sync_group(&broken.media_group_id, options, correlation_id)
                        .await
                    {
                        Ok(report) => {
                            fixed_count += report.updated;
                            groups.push(report);
                        }
                        Err(err) => {
                            warn!(media_group_id = %broken.media_group_id, error = %err, "Group repair failed");
                            failures.push(format!("{}: {err}", broken.media_group_id));
                        }
                    }
                }
            }
            RepairMode::Specific {
                media_group_id,
                source_message_id,
            } => {
                let source_id = match source_message_id {
                    Some(id) => {
                        let source = self.store.get(id)?;
                        if source.media_group_id.as_deref() != Some(media_group_id.as_str()) {
                            return Err(IngestError::Validation(format!(
                                "message {id} is not a member of media group {media_group_id}"
                            )));
                        }
                        source.id
                    }
                    None => synchronizer
                        .find_source(media_group_id)
                        .await?
                        .ok_or_else(|| IngestError::MessageNotFound(format!("media group {media_group_id}")))?,
                };
                let forced = SyncOptions { force: true, ..options };
                match synchronizer.sync_from_source(&source_id, forced, correlation_id).await {
                    Ok(report) => {
                        fixed_count = report.updated;
                        groups.push(report);
                    }
                    Err(err) => {
                        warn!(media_group_id = %media_group_id, error = %err, "Group repair failed");
                        failures.push(format!("{media_group_id}: {err}"));
                    }
                }
            }
            RepairMode::Standard => match self.capabilities.bulk_repair_media_groups().await {
                Ok(count) => fixed_count = count,
                Err(err) => {
                    warn!(error = %err, "Bulk group repair failed");
                    failures.push(err.to_string());
                }
            },
        }

        let entity = match mode {
            RepairMode::Specific { media_group_id, .. } => media_group_id.as_str(),
            RepairMode::Full | RepairMode::Standard => "media_groups",
        };
        metrics::record_repair_fixes("repair-media-groups", fixed_count);
        self.store.audit().log(
            AuditLogEntry::new(AuditEventType::MediaGroupRepaired, entity)
                .correlation(correlation_id)
                .metadata(json!({
                    "mode": mode.as_str(),
                    "fixed_count": fixed_count,
                    "groups": groups.len(),
                    "failures": failures.len(),
                })),
        );
        info!(mode = mode.as_str(), fixed_count, elapsed_ms = timer.finish(), "Media group repair finished");

        Ok(GroupRepairReport {
            mode: mode.as_str().to_string(),
            fixed_count,
            groups,
            failures,
        })
    }

    /// Unstick the processing pipeline.
    ///
    /// With `message_ids`, only those messages are reset (from `processing`
    /// or `error`); otherwise stalled messages up to `limit` are. A failing
    /// message is reported and skipped; the summary audit is always written.
    pub async fn repair_processing_flow(
        &self,
        message_ids: Option<&[String]>,
        limit: usize,
        correlation_id: &str,
    ) -> Result<FlowRepairReport> {
        let timer = OperationTimer::new("repair_processing_flow");
        let cutoff = self.stall.cutoff(Utc::now());
        let mut report = FlowRepairReport {
            before: self.capabilities.processing_stats(cutoff).await?,
            ..FlowRepairReport::default()
        };

        let outcome = self
            .reset_processing_flow(message_ids, limit, cutoff, correlation_id, &mut report)
            .await;
        if let Err(err) = &outcome {
            warn!(error = %err, "Processing flow repair stopped early");
            report.failures.push(err.to_string());
        }

        match self.capabilities.processing_stats(self.stall.cutoff(Utc::now())).await {
            Ok(after) => report.after = after,
            Err(err) => report.failures.push(format!("stats: {err}")),
        }

        metrics::record_repair_fixes(
            "repair-processing-flow",
            report.enum_fixes
                + report.orphans_promoted
                + report.stalled_reset
                + report.errors_reset
                + report.initialized_queued,
        );
        self.store.audit().log(
            AuditLogEntry::new(AuditEventType::ProcessingFlowRepaired, "processing_flow")
                .correlation(correlation_id)
                .states(
                    Some(serde_json::to_value(&report.before)?),
                    Some(serde_json::to_value(&report.after)?),
                )
                .metadata(json!({
                    "enum_fixes": report.enum_fixes,
                    "orphans_promoted": report.orphans_promoted,
                    "stalled_reset": report.stalled_reset,
                    "errors_reset": report.errors_reset,
                    "initialized_queued": report.initialized_queued,
                    "failures": report.failures.len(),
                    "targeted": message_ids.is_some(),
                })),
        );
        info!(
            stalled_reset = report.stalled_reset,
            initialized_queued = report.initialized_queued,
            failures = report.failures.len(),
            elapsed_ms = timer.finish(),
            "Processing flow repair finished"
        );
        outcome?;
        Ok(report)
    }

    async fn reset_processing_flow(
        &self,
        message_ids: Option<&[String]>,
        limit: usize,
        cutoff: DateTime<Utc>,
        correlation_id: &str,
        report: &mut FlowRepairReport,
    ) -> Result<()> {
        report.enum_fixes = self.capabilities.repair_state_enums().await?;

        for orphan_id in self.capabilities.find_orphaned_duplicates().await?.iter().take(limit) {
            match self.store.promote_orphan(orphan_id, correlation_id) {
                Ok(_) => report.orphans_promoted += 1,
                Err(err) => report.failures.push(format!("{orphan_id}: {err}")),
            }
        }

        let resets: Vec<(Message, &str)> = match message_ids {
            Some(ids) => self
                .store
                .db()
                .get_messages(ids)?
                .into_iter()
                .filter_map(|message| match message.processing_state {
                    ProcessingState::Processing if message.analyzed_content.is_none() => {
                        Some((message, STALLED_RESET_REASON))
                    }
                    ProcessingState::Error => Some((message, ERROR_RESET_REASON)),
                    _ => None,
                })
                .collect(),
            None => self
                .store
                .db()
                .stalled_messages(cutoff, limit)?
                .into_iter()
                .map(|message| (message, STALLED_RESET_REASON))
                .collect(),
        };
        for (message, reason) in resets {
            match self.store.reset_to_pending(&message.id, reason, correlation_id) {
                Ok(_) if reason == ERROR_RESET_REASON => report.errors_reset += 1,
                Ok(_) => report.stalled_reset += 1,
                Err(err) => report.failures.push(format!("{}: {err}", message.id)),
            }
        }

        for message in self.store.db().initialized_with_caption(limit)? {
            if message_ids.is_some_and(|ids| !ids.contains(&message.id)) {
                continue;
            }
            match self.store.transition_state(
                &message.id,
                TransitionRequest::to(ProcessingState::Pending),
                correlation_id,
            ) {
                Ok(_) => report.initialized_queued += 1,
                Err(err) => report.failures.push(format!("{}: {err}", message.id)),
            }
        }
        Ok(())
    }

    /// Fetch content again for the given messages, or for up to `limit`
    /// flagged ones
    pub async fn redownload(
        &self,
        message_ids: Option<&[String]>,
        limit: usize,
        correlation_id: &str,
    ) -> Result<RedownloadReport> {
        let downloader = self
            .downloader
            .as_ref()
            .ok_or_else(|| IngestError::InvalidConfig("redownload needs a Telegram downloader".to_string()))?;
        let timer = OperationTimer::new("redownload");

        let messages = match message_ids {
            Some(ids) => self.store.db().get_messages(ids)?,
            None => self.store.db().messages_needing_redownload(limit)?,
        };

        let mut report = RedownloadReport::default();
        for message in messages {
            report.attempted += 1;
            let (file_id, used_group_file_id) = self.choose_file_id(&message).await;

            let outcome = match downloader
                .download_and_upload(&file_id, &message.file_unique_id, message.mime_type.as_deref())
                .await
            {
                Ok(stored) => self
                    .store
                    .complete_redownload(
                        &message.id,
                        &stored.storage_path,
                        &stored.public_url,
                        &file_id,
                        correlation_id,
                    )
                    .map(|_| ()),
                Err(err) => Err(err),
            };

            match outcome {
                Ok(()) => {
                    report.succeeded += 1;
                    report.results.push(RedownloadResult {
                        message_id: message.id,
                        success: true,
                        used_group_file_id,
                        error: None,
                    });
                }
                Err(err) => {
                    warn!(message_id = %message.id, error = %err, "Redownload failed");
                    self.store.audit().log(
                        AuditLogEntry::new(AuditEventType::RedownloadFailed, message.id.as_str())
                            .correlation(correlation_id)
                            .metadata(json!({ "used_group_file_id": used_group_file_id, "error_code": err.code() }))
                            .error(err.to_string()),
                    );
                    report.failed += 1;
                    report.results.push(RedownloadResult {
                        message_id: message.id,
                        success: false,
                        used_group_file_id,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        metrics::record_repair_fixes("redownload", report.succeeded);
        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            elapsed_ms = timer.finish(),
            "Redownload finished"
        );
        Ok(report)
    }

    /// Own `file_id` while fresh, else a fresh one from the group, else own
    async fn choose_file_id(&self, message: &Message) -> (String, bool) {
        let now = Utc::now();
        if message.file_id_is_fresh(now) {
            return (message.file_id.clone(), false);
        }
        let Some(group) = message.media_group_id.as_deref() else {
            return (message.file_id.clone(), false);
        };

        match self
            .capabilities
            .find_valid_file_id_in_group(group, &message.file_unique_id, now)
            .await
        {
            Ok(Some(file_id)) if file_id != message.file_id => (file_id, true),
            Ok(_) => (message.file_id.clone(), false),
            Err(err) => {
                warn!(message_id = %message.id, error = %err, "Group file_id lookup failed");
                (message.file_id.clone(), false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::audit::AuditLogger;
    use crate::capabilities::{MockStoreCapabilities, SqlCapabilities};
    use crate::db::Database;
    use crate::dispatcher::ManagementAction;
    use crate::media_group::MediaGroupSynchronizer;
    use crate::storage::UploadOptions;

    struct EmptyBucket;

    #[async_trait]
    impl ObjectStorage for EmptyBucket {
        async fn upload(&self, _path: &str, _data: &[u8], _options: &UploadOptions) -> Result<()> {
            Ok(())
        }

        async fn exists(&self, _path: &str) -> Result<bool> {
            Ok(false)
        }

        fn public_url(&self, path: &str) -> String {
            format!("https://cdn.test/{path}")
        }
    }

    fn service(capabilities: MockStoreCapabilities) -> (tempfile::TempDir, RepairService) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&format!("sqlite://{}", dir.path().join("repair.db").display())).unwrap();
        let sql = Arc::new(SqlCapabilities::new(db.clone()));
        let synchronizer = MediaGroupSynchronizer::new(db.clone(), AuditLogger::new(db.clone()), sql);
        let store = MessageStore::new(db, synchronizer, 24);
        let service = RepairService::new(
            store,
            Arc::new(capabilities),
            Arc::new(EmptyBucket),
            None,
            ProcessingConfig::default(),
        );
        (dir, service)
    }

    #[tokio::test]
    async fn standard_mode_delegates_to_bulk_repair() {
        let mut capabilities = MockStoreCapabilities::new();
        capabilities.expect_bulk_repair_media_groups().times(1).returning(|| Ok(4));
        let (_dir, service) = service(capabilities);

        let report = service
            .repair_media_groups(&RepairMode::Standard, SyncOptions::default(), 10, "c")
            .await
            .unwrap();
        assert_eq!(report.fixed_count, 4);
        assert_eq!(report.mode, "standard");
    }

    #[tokio::test]
    async fn flow_repair_reports_enum_fixes() {
        let mut capabilities = MockStoreCapabilities::new();
        capabilities
            .expect_processing_stats()
            .times(2)
            .returning(|_| Ok(ProcessingStats::default()));
        capabilities.expect_repair_state_enums().times(1).returning(|| Ok(3));
        capabilities
            .expect_find_orphaned_duplicates()
            .times(1)
            .returning(|| Ok(Vec::new()));
        let (_dir, service) = service(capabilities);

        let report = service.repair_processing_flow(None, 10, "c").await.unwrap();
        assert_eq!(report.enum_fixes, 3);
        assert_eq!(report.stalled_reset, 0);
    }

    #[tokio::test]
    async fn bulk_repair_failure_is_reported_in_the_summary() {
        let mut capabilities = MockStoreCapabilities::new();
        capabilities
            .expect_bulk_repair_media_groups()
            .times(1)
            .returning(|| Err(IngestError::Other("bulk repair unavailable".to_string())));
        let (_dir, service) = service(capabilities);

        let report = service
            .repair_media_groups(&RepairMode::Standard, SyncOptions::default(), 10, "c")
            .await
            .unwrap();
        assert_eq!(report.fixed_count, 0);
        assert_eq!(report.failures.len(), 1);

        let audit = service.store.db().audit_entries("media_groups").unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].event_type, AuditEventType::MediaGroupRepaired);
    }

    #[tokio::test]
    async fn flow_repair_continues_past_failing_messages() {
        let mut capabilities = MockStoreCapabilities::new();
        capabilities
            .expect_processing_stats()
            .times(2)
            .returning(|_| Ok(ProcessingStats::default()));
        capabilities.expect_repair_state_enums().times(1).returning(|| Ok(0));
        capabilities
            .expect_find_orphaned_duplicates()
            .times(1)
            .returning(|| Ok(vec!["vanished".to_string()]));
        let (_dir, service) = service(capabilities);

        let report = service.repair_processing_flow(None, 10, "c").await.unwrap();
        assert_eq!(report.orphans_promoted, 0);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].starts_with("vanished"));

        let audit = service.store.db().audit_entries("processing_flow").unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].metadata.as_ref().unwrap()["failures"], 1);
    }

    #[tokio::test]
    async fn redownload_without_downloader_is_a_config_error() {
        let (_dir, service) = service(MockStoreCapabilities::new());
        let err = service.redownload(None, 10, "c").await.unwrap_err();
        assert!(matches!(err, IngestError::InvalidConfig(_)));
    }

    #[test]
    fn mode_defaults_follow_the_request() {
        let mut request = ManagementRequest::new(ManagementAction::RepairMediaGroups);
        assert_eq!(RepairMode::from_request(&request).unwrap(), RepairMode::Standard);

        request.media_group_id = Some("G1".to_string());
        assert_eq!(
            RepairMode::from_request(&request).unwrap(),
            RepairMode::Specific {
                media_group_id: "G1".to_string(),
                source_message_id: None,
            }
        );

        request.options.mode = Some("Full".to_string());
        assert_eq!(RepairMode::from_request(&request).unwrap(), RepairMode::Full);
    }
}
