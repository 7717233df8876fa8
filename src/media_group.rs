//! Media group synchronisation
//!
//! Every album has one caption message whose analysis is canonical. Syncing
//! copies that analysis onto the other members and is idempotent: members
//! that already match are left alone, and a run that changes nothing emits
//! no audit event.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use crate::audit::AuditLogger;
use crate::capabilities::StoreCapabilities;
use crate::db::Database;
use crate::error::{IngestError, Result};
use crate::metrics;
use crate::models::{AuditEventType, AuditLogEntry, Message, ProcessingState};

/// Knobs for a sync run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Also carry the source's analysis history onto members
    pub sync_edit_history: bool,
    /// Rewrite members even when they already match
    pub force: bool,
}

/// Outcome of syncing one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Group that was synced
    pub media_group_id: String,
    /// Message whose analysis was copied
    pub source_message_id: String,
    /// Members rewritten, the source included when its flag changed
    pub updated: usize,
    /// Members that already matched
    pub unchanged: usize,
}

impl SyncReport {
    /// True when any row was written
    #[must_use]
    pub const fn changed(&self) -> bool {
        self.updated > 0
    }
}

/// A group whose members disagree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenGroup {
    /// Group id
    pub media_group_id: String,
    /// Number of messages in the group
    pub member_count: usize,
    /// Distinct non-null analyses across members
    pub distinct_contents: usize,
    /// Distinct processing states across members
    pub distinct_states: usize,
    /// Members without any analysis
    pub unanalyzed_members: usize,
}

/// Propagates a caption message's analysis to the rest of its group
#[derive(Clone)]
pub struct MediaGroupSynchronizer {
    db: Database,
    audit: AuditLogger,
    capabilities: Arc<dyn StoreCapabilities>,
}

impl MediaGroupSynchronizer {
    /// Create a synchronizer electing sources through `capabilities`
    #[must_use]
    pub fn new(db: Database, audit: AuditLogger, capabilities: Arc<dyn StoreCapabilities>) -> Self {
        Self {
            db,
            audit,
            capabilities,
        }
    }

    /// Copy `source_id`'s analysis to the rest of its group
    #[instrument(skip_all, fields(source_id = %source_id, correlation_id = %correlation_id))]
    pub async fn sync_from_source(
        &self,
        source_id: &str,
        options: SyncOptions,
        correlation_id: &str,
    ) -> Result<SyncReport> {
        let mut source = self
            .db
            .get_message(source_id)?
            .ok_or_else(|| IngestError::MessageNotFound(source_id.to_string()))?;
        let media_group_id = source
            .media_group_id
            .clone()
            .ok_or_else(|| IngestError::Validation(format!("message {source_id} is not part of a media group")))?;
        let content = source
            .analyzed_content
            .clone()
            .ok_or_else(|| IngestError::Validation(format!("message {source_id} has no analyzed_content to sync")))?;

        let mut updated = 0;
        let mut unchanged = 0;

        if !source.is_original_caption || source.message_caption_id.is_some() || source.group_caption_synced {
            source.is_original_caption = true;
            source.group_caption_synced = false;
            source.message_caption_id = None;
            source.correlation_id = Some(correlation_id.to_string());
            self.db.save_message(&mut source)?;
            updated += 1;
        }

        let now = Utc::now();
        for mut member in self.db.media_group_members(&media_group_id)? {
            if member.id == source.id {
                continue;
            }
            if !options.force && Self::member_matches(&member, &source, &content, options) {
                unchanged += 1;
                continue;
            }

            if let Some(previous) = member.analyzed_content.take() {
                if previous != content {
                    member.old_analyzed_content.push(previous);
                }
            }
            if options.sync_edit_history {
                for entry in &source.old_analyzed_content {
                    if !member.old_analyzed_content.contains(entry) {
                        member.old_analyzed_content.push(entry.clone());
                    }
                }
            }

            member.analyzed_content = Some(content.clone());
            member.group_caption_synced = true;
            member.is_original_caption = false;
            member.message_caption_id = Some(source.id.clone());
            member.correlation_id = Some(correlation_id.to_string());
            if source.processing_state == ProcessingState::Completed
                && member.processing_state != ProcessingState::Completed
            {
                member.processing_state = ProcessingState::Completed;
                member.processing_completed_at = Some(now);
                member.error_message = None;
            }

            self.db.save_message(&mut member)?;
            debug!(member_id = %member.id, "Synced group member");
            updated += 1;
        }

        let report = SyncReport {
            media_group_id: media_group_id.clone(),
            source_message_id: source.id.clone(),
            updated,
            unchanged,
        };

        if report.changed() {
            metrics::record_group_sync();
            self.audit.log(
                AuditLogEntry::new(AuditEventType::MediaGroupSynced, media_group_id.as_str())
                    .correlation(correlation_id)
                    .metadata(json!({
                        "source_message_id": source.id,
                        "updated": updated,
                        "unchanged": unchanged,
                        "sync_edit_history": options.sync_edit_history,
                        "force": options.force,
                    })),
            );
            info!(media_group_id = %media_group_id, updated, unchanged, "Media group synced");
        } else {
            debug!(media_group_id = %media_group_id, "Media group already consistent");
        }

        Ok(report)
    }

    fn member_matches(member: &Message, source: &Message, content: &Value, options: SyncOptions) -> bool {
        let state_matches = source.processing_state != ProcessingState::Completed
            || member.processing_state == ProcessingState::Completed;
        let history_matches = !options.sync_edit_history
            || source
                .old_analyzed_content
                .iter()
                .all(|entry| member.old_analyzed_content.contains(entry));

        member.analyzed_content.as_ref() == Some(content)
            && member.group_caption_synced
            && !member.is_original_caption
            && member.message_caption_id.as_deref() == Some(source.id.as_str())
            && state_matches
            && history_matches
    }

    /// The group's caption message: a flagged member with analysis, else the
    /// store's election
    pub async fn find_source(&self, media_group_id: &str) -> Result<Option<String>> {
        let members = self.db.media_group_members(media_group_id)?;
        if let Some(flagged) = members
            .iter()
            .find(|m| m.is_original_caption && m.analyzed_content.is_some())
        {
            return Ok(Some(flagged.id.clone()));
        }
        self.capabilities.elect_caption_source(media_group_id).await
    }

    /// Elect a source for the group and sync from it
    pub async fn sync_group(&self, media_group_id: &str, options: SyncOptions, correlation_id: &str) -> Result<SyncReport> {
        let source_id = self
            .find_source(media_group_id)
            .await?
            .ok_or_else(|| IngestError::MessageNotFound(format!("media group {media_group_id}")))?;
        self.sync_from_source(&source_id, options, correlation_id).await
    }

    /// Bring a newly stored member in line with an already-analysed group
    pub async fn sync_new_member(&self, message: &Message, correlation_id: &str) -> Result<Option<SyncReport>> {
        let Some(media_group_id) = message.media_group_id.as_deref() else {
            return Ok(None);
        };
        let members = self.db.media_group_members(media_group_id)?;
        let source = members
            .iter()
            .find(|m| m.id != message.id && m.is_original_caption && m.analyzed_content.is_some());
        match source {
            Some(source) => Ok(Some(
                self.sync_from_source(&source.id, SyncOptions::default(), correlation_id)
                    .await?,
            )),
            None => Ok(None),
        }
    }

    /// Groups whose members disagree on analysis or state
    pub fn detect_broken_groups(&self, limit: usize) -> Result<Vec<BrokenGroup>> {
        let mut broken = Vec::new();
        for media_group_id in self.db.media_group_ids(limit)? {
            let members = self.db.media_group_members(&media_group_id)?;
            if members.len() < 2 {
                continue;
            }

            let contents: HashSet<String> = members
                .iter()
                .filter_map(|m| m.analyzed_content.as_ref().map(Value::to_string))
                .collect();
            let states: HashSet<ProcessingState> = members.iter().map(|m| m.processing_state).collect();
            let unanalyzed_members = members.iter().filter(|m| m.analyzed_content.is_none()).count();

            let divergent = contents.len() > 1
                || states.len() > 1
                || (!contents.is_empty() && unanalyzed_members > 0);
            if divergent {
                broken.push(BrokenGroup {
                    media_group_id,
                    member_count: members.len(),
                    distinct_contents: contents.len(),
                    distinct_states: states.len(),
                    unanalyzed_members,
                });
            }
        }
        Ok(broken)
    }
}
