//! Store-side capabilities consumed by the sync and repair services
//!
//! These are the aggregate operations a deployment may back with stored
//! procedures. [`SqlCapabilities`] implements them over the local schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::error::Result;
use crate::models::ProcessingStats;

/// Set-based operations the repair jobs delegate to the store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoreCapabilities: Send + Sync {
    /// Message counts per state; `stall_cutoff` bounds the stalled count
    async fn processing_stats(&self, stall_cutoff: DateTime<Utc>) -> Result<ProcessingStats>;

    /// Rewrite invalid `processing_state` values; returns rows fixed
    async fn repair_state_enums(&self) -> Result<usize>;

    /// Ids of duplicates whose owner is gone
    async fn find_orphaned_duplicates(&self) -> Result<Vec<String>>;

    /// Pick the caption message for a group
    async fn elect_caption_source(&self, media_group_id: &str) -> Result<Option<String>>;

    /// A still-fresh `file_id` for `file_unique_id` held by any group member
    async fn find_valid_file_id_in_group(
        &self,
        media_group_id: &str,
        file_unique_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<String>>;

    /// Converge every group onto its caption message; returns rows changed
    async fn bulk_repair_media_groups(&self) -> Result<usize>;
}

/// Capabilities backed by the local SQLite schema
#[derive(Clone)]
pub struct SqlCapabilities {
    db: Database,
}

impl SqlCapabilities {
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StoreCapabilities for SqlCapabilities {
    async fn processing_stats(&self, stall_cutoff: DateTime<Utc>) -> Result<ProcessingStats> {
        self.db.processing_stats(stall_cutoff)
    }

    async fn repair_state_enums(&self) -> Result<usize> {
        self.db.normalize_invalid_states()
    }

    async fn find_orphaned_duplicates(&self) -> Result<Vec<String>> {
        self.db.orphaned_duplicates()
    }

    async fn elect_caption_source(&self, media_group_id: &str) -> Result<Option<String>> {
        self.db.elect_caption_source(media_group_id)
    }

    async fn find_valid_file_id_in_group(
        &self,
        media_group_id: &str,
        file_unique_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<String>> {
        self.db.fresh_file_id_in_group(media_group_id, file_unique_id, now)
    }

    async fn bulk_repair_media_groups(&self) -> Result<usize> {
        self.db.bulk_sync_media_groups()
    }
}
