//! Duplicate detection by content key
//!
//! Lookups fail open: a database error is logged and reported as "not
//! found" so ingestion can proceed with a fresh download.

use tracing::warn;

use crate::db::Database;
use crate::models::{DuplicateCheck, Message};

/// Finds the message that owns storage for a content key
#[derive(Clone)]
pub struct DuplicateDetector {
    db: Database,
}

impl DuplicateDetector {
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Find the message that owns storage for `file_unique_id`
    #[must_use]
    pub fn check_file(&self, file_unique_id: &str) -> DuplicateCheck {
        match self.db.find_file_owner(file_unique_id) {
            Ok(owner) => {
                let owner = owner.as_ref().and_then(Message::owner_snapshot);
                DuplicateCheck {
                    exists: owner.is_some(),
                    owner,
                }
            }
            Err(err) => {
                warn!(file_unique_id, error = %err, "Duplicate lookup failed, treating as new");
                DuplicateCheck::default()
            }
        }
    }

    /// Find an already-stored copy of a specific Telegram message
    #[must_use]
    pub fn check_message(&self, telegram_message_id: i64, chat_id: i64) -> Option<Message> {
        match self.db.find_by_telegram_id(telegram_message_id, chat_id) {
            Ok(found) => found,
            Err(err) => {
                warn!(telegram_message_id, chat_id, error = %err, "Message lookup failed, treating as new");
                None
            }
        }
    }
}
