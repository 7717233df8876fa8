//! Best-effort audit logging
//!
//! A failed write is retried once with the bulky state snapshots dropped and
//! then given up on; audit problems never fail the operation being audited.

use tracing::{debug, warn};

use crate::db::Database;
use crate::metrics;
use crate::models::AuditLogEntry;

/// Writes append-only audit entries
#[derive(Clone)]
pub struct AuditLogger {
    db: Database,
}

impl AuditLogger {
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record `entry`; returns whether anything was written
    pub fn log(&self, entry: AuditLogEntry) -> bool {
        let Err(err) = self.db.insert_audit(&entry) else {
            debug!(event_type = %entry.event_type, entity_id = %entry.entity_id, "Audit event recorded");
            return true;
        };

        warn!(
            event_type = %entry.event_type,
            entity_id = %entry.entity_id,
            error = %err,
            "Audit write failed, retrying with simplified payload"
        );

        let simplified = AuditLogEntry {
            previous_state: None,
            new_state: None,
            metadata: None,
            ..entry
        };
        match self.db.insert_audit(&simplified) {
            Ok(()) => true,
            Err(err) => {
                metrics::record_audit_failure();
                warn!(
                    event_type = %simplified.event_type,
                    entity_id = %simplified.entity_id,
                    error = %err,
                    "Audit event dropped"
                );
                false
            }
        }
    }
}
