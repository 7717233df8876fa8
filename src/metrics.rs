//! Metric registration and recording helpers
//!
//! Built on the `metrics` facade; the binary or embedding application
//! installs whatever recorder it wants. Without one, recording is a no-op.

use metrics::{counter, describe_counter, describe_histogram, histogram};

// Metric names
pub const INGESTIONS_TOTAL: &str = "media_ingest_ingestions_total";
pub const DUPLICATES_TOTAL: &str = "media_ingest_duplicates_total";
pub const OTHER_MESSAGES_TOTAL: &str = "media_ingest_other_messages_total";
pub const RETRY_ATTEMPTS_TOTAL: &str = "media_ingest_retry_attempts_total";
pub const DOWNLOAD_BYTES_TOTAL: &str = "media_ingest_download_bytes_total";
pub const UPLOADS_TOTAL: &str = "media_ingest_uploads_total";
pub const AUDIT_FAILURES_TOTAL: &str = "media_ingest_audit_failures_total";
pub const GROUP_SYNCS_TOTAL: &str = "media_ingest_group_syncs_total";
pub const REPAIR_FIXES_TOTAL: &str = "media_ingest_repair_fixes_total";
pub const OPERATION_DURATION_SECONDS: &str = "media_ingest_operation_duration_seconds";

/// Register metric descriptions with the installed recorder
pub fn register_metrics() {
    describe_counter!(INGESTIONS_TOTAL, "Media ingestions by kind and outcome");
    describe_counter!(DUPLICATES_TOTAL, "Messages linked to an existing file owner");
    describe_counter!(OTHER_MESSAGES_TOTAL, "Non-media messages stored");
    describe_counter!(RETRY_ATTEMPTS_TOTAL, "Attempts made by retried operations");
    describe_counter!(DOWNLOAD_BYTES_TOTAL, "Bytes downloaded from Telegram");
    describe_counter!(UPLOADS_TOTAL, "Objects written to storage");
    describe_counter!(AUDIT_FAILURES_TOTAL, "Audit events that could not be written");
    describe_counter!(GROUP_SYNCS_TOTAL, "Media group syncs that changed members");
    describe_counter!(REPAIR_FIXES_TOTAL, "Defects fixed by repair actions");
    describe_histogram!(OPERATION_DURATION_SECONDS, "Duration of timed operations");
}

/// Count one ingestion attempt
pub fn record_ingestion(kind: &'static str, outcome: &'static str) {
    counter!(INGESTIONS_TOTAL, "kind" => kind, "outcome" => outcome).increment(1);
}

pub fn record_duplicate() {
    counter!(DUPLICATES_TOTAL).increment(1);
}

pub fn record_other_message(message_type: &str) {
    counter!(OTHER_MESSAGES_TOTAL, "type" => message_type.to_string()).increment(1);
}

pub fn record_retry_attempt(operation: &str) {
    counter!(RETRY_ATTEMPTS_TOTAL, "operation" => operation.to_string()).increment(1);
}

pub fn record_download_bytes(bytes: usize) {
    counter!(DOWNLOAD_BYTES_TOTAL).increment(bytes as u64);
}

pub fn record_upload(disposition: &'static str) {
    counter!(UPLOADS_TOTAL, "disposition" => disposition).increment(1);
}

pub fn record_audit_failure() {
    counter!(AUDIT_FAILURES_TOTAL).increment(1);
}

pub fn record_group_sync() {
    counter!(GROUP_SYNCS_TOTAL).increment(1);
}

/// Count fixes made by a repair action; zero is not recorded
pub fn record_repair_fixes(action: &'static str, count: usize) {
    if count > 0 {
        counter!(REPAIR_FIXES_TOTAL, "action" => action).increment(count as u64);
    }
}

pub fn record_operation_duration(operation: &str, seconds: f64) {
    histogram!(OPERATION_DURATION_SECONDS, "operation" => operation.to_string()).record(seconds);
}
