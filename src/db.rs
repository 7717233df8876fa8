use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{IngestError, Result};
use crate::models::{
    AuditEventType, AuditLogEntry, Message, NewMessage, OtherMessage, ProcessingState, ProcessingStats,
    StorageValidation,
};
use crate::schema::{audit_logs, messages, other_messages, storage_validations};

// Type alias for the database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Database manager for handling connections and operations
///
/// Cheap to clone; every component gets its own handle to the same pool.
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database connection pool with default sizing
    pub fn new(database_url: &str) -> Result<Self> {
        Self::with_pool(database_url, DEFAULT_MAX_CONNECTIONS, DEFAULT_CONNECTION_TIMEOUT)
    }

    /// Create a new database connection pool
    pub fn with_pool(database_url: &str, max_connections: u32, connection_timeout: Duration) -> Result<Self> {
        let path = Self::path_from_url(database_url);

        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| conn.busy_timeout(Duration::from_secs(5)));
        let pool = Pool::builder()
            .max_size(max_connections)
            .connection_timeout(connection_timeout)
            .build(manager)?;

        let conn = pool.get()?;
        Self::run_migrations(&conn)?;

        Ok(Self { pool })
    }

    /// Strip the `sqlite:` / `sqlite://` scheme from a database URL
    #[must_use]
    pub fn path_from_url(database_url: &str) -> &str {
        database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .unwrap_or(database_url)
    }

    /// Run database migrations
    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(include_str!("../migrations/2026-10-01-000000_create_tables/up.sql"))?;
        Ok(())
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> Result<DbConnection> {
        Ok(self.pool.get()?)
    }

    // ---------------------------------------------------------------------
    // Media messages
    // ---------------------------------------------------------------------

    /// Insert a media message.
    ///
    /// Returns `None` when a row for the same `(chat_id, telegram_message_id)`
    /// already exists; the existing row is left untouched.
    pub fn insert_message(&self, new_message: &NewMessage) -> Result<Option<Message>> {
        let conn = self.get_connection()?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let state = new_message.processing_state.unwrap_or(ProcessingState::Initialized);
        let telegram_data = new_message.telegram_data.as_ref().map(Value::to_string);
        let flagged_at = new_message.needs_redownload.then_some(now);

        let inserted = conn.execute(
            &format!(
                "INSERT INTO {table} (id, telegram_message_id, chat_id, chat_type, chat_title, media_group_id, \
                 caption, file_unique_id, file_id, file_id_expires_at, storage_path, public_url, mime_type, \
                 file_size, width, height, duration, processing_state, correlation_id, is_duplicate, \
                 duplicate_reference_id, needs_redownload, redownload_reason, redownload_flagged_at, \
                 telegram_data, is_original_caption, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, \
                 ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?27) \
                 ON CONFLICT({chat}, {tg}) DO NOTHING",
                table = messages::TABLE,
                chat = messages::CHAT_ID,
                tg = messages::TELEGRAM_MESSAGE_ID,
            ),
            params![
                id,
                new_message.telegram_message_id,
                new_message.chat_id,
                new_message.chat_type,
                new_message.chat_title,
                new_message.media_group_id,
                new_message.caption,
                new_message.file_unique_id,
                new_message.file_id,
                new_message.file_id_expires_at,
                non_empty(&new_message.storage_path),
                non_empty(&new_message.public_url),
                new_message.mime_type,
                new_message.file_size,
                new_message.width,
                new_message.height,
                new_message.duration,
                state.as_str(),
                new_message.correlation_id,
                new_message.is_duplicate,
                new_message.duplicate_reference_id,
                new_message.needs_redownload,
                new_message.redownload_reason,
                flagged_at,
                telegram_data,
                new_message.is_original_caption,
                now,
            ],
        )?;
        drop(conn);

        if inserted == 0 {
            return Ok(None);
        }
        self.get_message(&id)
    }

    /// Persist every mutable column of `message` and stamp `updated_at`
    pub fn save_message(&self, message: &mut Message) -> Result<()> {
        if self.write_message(message, None)? == 0 {
            return Err(IngestError::MessageNotFound(message.id.clone()));
        }
        Ok(())
    }

    /// Persist `message` only if the row is still at the `row_version` it was
    /// read with. Returns `false` when another writer got there first.
    pub fn save_message_if_current(&self, message: &mut Message) -> Result<bool> {
        if self.write_message(message, Some(message.row_version))? > 0 {
            return Ok(true);
        }
        if self.get_message(&message.id)?.is_none() {
            return Err(IngestError::MessageNotFound(message.id.clone()));
        }
        Ok(false)
    }

    fn write_message(&self, message: &mut Message, expected_version: Option<i64>) -> Result<usize> {
        let updated_at = Utc::now();
        let conn = self.get_connection()?;
        let analyzed = message.analyzed_content.as_ref().map(Value::to_string);
        let history = serde_json::to_string(&message.old_analyzed_content)?;
        let telegram_data = message.telegram_data.as_ref().map(Value::to_string);

        let changed = conn.execute(
            &format!(
                "UPDATE {t} SET media_group_id = ?2, caption = ?3, file_unique_id = ?4, file_id = ?5, \
                 file_id_expires_at = ?6, storage_path = ?7, public_url = ?8, mime_type = ?9, file_size = ?10, \
                 width = ?11, height = ?12, duration = ?13, processing_state = ?14, analyzed_content = ?15, \
                 old_analyzed_content = ?16, is_original_caption = ?17, group_caption_synced = ?18, \
                 message_caption_id = ?19, correlation_id = ?20, retry_count = ?21, error_message = ?22, \
                 is_duplicate = ?23, duplicate_reference_id = ?24, needs_redownload = ?25, \
                 redownload_reason = ?26, redownload_flagged_at = ?27, redownload_completed_at = ?28, \
                 is_edited = ?29, edit_count = ?30, telegram_data = ?31, updated_at = ?32, \
                 processing_started_at = ?33, processing_completed_at = ?34, last_error_at = ?35, \
                 {v} = {v} + 1 \
                 WHERE {id} = ?1 AND (?36 IS NULL OR {v} = ?36)",
                t = messages::TABLE,
                id = messages::ID,
                v = messages::ROW_VERSION,
            ),
            params![
                message.id,
                message.media_group_id,
                message.caption,
                message.file_unique_id,
                message.file_id,
                message.file_id_expires_at,
                message.storage_path,
                message.public_url,
                message.mime_type,
                message.file_size,
                message.width,
                message.height,
                message.duration,
                message.processing_state.as_str(),
                analyzed,
                history,
                message.is_original_caption,
                message.group_caption_synced,
                message.message_caption_id,
                message.correlation_id,
                message.retry_count,
                message.error_message,
                message.is_duplicate,
                message.duplicate_reference_id,
                message.needs_redownload,
                message.redownload_reason,
                message.redownload_flagged_at,
                message.redownload_completed_at,
                message.is_edited,
                message.edit_count,
                telegram_data,
                updated_at,
                message.processing_started_at,
                message.processing_completed_at,
                message.last_error_at,
                expected_version,
            ],
        )?;

        if changed > 0 {
            message.updated_at = updated_at;
            message.row_version += 1;
        }
        Ok(changed)
    }

    /// Get a message by ID
    pub fn get_message(&self, id: &str) -> Result<Option<Message>> {
        let conn = self.get_connection()?;
        let message = conn
            .query_row(
                &format!("SELECT * FROM {} WHERE {} = ?", messages::TABLE, messages::ID),
                params![id],
                Self::map_message,
            )
            .optional()?;
        Ok(message)
    }

    /// Get several messages by ID, skipping unknown ids
    pub fn get_messages(&self, ids: &[String]) -> Result<Vec<Message>> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(message) = self.get_message(id)? {
                results.push(message);
            }
        }
        Ok(results)
    }

    /// Find a message by its Telegram coordinates
    pub fn find_by_telegram_id(&self, telegram_message_id: i64, chat_id: i64) -> Result<Option<Message>> {
        let conn = self.get_connection()?;
        let message = conn
            .query_row(
                &format!(
                    "SELECT * FROM {} WHERE {} = ? AND {} = ?",
                    messages::TABLE,
                    messages::TELEGRAM_MESSAGE_ID,
                    messages::CHAT_ID
                ),
                params![telegram_message_id, chat_id],
                Self::map_message,
            )
            .optional()?;
        Ok(message)
    }

    /// Find the message that owns storage for `file_unique_id`: the earliest
    /// non-duplicate with a storage path.
    ///
    /// A redownload flag does not disqualify the owner, since refetching
    /// restores the same object. Failed ingestions (`error`, flagged, never
    /// refetched) are skipped because nothing was ever uploaded for them.
    pub fn find_file_owner(&self, file_unique_id: &str) -> Result<Option<Message>> {
        let conn = self.get_connection()?;
        let message = conn
            .query_row(
                &format!(
                    "SELECT * FROM {t} WHERE {f} = ? AND {d} = 0 AND {p} IS NOT NULL AND {p} != '' \
                     AND NOT ({s} = 'error' AND {n} = 1 AND {rc} IS NULL) \
                     ORDER BY {c} ASC, rowid ASC LIMIT 1",
                    t = messages::TABLE,
                    f = messages::FILE_UNIQUE_ID,
                    d = messages::IS_DUPLICATE,
                    n = messages::NEEDS_REDOWNLOAD,
                    p = messages::STORAGE_PATH,
                    s = messages::PROCESSING_STATE,
                    rc = messages::REDOWNLOAD_COMPLETED_AT,
                    c = messages::CREATED_AT,
                ),
                params![file_unique_id],
                Self::map_message,
            )
            .optional()?;
        Ok(message)
    }

    /// All members of a media group, oldest first
    pub fn media_group_members(&self, media_group_id: &str) -> Result<Vec<Message>> {
        self.query_messages(
            &format!(
                "SELECT * FROM {} WHERE {} = ? ORDER BY {} ASC, {} ASC",
                messages::TABLE,
                messages::MEDIA_GROUP_ID,
                messages::CREATED_AT,
                messages::TELEGRAM_MESSAGE_ID
            ),
            params![media_group_id],
        )
    }

    /// Distinct media group ids, most recently active first
    pub fn media_group_ids(&self, limit: usize) -> Result<Vec<String>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {g} FROM {t} WHERE {g} IS NOT NULL GROUP BY {g} ORDER BY MAX({u}) DESC LIMIT ?",
            g = messages::MEDIA_GROUP_ID,
            t = messages::TABLE,
            u = messages::UPDATED_AT,
        ))?;
        let ids = stmt
            .query_map(params![Self::sql_limit(limit)], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Messages currently in `state`, oldest first
    pub fn messages_in_state(&self, state: ProcessingState, limit: usize) -> Result<Vec<Message>> {
        self.query_messages(
            &format!(
                "SELECT * FROM {} WHERE {} = ? ORDER BY {} ASC LIMIT ?",
                messages::TABLE,
                messages::PROCESSING_STATE,
                messages::CREATED_AT
            ),
            params![state.as_str(), Self::sql_limit(limit)],
        )
    }

    /// Messages stuck in `processing` since before `cutoff` without an analysis
    pub fn stalled_messages(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<Vec<Message>> {
        self.query_messages(
            &format!(
                "SELECT * FROM {t} WHERE {s} = 'processing' AND {a} IS NULL \
                 AND COALESCE({ps}, {u}) < ? ORDER BY {c} ASC LIMIT ?",
                t = messages::TABLE,
                s = messages::PROCESSING_STATE,
                a = messages::ANALYZED_CONTENT,
                ps = messages::PROCESSING_STARTED_AT,
                u = messages::UPDATED_AT,
                c = messages::CREATED_AT,
            ),
            params![cutoff, Self::sql_limit(limit)],
        )
    }

    /// `initialized` messages that already carry a caption
    pub fn initialized_with_caption(&self, limit: usize) -> Result<Vec<Message>> {
        self.query_messages(
            &format!(
                "SELECT * FROM {t} WHERE {s} = 'initialized' AND {cap} IS NOT NULL AND TRIM({cap}) != '' \
                 ORDER BY {c} ASC LIMIT ?",
                t = messages::TABLE,
                s = messages::PROCESSING_STATE,
                cap = messages::CAPTION,
                c = messages::CREATED_AT,
            ),
            params![Self::sql_limit(limit)],
        )
    }

    /// Non-duplicate messages whose storage should be probed
    pub fn validation_candidates(&self, limit: usize, only_newest: bool) -> Result<Vec<Message>> {
        let order = if only_newest { "DESC" } else { "ASC" };
        self.query_messages(
            &format!(
                "SELECT * FROM {} WHERE {} = 0 ORDER BY {} {order} LIMIT ?",
                messages::TABLE,
                messages::IS_DUPLICATE,
                messages::CREATED_AT
            ),
            params![Self::sql_limit(limit)],
        )
    }

    /// Every media message, oldest first
    pub fn all_messages(&self, limit: usize) -> Result<Vec<Message>> {
        self.query_messages(
            &format!("SELECT * FROM {} ORDER BY {} ASC LIMIT ?", messages::TABLE, messages::CREATED_AT),
            params![Self::sql_limit(limit)],
        )
    }

    /// Messages flagged for redownload, oldest flag first
    pub fn messages_needing_redownload(&self, limit: usize) -> Result<Vec<Message>> {
        self.query_messages(
            &format!(
                "SELECT * FROM {} WHERE {} = 1 ORDER BY {} ASC LIMIT ?",
                messages::TABLE,
                messages::NEEDS_REDOWNLOAD,
                messages::REDOWNLOAD_FLAGGED_AT
            ),
            params![Self::sql_limit(limit)],
        )
    }

    fn query_messages(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Message>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, Self::map_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn sql_limit(limit: usize) -> i64 {
        i64::try_from(limit).unwrap_or(i64::MAX)
    }

    /// Map a database row to a Message
    fn map_message(row: &Row) -> rusqlite::Result<Message> {
        let state: String = row.get(messages::PROCESSING_STATE)?;
        let history: Option<Value> = Self::json_column(row, messages::OLD_ANALYZED_CONTENT)?;
        let old_analyzed_content = match history {
            Some(Value::Array(items)) => items,
            Some(other) => vec![other],
            None => Vec::new(),
        };

        Ok(Message {
            id: row.get(messages::ID)?,
            telegram_message_id: row.get(messages::TELEGRAM_MESSAGE_ID)?,
            chat_id: row.get(messages::CHAT_ID)?,
            chat_type: row.get(messages::CHAT_TYPE)?,
            chat_title: row.get(messages::CHAT_TITLE)?,
            media_group_id: row.get(messages::MEDIA_GROUP_ID)?,
            caption: row.get(messages::CAPTION)?,
            file_unique_id: row.get(messages::FILE_UNIQUE_ID)?,
            file_id: row.get(messages::FILE_ID)?,
            file_id_expires_at: row.get(messages::FILE_ID_EXPIRES_AT)?,
            storage_path: row.get(messages::STORAGE_PATH)?,
            public_url: row.get(messages::PUBLIC_URL)?,
            mime_type: row.get(messages::MIME_TYPE)?,
            file_size: row.get(messages::FILE_SIZE)?,
            width: row.get(messages::WIDTH)?,
            height: row.get(messages::HEIGHT)?,
            duration: row.get(messages::DURATION)?,
            // Unknown values are normalised by the enum repair job
            processing_state: state.parse().unwrap_or(ProcessingState::Pending),
            analyzed_content: Self::json_column(row, messages::ANALYZED_CONTENT)?,
            old_analyzed_content,
            is_original_caption: row.get(messages::IS_ORIGINAL_CAPTION)?,
            group_caption_synced: row.get(messages::GROUP_CAPTION_SYNCED)?,
            message_caption_id: row.get(messages::MESSAGE_CAPTION_ID)?,
            correlation_id: row.get(messages::CORRELATION_ID)?,
            retry_count: row.get(messages::RETRY_COUNT)?,
            error_message: row.get(messages::ERROR_MESSAGE)?,
            is_duplicate: row.get(messages::IS_DUPLICATE)?,
            duplicate_reference_id: row.get(messages::DUPLICATE_REFERENCE_ID)?,
            needs_redownload: row.get(messages::NEEDS_REDOWNLOAD)?,
            redownload_reason: row.get(messages::REDOWNLOAD_REASON)?,
            redownload_flagged_at: row.get(messages::REDOWNLOAD_FLAGGED_AT)?,
            redownload_completed_at: row.get(messages::REDOWNLOAD_COMPLETED_AT)?,
            is_edited: row.get(messages::IS_EDITED)?,
            edit_count: row.get(messages::EDIT_COUNT)?,
            telegram_data: Self::json_column(row, messages::TELEGRAM_DATA)?,
            created_at: row.get(messages::CREATED_AT)?,
            updated_at: row.get(messages::UPDATED_AT)?,
            processing_started_at: row.get(messages::PROCESSING_STARTED_AT)?,
            processing_completed_at: row.get(messages::PROCESSING_COMPLETED_AT)?,
            last_error_at: row.get(messages::LAST_ERROR_AT)?,
            row_version: row.get(messages::ROW_VERSION)?,
        })
    }

    /// Read an optional JSON text column
    fn json_column(row: &Row, column: &str) -> rusqlite::Result<Option<Value>> {
        let raw: Option<String> = row.get(column)?;
        raw.map(|text| {
            serde_json::from_str(&text).map_err(|e| {
                let idx = row.as_ref().column_index(column).unwrap_or_default();
                rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
            })
        })
        .transpose()
    }

    // ---------------------------------------------------------------------
    // Non-media messages
    // ---------------------------------------------------------------------

    /// Insert a non-media message; returns false when it already exists
    pub fn insert_other_message(&self, message: &OtherMessage) -> Result<bool> {
        let conn = self.get_connection()?;
        let inserted = conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
                 ON CONFLICT({}, {}) DO NOTHING",
                other_messages::TABLE,
                other_messages::ID,
                other_messages::TELEGRAM_MESSAGE_ID,
                other_messages::CHAT_ID,
                other_messages::CHAT_TYPE,
                other_messages::MESSAGE_TYPE,
                other_messages::MESSAGE_TEXT,
                other_messages::IS_EDITED,
                other_messages::CORRELATION_ID,
                other_messages::TELEGRAM_DATA,
                other_messages::CREATED_AT,
                other_messages::UPDATED_AT,
                other_messages::CHAT_ID,
                other_messages::TELEGRAM_MESSAGE_ID,
            ),
            params![
                message.id,
                message.telegram_message_id,
                message.chat_id,
                message.chat_type,
                message.message_type,
                message.message_text,
                message.is_edited,
                message.correlation_id,
                message.telegram_data.as_ref().map(Value::to_string),
                message.created_at,
                message.updated_at,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Overwrite the text of a non-media message after an edit
    pub fn update_other_message_text(&self, id: &str, text: Option<&str>, telegram_data: Option<&Value>) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute(
            &format!(
                "UPDATE {} SET {} = ?2, {} = 1, {} = ?3, {} = ?4 WHERE {} = ?1",
                other_messages::TABLE,
                other_messages::MESSAGE_TEXT,
                other_messages::IS_EDITED,
                other_messages::TELEGRAM_DATA,
                other_messages::UPDATED_AT,
                other_messages::ID
            ),
            params![id, text, telegram_data.map(Value::to_string), Utc::now()],
        )?;
        Ok(())
    }

    /// Find a non-media message by its Telegram coordinates
    pub fn find_other_message(&self, telegram_message_id: i64, chat_id: i64) -> Result<Option<OtherMessage>> {
        let conn = self.get_connection()?;
        let message = conn
            .query_row(
                &format!(
                    "SELECT * FROM {} WHERE {} = ? AND {} = ?",
                    other_messages::TABLE,
                    other_messages::TELEGRAM_MESSAGE_ID,
                    other_messages::CHAT_ID
                ),
                params![telegram_message_id, chat_id],
                |row| {
                    Ok(OtherMessage {
                        id: row.get(other_messages::ID)?,
                        telegram_message_id: row.get(other_messages::TELEGRAM_MESSAGE_ID)?,
                        chat_id: row.get(other_messages::CHAT_ID)?,
                        chat_type: row.get(other_messages::CHAT_TYPE)?,
                        message_type: row.get(other_messages::MESSAGE_TYPE)?,
                        message_text: row.get(other_messages::MESSAGE_TEXT)?,
                        is_edited: row.get(other_messages::IS_EDITED)?,
                        correlation_id: row.get(other_messages::CORRELATION_ID)?,
                        telegram_data: Self::json_column(row, other_messages::TELEGRAM_DATA)?,
                        created_at: row.get(other_messages::CREATED_AT)?,
                        updated_at: row.get(other_messages::UPDATED_AT)?,
                    })
                },
            )
            .optional()?;
        Ok(message)
    }

    // ---------------------------------------------------------------------
    // Audit log
    // ---------------------------------------------------------------------

    /// Append an audit entry
    pub fn insert_audit(&self, entry: &AuditLogEntry) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                audit_logs::TABLE,
                audit_logs::EVENT_TYPE,
                audit_logs::ENTITY_ID,
                audit_logs::CORRELATION_ID,
                audit_logs::PREVIOUS_STATE,
                audit_logs::NEW_STATE,
                audit_logs::METADATA,
                audit_logs::ERROR_MESSAGE,
                audit_logs::EVENT_TIMESTAMP
            ),
            params![
                entry.event_type.as_str(),
                entry.entity_id,
                entry.correlation_id,
                entry.previous_state.as_ref().map(Value::to_string),
                entry.new_state.as_ref().map(Value::to_string),
                entry.metadata.as_ref().map(Value::to_string),
                entry.error_message,
                entry.event_timestamp,
            ],
        )?;
        Ok(())
    }

    /// Audit entries for one entity, oldest first
    pub fn audit_entries(&self, entity_id: &str) -> Result<Vec<AuditLogEntry>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} WHERE {} = ? ORDER BY id ASC",
            audit_logs::TABLE,
            audit_logs::ENTITY_ID
        ))?;
        let rows = stmt
            .query_map(params![entity_id], |row| {
                let event_type: String = row.get(audit_logs::EVENT_TYPE)?;
                let event_type = serde_json::from_value::<AuditEventType>(Value::String(event_type))
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
                Ok(AuditLogEntry {
                    event_type,
                    entity_id: row.get(audit_logs::ENTITY_ID)?,
                    correlation_id: row.get(audit_logs::CORRELATION_ID)?,
                    previous_state: Self::json_column(row, audit_logs::PREVIOUS_STATE)?,
                    new_state: Self::json_column(row, audit_logs::NEW_STATE)?,
                    metadata: Self::json_column(row, audit_logs::METADATA)?,
                    error_message: row.get(audit_logs::ERROR_MESSAGE)?,
                    event_timestamp: row.get(audit_logs::EVENT_TIMESTAMP)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ---------------------------------------------------------------------
    // Storage validation cache
    // ---------------------------------------------------------------------

    /// Record the outcome of a storage probe
    pub fn upsert_storage_validation(&self, validation: &StorageValidation) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute(
            &format!(
                "INSERT INTO {t} ({f}, {p}, {c}, {v}, {e}) VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT({f}) DO UPDATE SET {p} = ?2, {c} = ?3, {v} = ?4, {e} = ?5",
                t = storage_validations::TABLE,
                f = storage_validations::FILE_UNIQUE_ID,
                p = storage_validations::STORAGE_PATH,
                c = storage_validations::LAST_CHECKED_AT,
                v = storage_validations::IS_VALID,
                e = storage_validations::ERROR_MESSAGE,
            ),
            params![
                validation.file_unique_id,
                validation.storage_path,
                validation.last_checked_at,
                validation.is_valid,
                validation.error_message,
            ],
        )?;
        Ok(())
    }

    /// Cached storage probe for a file
    pub fn get_storage_validation(&self, file_unique_id: &str) -> Result<Option<StorageValidation>> {
        let conn = self.get_connection()?;
        let validation = conn
            .query_row(
                &format!(
                    "SELECT * FROM {} WHERE {} = ?",
                    storage_validations::TABLE,
                    storage_validations::FILE_UNIQUE_ID
                ),
                params![file_unique_id],
                |row| {
                    Ok(StorageValidation {
                        file_unique_id: row.get(storage_validations::FILE_UNIQUE_ID)?,
                        storage_path: row.get(storage_validations::STORAGE_PATH)?,
                        last_checked_at: row.get(storage_validations::LAST_CHECKED_AT)?,
                        is_valid: row.get(storage_validations::IS_VALID)?,
                        error_message: row.get(storage_validations::ERROR_MESSAGE)?,
                    })
                },
            )
            .optional()?;
        Ok(validation)
    }

    // ---------------------------------------------------------------------
    // Aggregate queries backing the store capabilities
    // ---------------------------------------------------------------------

    /// Count messages per state; `stall_cutoff` bounds the stalled count
    pub fn processing_stats(&self, stall_cutoff: DateTime<Utc>) -> Result<ProcessingStats> {
        let conn = self.get_connection()?;
        let mut stats = ProcessingStats::default();

        let mut stmt = conn.prepare(&format!(
            "SELECT {s}, COUNT(*) FROM {t} GROUP BY {s}",
            s = messages::PROCESSING_STATE,
            t = messages::TABLE,
        ))?;
        let counts = stmt
            .query_map(params![], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (state, count) in counts {
            stats.add(state.parse().unwrap_or(ProcessingState::Pending), count);
        }

        stats.stalled = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {t} WHERE {s} = 'processing' AND {a} IS NULL AND COALESCE({ps}, {u}) < ?",
                t = messages::TABLE,
                s = messages::PROCESSING_STATE,
                a = messages::ANALYZED_CONTENT,
                ps = messages::PROCESSING_STARTED_AT,
                u = messages::UPDATED_AT,
            ),
            params![stall_cutoff],
            |row| row.get(0),
        )?;
        stats.needs_redownload = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE {} = 1", messages::TABLE, messages::NEEDS_REDOWNLOAD),
            params![],
            |row| row.get(0),
        )?;

        Ok(stats)
    }

    /// Rewrite unknown `processing_state` values to `pending`
    pub fn normalize_invalid_states(&self) -> Result<usize> {
        let conn = self.get_connection()?;
        let valid = ProcessingState::ALL
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let changed = conn.execute(
            &format!(
                "UPDATE {t} SET {s} = 'pending', {u} = ?, {v} = {v} + 1 WHERE {s} NOT IN ({valid})",
                t = messages::TABLE,
                s = messages::PROCESSING_STATE,
                u = messages::UPDATED_AT,
                v = messages::ROW_VERSION,
            ),
            params![Utc::now()],
        )?;
        Ok(changed)
    }

    /// Duplicates whose referenced owner no longer exists
    pub fn orphaned_duplicates(&self) -> Result<Vec<String>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT m.{id} FROM {t} m WHERE m.{d} = 1 AND (m.{r} IS NULL OR NOT EXISTS \
             (SELECT 1 FROM {t} o WHERE o.{id} = m.{r}))",
            id = messages::ID,
            t = messages::TABLE,
            d = messages::IS_DUPLICATE,
            r = messages::DUPLICATE_REFERENCE_ID,
        ))?;
        let ids = stmt
            .query_map(params![], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Earliest group member with a caption, else the earliest member
    pub fn elect_caption_source(&self, media_group_id: &str) -> Result<Option<String>> {
        let conn = self.get_connection()?;
        let id = conn
            .query_row(
                &format!(
                    "SELECT {id} FROM {t} WHERE {g} = ? \
                     ORDER BY CASE WHEN {cap} IS NOT NULL AND TRIM({cap}) != '' THEN 0 ELSE 1 END, \
                     {c} ASC, {tg} ASC LIMIT 1",
                    id = messages::ID,
                    t = messages::TABLE,
                    g = messages::MEDIA_GROUP_ID,
                    cap = messages::CAPTION,
                    c = messages::CREATED_AT,
                    tg = messages::TELEGRAM_MESSAGE_ID,
                ),
                params![media_group_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(id)
    }

    /// A fresh `file_id` for `file_unique_id` held by some member of the group
    pub fn fresh_file_id_in_group(
        &self,
        media_group_id: &str,
        file_unique_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<String>> {
        let conn = self.get_connection()?;
        let file_id = conn
            .query_row(
                &format!(
                    "SELECT {fid} FROM {t} WHERE {g} = ? AND {f} = ? AND {exp} > ? \
                     ORDER BY {exp} DESC LIMIT 1",
                    fid = messages::FILE_ID,
                    t = messages::TABLE,
                    g = messages::MEDIA_GROUP_ID,
                    f = messages::FILE_UNIQUE_ID,
                    exp = messages::FILE_ID_EXPIRES_AT,
                ),
                params![media_group_id, file_unique_id, now],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(file_id)
    }

    /// Copy each group's canonical analysis onto members that differ from it.
    ///
    /// Returns the number of member rows changed.
    pub fn bulk_sync_media_groups(&self) -> Result<usize> {
        let conn = self.get_connection()?;
        let changed = conn.execute(
            &format!(
                "UPDATE {t} AS m SET \
                 {a} = src.{a}, {gs} = 1, {oc} = 0, {mc} = src.{id}, \
                 {s} = CASE WHEN src.{s} = 'completed' THEN 'completed' ELSE m.{s} END, \
                 {pc} = CASE WHEN src.{s} = 'completed' THEN ?1 ELSE m.{pc} END, \
                 {em} = CASE WHEN src.{s} = 'completed' THEN NULL ELSE m.{em} END, \
                 {u} = ?1, {v} = m.{v} + 1 \
                 FROM {t} AS src \
                 WHERE src.{g} = m.{g} AND src.{oc} = 1 AND src.{a} IS NOT NULL \
                 AND m.{id} != src.{id} AND m.{g} IS NOT NULL \
                 AND (m.{a} IS NULL OR m.{a} != src.{a} OR m.{gs} = 0 \
                 OR m.{mc} IS NULL OR m.{mc} != src.{id} \
                 OR (src.{s} = 'completed' AND m.{s} != 'completed'))",
                t = messages::TABLE,
                a = messages::ANALYZED_CONTENT,
                gs = messages::GROUP_CAPTION_SYNCED,
                oc = messages::IS_ORIGINAL_CAPTION,
                mc = messages::MESSAGE_CAPTION_ID,
                id = messages::ID,
                s = messages::PROCESSING_STATE,
                pc = messages::PROCESSING_COMPLETED_AT,
                em = messages::ERROR_MESSAGE,
                u = messages::UPDATED_AT,
                v = messages::ROW_VERSION,
                g = messages::MEDIA_GROUP_ID,
            ),
            params![Utc::now()],
        )?;
        Ok(changed)
    }
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}
