//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use media_ingest::audit::AuditLogger;
use media_ingest::capabilities::SqlCapabilities;
use media_ingest::config::AppConfig;
use media_ingest::media_group::MediaGroupSynchronizer;
use media_ingest::error::{IngestError, Result};
use media_ingest::models::NewMessage;
use media_ingest::retry::RetryPolicy;
use media_ingest::storage::{ObjectStorage, UploadOptions};
use media_ingest::telegram::Update;
use media_ingest::{Database, MessageStore, WebhookDispatcher};

pub const BOT_TOKEN: &str = "123456:TEST";

/// Fresh database in a temporary directory; keep the `TempDir` alive
pub fn test_db() -> (TempDir, Database) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let url = format!("sqlite://{}", dir.path().join("test.db").display());
    let db = Database::new(&url).expect("Failed to create database");
    (dir, db)
}

/// Message store over a fresh database
pub fn test_store() -> (TempDir, MessageStore) {
    let (dir, db) = test_db();
    let capabilities = Arc::new(SqlCapabilities::new(db.clone()));
    let synchronizer = MediaGroupSynchronizer::new(db.clone(), AuditLogger::new(db.clone()), capabilities);
    (dir, MessageStore::new(db, synchronizer, 24))
}

/// Configuration pointing Telegram at `telegram_base` with instant retries
pub fn test_config(telegram_base: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.telegram.bot_token = BOT_TOKEN.to_string();
    config.telegram.api_base = telegram_base.to_string();
    config.telegram.file_base = telegram_base.to_string();
    config.telegram.min_request_interval_ms = 0;
    config.telegram.metadata_retry = RetryPolicy::immediate(2);
    config.telegram.download_retry = RetryPolicy::immediate(2);
    config.storage.upload_retry = RetryPolicy::immediate(2);
    config
}

/// Object storage kept in memory, with injectable failures
#[derive(Default)]
pub struct InMemoryStorage {
    objects: Mutex<HashMap<String, (Vec<u8>, UploadOptions)>>,
    pub upload_calls: AtomicUsize,
    transient_failures: AtomicUsize,
    reject_uploads: Mutex<bool>,
}

impl InMemoryStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `n` uploads with a transient error
    pub fn fail_next_uploads(&self, n: usize) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// Reject every upload permanently
    pub fn reject_uploads(&self) {
        *self.reject_uploads.lock().unwrap() = true;
    }

    pub fn put(&self, path: &str, data: &[u8]) {
        let options = UploadOptions {
            content_type: "application/octet-stream".to_string(),
            content_disposition: media_ingest::media::Disposition::Attachment,
            cache_control: "3600".to_string(),
            upsert: true,
        };
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), (data.to_vec(), options));
    }

    pub fn remove(&self, path: &str) {
        self.objects.lock().unwrap().remove(path);
    }

    pub fn get(&self, path: &str) -> Option<(Vec<u8>, UploadOptions)> {
        self.objects.lock().unwrap().get(path).cloned()
    }

    pub fn uploads(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStorage for InMemoryStorage {
    async fn upload(&self, path: &str, data: &[u8], options: &UploadOptions) -> Result<()> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if *self.reject_uploads.lock().unwrap() {
            return Err(IngestError::StorageRejected("bucket not found".to_string()));
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(IngestError::Storage("503 Service Unavailable".to_string()));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), (data.to_vec(), options.clone()));
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.objects.lock().unwrap().contains_key(path))
    }

    fn public_url(&self, path: &str) -> String {
        format!("https://cdn.test/telegram-media/{path}")
    }
}

/// Dispatcher wired to a mock Telegram server and in-memory storage
pub async fn test_dispatcher() -> (TempDir, MockServer, Arc<InMemoryStorage>, WebhookDispatcher) {
    let (dir, db) = test_db();
    let server = MockServer::start().await;
    let storage = InMemoryStorage::new();
    let dispatcher = WebhookDispatcher::from_config(&test_config(&server.uri()), db, storage.clone());
    (dir, server, storage, dispatcher)
}

/// Serve `bytes` for `file_id` through getFile and the file endpoint
pub async fn mount_file(server: &MockServer, file_id: &str, bytes: &[u8]) {
    let file_path = format!("photos/{file_id}.jpg");
    Mock::given(method("GET"))
        .and(path(format!("/bot{BOT_TOKEN}/getFile")))
        .and(query_param("file_id", file_id))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": { "file_id": file_id, "file_path": file_path }
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/file/bot{BOT_TOKEN}/{file_path}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.to_vec()))
        .mount(server)
        .await;
}

/// Make getFile reject `file_id` permanently
pub async fn mount_invalid_file(server: &MockServer, file_id: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/bot{BOT_TOKEN}/getFile")))
        .and(query_param("file_id", file_id))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "ok": false,
            "error_code": 400,
            "description": "Bad Request: invalid file_id"
        })))
        .mount(server)
        .await;
}

/// Photo message payload
pub fn photo_message(
    message_id: i64,
    file_unique_id: &str,
    caption: Option<&str>,
    media_group_id: Option<&str>,
) -> Value {
    let mut message = json!({
        "message_id": message_id,
        "date": 1_760_000_000,
        "chat": { "id": -1001, "type": "supergroup", "title": "Deals" },
        "from": { "id": 42, "is_bot": false, "username": "seller" },
        "photo": [
            { "file_id": format!("{file_unique_id}-small"), "file_unique_id": format!("{file_unique_id}s"), "width": 90, "height": 90 },
            { "file_id": format!("fid-{file_unique_id}"), "file_unique_id": file_unique_id, "width": 1280, "height": 960, "file_size": 2048 }
        ]
    });
    if let Some(caption) = caption {
        message["caption"] = json!(caption);
    }
    if let Some(group) = media_group_id {
        message["media_group_id"] = json!(group);
    }
    message
}

pub fn new_update(message: Value) -> Update {
    serde_json::from_value(json!({ "update_id": 1, "message": message })).unwrap()
}

pub fn edited_update(message: Value) -> Update {
    serde_json::from_value(json!({ "update_id": 2, "edited_message": message })).unwrap()
}

/// Minimal valid row for direct store tests
pub fn new_message(telegram_message_id: i64, file_unique_id: &str) -> NewMessage {
    NewMessage {
        telegram_message_id,
        chat_id: -1001,
        chat_type: Some("supergroup".to_string()),
        file_unique_id: file_unique_id.to_string(),
        file_id: format!("fid-{file_unique_id}"),
        storage_path: format!("{file_unique_id}.jpg"),
        public_url: format!("https://cdn.test/telegram-media/{file_unique_id}.jpg"),
        mime_type: Some("image/jpeg".to_string()),
        ..NewMessage::default()
    }
}
