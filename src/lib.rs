//! Media Ingest - Telegram media ingestion and self-repair
//!
//! A Rust library that receives Telegram bot webhook updates, stores media
//! in object storage under content-addressed keys, and keeps the message
//! table consistent.
//!
//! # Features
//!
//! - Deduplicated storage keyed by `file_unique_id`
//! - Bounded-retry Telegram downloads and storage uploads
//! - Processing state machine with stall recovery
//! - Media group (album) caption synchronisation
//! - Repair jobs for storage drift, broken groups and stuck messages

/// Append-only audit logging
pub mod audit;
/// Store-side aggregate capabilities
pub mod capabilities;
/// Configuration management
pub mod config;
/// Database operations and connection pooling
pub mod db;
/// Webhook and management entry point
pub mod dispatcher;
/// Telegram download plus storage upload
pub mod downloader;
/// Duplicate detection
pub mod duplicate;
/// Error types
pub mod error;
/// Logging setup and utilities
pub mod logging;
/// MIME types and storage keys
pub mod media;
/// Media group synchronisation
pub mod media_group;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Repair and validation jobs
pub mod repair;
/// Message persistence
pub mod repository;
/// Bounded retry driver
pub mod retry;
/// Database schema definitions
pub mod schema;
/// HTTP endpoints
pub mod server;
/// Processing state machine
pub mod state;
/// Object storage backends
pub mod storage;
/// Telegram Bot API client and types
pub mod telegram;
/// Outbound request pacing
pub mod throttle;
/// Input validation and sanitization
pub mod validation;

// Re-export key components for easier access
pub use config::AppConfig;
pub use db::Database;
pub use dispatcher::{ManagementAction, ManagementRequest, ManagementResponse, WebhookDispatcher};
pub use error::{IngestError, Result};
pub use models::{Message, OperationResult, ProcessingState};
pub use repository::MessageStore;
