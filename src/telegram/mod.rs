//! Telegram Bot API integration
//!
//! Inbound webhook payloads are parsed in [`types`]; outbound file fetches
//! go through [`client::TelegramClient`].

pub mod client;
pub mod types;

pub use client::{classify_api_error, DownloadedFile, TelegramClient};
pub use types::{EventKind, FileRef, InboundEvent, MediaAttachment, MediaKind, MessageContent, TgMessage, Update};
