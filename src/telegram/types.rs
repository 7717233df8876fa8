//! Telegram Bot API request/response types and inbound classification

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::media::default_mime_for;

/// Telegram Bot API base URL
pub const API_BASE: &str = "https://api.telegram.org";

/// Webhook update envelope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Update {
    /// Update sequence number
    pub update_id: i64,
    /// New incoming message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<TgMessage>,
    /// Edited message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_message: Option<TgMessage>,
    /// New channel post
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_post: Option<TgMessage>,
    /// Edited channel post
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_channel_post: Option<TgMessage>,
}

/// Telegram chat
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chat {
    /// Chat id
    pub id: i64,
    /// private, group, supergroup or channel
    #[serde(rename = "type", default)]
    pub chat_type: Option<String>,
    /// Title for groups and channels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Message sender
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    /// User id
    pub id: i64,
    /// Whether the sender is a bot
    #[serde(default)]
    pub is_bot: bool,
    /// Username without the leading @
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Telegram message as delivered by the webhook
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TgMessage {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<User>,
    #[serde(default)]
    pub date: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<Vec<PhotoSize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<Video>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<Audio>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<Voice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation: Option<Animation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sticker: Option<Sticker>,
}

/// One resolution of a photo
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub file_unique_id: String,
    pub width: i64,
    pub height: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
}

/// Video file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Video {
    pub file_id: String,
    pub file_unique_id: String,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
    #[serde(default)]
    pub duration: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
}

/// Animation (GIF or silent H.264 video)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Animation {
    pub file_id: String,
    pub file_unique_id: String,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
    #[serde(default)]
    pub duration: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
}

/// General file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    pub file_id: String,
    pub file_unique_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
}

/// Music file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Audio {
    pub file_id: String,
    pub file_unique_id: String,
    #[serde(default)]
    pub duration: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
}

/// Voice note
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Voice {
    pub file_id: String,
    pub file_unique_id: String,
    #[serde(default)]
    pub duration: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
}

/// Sticker
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sticker {
    pub file_id: String,
    pub file_unique_id: String,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
    #[serde(default)]
    pub is_animated: bool,
    #[serde(default)]
    pub is_video: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
}

/// Telegram API response wrapper
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<u16>,
}

/// File metadata from a `getFile` response
#[derive(Debug, Clone, Deserialize)]
pub struct TgFile {
    pub file_id: String,
    #[serde(default)]
    pub file_unique_id: Option<String>,
    #[serde(default)]
    pub file_size: Option<i64>,
    pub file_path: Option<String>,
}

/// Kinds of media the service stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
    Document,
    Audio,
    Voice,
    Animation,
    Sticker,
}

impl MediaKind {
    /// Lowercase label used in logs and metrics
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Document => "document",
            Self::Audio => "audio",
            Self::Voice => "voice",
            Self::Animation => "animation",
            Self::Sticker => "sticker",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to fetch and describe one media file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub kind: MediaKind,
    pub file_id: String,
    pub file_unique_id: String,
    pub mime_type: String,
    pub file_size: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration: Option<i64>,
}

/// Media carried by a message
#[derive(Debug, Clone)]
pub enum MediaAttachment {
    /// Photo; the largest size is kept
    Photo(PhotoSize),
    Video(Video),
    Document(Document),
    Audio(Audio),
    Voice(Voice),
    Animation(Animation),
    Sticker(Sticker),
}

impl MediaAttachment {
    /// Kind of this attachment
    #[must_use]
    pub const fn kind(&self) -> MediaKind {
        match self {
            Self::Photo(_) => MediaKind::Photo,
            Self::Video(_) => MediaKind::Video,
            Self::Document(_) => MediaKind::Document,
            Self::Audio(_) => MediaKind::Audio,
            Self::Voice(_) => MediaKind::Voice,
            Self::Animation(_) => MediaKind::Animation,
            Self::Sticker(_) => MediaKind::Sticker,
        }
    }

    /// Flatten into a [`FileRef`], filling in a default MIME type
    #[must_use]
    pub fn file_ref(&self) -> FileRef {
        let kind = self.kind();
        let mime = |reported: &Option<String>| {
            reported
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| default_mime_for(kind).to_string())
        };

        match self {
            Self::Photo(p) => FileRef {
                kind,
                file_id: p.file_id.clone(),
                file_unique_id: p.file_unique_id.clone(),
                mime_type: default_mime_for(kind).to_string(),
                file_size: p.file_size,
                width: Some(p.width),
                height: Some(p.height),
                duration: None,
            },
            Self::Video(v) => FileRef {
                kind,
                file_id: v.file_id.clone(),
                file_unique_id: v.file_unique_id.clone(),
                mime_type: mime(&v.mime_type),
                file_size: v.file_size,
                width: Some(v.width),
                height: Some(v.height),
                duration: Some(v.duration),
            },
            Self::Animation(a) => FileRef {
                kind,
                file_id: a.file_id.clone(),
                file_unique_id: a.file_unique_id.clone(),
                mime_type: mime(&a.mime_type),
                file_size: a.file_size,
                width: Some(a.width),
                height: Some(a.height),
                duration: Some(a.duration),
            },
            Self::Document(d) => FileRef {
                kind,
                file_id: d.file_id.clone(),
                file_unique_id: d.file_unique_id.clone(),
                mime_type: mime(&d.mime_type),
                file_size: d.file_size,
                width: None,
                height: None,
                duration: None,
            },
            Self::Audio(a) => FileRef {
                kind,
                file_id: a.file_id.clone(),
                file_unique_id: a.file_unique_id.clone(),
                mime_type: mime(&a.mime_type),
                file_size: a.file_size,
                width: None,
                height: None,
                duration: Some(a.duration),
            },
            Self::Voice(v) => FileRef {
                kind,
                file_id: v.file_id.clone(),
                file_unique_id: v.file_unique_id.clone(),
                mime_type: mime(&v.mime_type),
                file_size: v.file_size,
                width: None,
                height: None,
                duration: Some(v.duration),
            },
            Self::Sticker(s) => {
                let mime_type = if s.is_video {
                    "video/webm"
                } else if s.is_animated {
                    "application/x-tgsticker"
                } else {
                    default_mime_for(kind)
                };
                FileRef {
                    kind,
                    file_id: s.file_id.clone(),
                    file_unique_id: s.file_unique_id.clone(),
                    mime_type: mime_type.to_string(),
                    file_size: s.file_size,
                    width: Some(s.width),
                    height: Some(s.height),
                    duration: None,
                }
            }
        }
    }
}

/// What a message carries
#[derive(Debug, Clone)]
pub enum MessageContent {
    Media(MediaAttachment),
    Text(String),
    Unknown,
}

impl TgMessage {
    /// Classify the message body
    #[must_use]
    pub fn content(&self) -> MessageContent {
        if let Some(largest) = self
            .photo
            .as_ref()
            .and_then(|sizes| sizes.iter().max_by_key(|p| (p.width.saturating_mul(p.height), p.file_size.unwrap_or(0))))
        {
            return MessageContent::Media(MediaAttachment::Photo(largest.clone()));
        }
        if let Some(video) = &self.video {
            return MessageContent::Media(MediaAttachment::Video(video.clone()));
        }
        if let Some(animation) = &self.animation {
            return MessageContent::Media(MediaAttachment::Animation(animation.clone()));
        }
        if let Some(document) = &self.document {
            return MessageContent::Media(MediaAttachment::Document(document.clone()));
        }
        if let Some(audio) = &self.audio {
            return MessageContent::Media(MediaAttachment::Audio(audio.clone()));
        }
        if let Some(voice) = &self.voice {
            return MessageContent::Media(MediaAttachment::Voice(voice.clone()));
        }
        if let Some(sticker) = &self.sticker {
            return MessageContent::Media(MediaAttachment::Sticker(sticker.clone()));
        }
        match &self.text {
            Some(text) => MessageContent::Text(text.clone()),
            None => MessageContent::Unknown,
        }
    }

    /// Caption with surrounding whitespace removed; empty captions are `None`
    #[must_use]
    pub fn trimmed_caption(&self) -> Option<String> {
        self.caption
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(ToString::to_string)
    }
}

/// Whether an update announces something new or an edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    New,
    Edited,
}

/// The message an update is about
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub kind: EventKind,
    pub message: TgMessage,
}

impl InboundEvent {
    /// Extract the single message an update carries
    #[must_use]
    pub fn from_update(update: Update) -> Option<Self> {
        if let Some(message) = update.message.or(update.channel_post) {
            return Some(Self {
                kind: EventKind::New,
                message,
            });
        }
        update
            .edited_message
            .or(update.edited_channel_post)
            .map(|message| Self {
                kind: EventKind::Edited,
                message,
            })
    }
}
