use crate::dispatcher::{ManagementAction, ManagementRequest};
use crate::error::{IngestError, Result};
use crate::media::normalize_mime;
use crate::models::NewMessage;
use crate::repair::RepairMode;

const MAX_FILE_UNIQUE_ID_LEN: usize = 128;
const MAX_CAPTION_LEN: usize = 4096;

fn invalid(message: impl Into<String>) -> IngestError {
    IngestError::Validation(message.into())
}

/// Validation utilities for input sanitization and edge case handling
#[derive(Debug, Copy, Clone)]
pub struct InputValidator;

impl InputValidator {
    /// Validate the fields a media message must have before it is stored
    pub fn validate_new_message(message: &NewMessage) -> Result<()> {
        Self::validate_file_unique_id(&message.file_unique_id)?;

        if message.chat_id == 0 {
            return Err(invalid("chat_id is required"));
        }
        if message.telegram_message_id <= 0 {
            return Err(invalid("telegram_message_id must be positive"));
        }
        if message.file_id.trim().is_empty() {
            return Err(invalid("file_id is required"));
        }
        if message.storage_path.trim().is_empty() {
            return Err(invalid("storage_path is required"));
        }
        if message.public_url.trim().is_empty() {
            return Err(invalid("public_url is required"));
        }
        if let Some(mime) = &message.mime_type {
            Self::validate_mime_type(mime)?;
        }
        if message.is_duplicate && message.duplicate_reference_id.is_none() {
            return Err(invalid("duplicate messages must reference their owner"));
        }
        if let Some(caption) = &message.caption {
            if caption.chars().count() > MAX_CAPTION_LEN {
                return Err(invalid(format!("Caption too long (max {MAX_CAPTION_LEN} characters)")));
            }
        }

        Ok(())
    }

    /// Validate a Telegram content key
    pub fn validate_file_unique_id(file_unique_id: &str) -> Result<()> {
        if file_unique_id.trim().is_empty() {
            return Err(invalid("file_unique_id is required"));
        }

        if file_unique_id.len() > MAX_FILE_UNIQUE_ID_LEN {
            return Err(invalid(format!(
                "file_unique_id too long (max {MAX_FILE_UNIQUE_ID_LEN} characters)"
            )));
        }

        // Telegram ids are URL-safe base64; anything else would escape the storage key
        if !file_unique_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid("file_unique_id contains invalid characters"));
        }

        Ok(())
    }

    /// Validate a `type/subtype` MIME string
    pub fn validate_mime_type(mime_type: &str) -> Result<()> {
        let mime = normalize_mime(mime_type);
        let Some((kind, subtype)) = mime.split_once('/') else {
            return Err(invalid(format!("Invalid MIME type: {mime_type}")));
        };

        let token = |s: &str| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.' | '_'))
        };
        if !token(kind) || !token(subtype) {
            return Err(invalid(format!("Invalid MIME type: {mime_type}")));
        }

        Ok(())
    }

    /// Validate batch size for processing
    pub fn validate_batch_limit(limit: usize, max: usize) -> Result<()> {
        if limit == 0 {
            return Err(invalid("Batch limit must be greater than 0"));
        }

        if limit > max {
            return Err(invalid(format!("Batch limit too large (max {max})")));
        }

        Ok(())
    }

    /// Validate a management request before dispatching it
    pub fn validate_management_request(request: &ManagementRequest, max_limit: usize) -> Result<()> {
        if let Some(limit) = request.limit {
            Self::validate_batch_limit(limit, max_limit)?;
        }

        if let Some(ids) = &request.message_ids {
            if ids.len() > max_limit {
                return Err(invalid(format!("Too many message ids (max {max_limit})")));
            }
            if ids.iter().any(|id| id.trim().is_empty()) {
                return Err(invalid("Message ids cannot be empty"));
            }
        }

        if request.action == ManagementAction::RepairMediaGroups {
            let mode = RepairMode::from_request(request)?;
            if let RepairMode::Specific { media_group_id, .. } = &mode {
                if media_group_id.trim().is_empty() {
                    return Err(invalid("mediaGroupId is required for specific group repair"));
                }
            }
        }

        Ok(())
    }

    /// Sanitize caption or message text
    #[must_use]
    pub fn sanitize_text(text: &str) -> String {
        text.chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t' || *c == '\r')
            .collect::<String>()
            .trim()
            .to_string()
    }

    /// Validate database URL
    pub fn validate_database_url(url: &str) -> Result<()> {
        if url.trim().is_empty() {
            return Err(invalid("Database URL cannot be empty"));
        }

        if url.len() > 1000 {
            return Err(invalid("Database URL too long"));
        }

        Ok(())
    }
}
