//! MIME type and storage path utilities
//!
//! Everything here is pure: the storage key of a file depends only on its
//! `file_unique_id` and MIME type, so any component can recompute it and
//! compare against what is stored.

use std::fmt;

use crate::telegram::types::MediaKind;

/// Extension used when nothing better can be derived from the MIME type
pub const FALLBACK_EXTENSION: &str = "bin";

const KNOWN_EXTENSIONS: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/jpg", "jpg"),
    ("image/pjpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/heic", "heic"),
    ("image/svg+xml", "svg"),
    ("video/mp4", "mp4"),
    ("video/quicktime", "mov"),
    ("video/webm", "webm"),
    ("video/x-matroska", "mkv"),
    ("video/x-msvideo", "avi"),
    ("audio/mpeg", "mp3"),
    ("audio/mp4", "m4a"),
    ("audio/ogg", "ogg"),
    ("audio/wav", "wav"),
    ("audio/x-wav", "wav"),
    ("text/plain", "txt"),
    ("text/csv", "csv"),
    ("application/pdf", "pdf"),
    ("application/zip", "zip"),
    ("application/json", "json"),
    ("application/msword", "doc"),
    ("application/vnd.openxmlformats-officedocument.wordprocessingml.document", "docx"),
    ("application/vnd.ms-excel", "xls"),
    ("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet", "xlsx"),
    ("application/x-tgsticker", "tgs"),
    ("application/octet-stream", FALLBACK_EXTENSION),
];

/// Normalise a MIME type: lowercase, parameters stripped
#[must_use]
pub fn normalize_mime(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// File extension for a MIME type.
///
/// Known types map through a fixed table; otherwise the subtype is used
/// (minus any `x-` prefix and `+suffix`) when it is a plain alphanumeric word.
#[must_use]
pub fn extension_for_mime(mime_type: Option<&str>) -> String {
    let Some(mime) = mime_type.map(normalize_mime).filter(|m| !m.is_empty()) else {
        return FALLBACK_EXTENSION.to_string();
    };

    if let Some((_, ext)) = KNOWN_EXTENSIONS.iter().find(|(known, _)| *known == mime) {
        return (*ext).to_string();
    }

    let subtype = mime.split_once('/').map(|(_, sub)| sub).unwrap_or_default();
    let subtype = subtype.strip_prefix("x-").unwrap_or(subtype);
    let subtype = subtype.split('+').next().unwrap_or_default();

    if !subtype.is_empty() && subtype.len() <= 10 && subtype.chars().all(|c| c.is_ascii_alphanumeric()) {
        subtype.to_string()
    } else {
        FALLBACK_EXTENSION.to_string()
    }
}

/// Deterministic object-storage key: `file_unique_id.ext`
#[must_use]
pub fn storage_path(file_unique_id: &str, mime_type: Option<&str>) -> String {
    format!("{file_unique_id}.{}", extension_for_mime(mime_type))
}

/// Whether `path` is exactly the key this file should be stored under
#[must_use]
pub fn is_expected_storage_path(path: Option<&str>, file_unique_id: &str, mime_type: Option<&str>) -> bool {
    path.is_some_and(|p| p == storage_path(file_unique_id, mime_type))
}

/// How browsers should treat the stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Render in the browser
    Inline,
    /// Offer as a download
    Attachment,
}

impl Disposition {
    /// Header token
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Attachment => "attachment",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inline for browser-viewable classes, attachment for everything else
#[must_use]
pub fn content_disposition(mime_type: Option<&str>) -> Disposition {
    let mime = mime_type.map(normalize_mime).unwrap_or_default();
    let viewable = ["image/", "video/", "audio/", "text/"]
        .iter()
        .any(|prefix| mime.starts_with(prefix))
        || mime == "application/pdf";

    if viewable {
        Disposition::Inline
    } else {
        Disposition::Attachment
    }
}

/// MIME type assumed when Telegram does not report one
#[must_use]
pub const fn default_mime_for(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Photo => "image/jpeg",
        MediaKind::Video | MediaKind::Animation => "video/mp4",
        MediaKind::Voice => "audio/ogg",
        MediaKind::Audio => "audio/mpeg",
        MediaKind::Sticker => "image/webp",
        MediaKind::Document => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_types_use_table() {
        assert_eq!(storage_path("F1", Some("image/jpeg")), "F1.jpg");
        assert_eq!(storage_path("F1", Some("video/quicktime")), "F1.mov");
        assert_eq!(storage_path("F1", Some("application/pdf")), "F1.pdf");
    }

    #[test]
    fn parameters_and_case_are_ignored() {
        assert_eq!(extension_for_mime(Some("Image/JPEG; charset=binary")), "jpg");
    }

    #[test]
    fn unknown_subtypes_fall_back() {
        assert_eq!(extension_for_mime(Some("image/x-icon")), "icon");
        assert_eq!(extension_for_mime(Some("application/ld+json")), "ld");
        assert_eq!(extension_for_mime(Some("garbage")), "bin");
        assert_eq!(extension_for_mime(None), "bin");
        assert_eq!(extension_for_mime(Some("application/vnd.some.very-long-thing")), "bin");
    }

    #[test]
    fn disposition_by_class() {
        assert_eq!(content_disposition(Some("image/png")), Disposition::Inline);
        assert_eq!(content_disposition(Some("text/plain")), Disposition::Inline);
        assert_eq!(content_disposition(Some("application/pdf")), Disposition::Inline);
        assert_eq!(content_disposition(Some("application/zip")), Disposition::Attachment);
        assert_eq!(content_disposition(None), Disposition::Attachment);
    }

    #[test]
    fn expected_path_check() {
        assert!(is_expected_storage_path(Some("F1.jpg"), "F1", Some("image/jpeg")));
        assert!(!is_expected_storage_path(Some("F1.png"), "F1", Some("image/jpeg")));
        assert!(!is_expected_storage_path(None, "F1", Some("image/jpeg")));
    }

    proptest! {
        #[test]
        fn storage_path_is_deterministic(id in "[A-Za-z0-9_-]{1,32}", mime in "(image|video|audio|application)/[a-z]{1,8}") {
            let first = storage_path(&id, Some(&mime));
            prop_assert_eq!(&first, &storage_path(&id, Some(&mime)));
            let prefix = format!("{id}.");
            prop_assert!(first.starts_with(&prefix));
        }

        #[test]
        fn only_extension_depends_on_mime(id in "[A-Za-z0-9_-]{1,32}", a in "image/[a-z]{1,8}", b in "video/[a-z]{1,8}") {
            let pa = storage_path(&id, Some(&a));
            let pb = storage_path(&id, Some(&b));
            prop_assert_eq!(pa.rsplit_once('.').map(|(stem, _)| stem.to_string()), pb.rsplit_once('.').map(|(stem, _)| stem.to_string()));
        }
    }
}
