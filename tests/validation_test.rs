//! Comprehensive tests for validation.rs

use media_ingest::models::NewMessage;
use media_ingest::validation::InputValidator;
use media_ingest::{ManagementAction, ManagementRequest};

fn valid_message() -> NewMessage {
    NewMessage {
        telegram_message_id: 10,
        chat_id: -1001,
        file_unique_id: "AgADBAADq6cxG".to_string(),
        file_id: "AgACAgQAAxkBAAIB".to_string(),
        storage_path: "AgADBAADq6cxG.jpg".to_string(),
        public_url: "https://cdn.test/telegram-media/AgADBAADq6cxG.jpg".to_string(),
        mime_type: Some("image/jpeg".to_string()),
        ..NewMessage::default()
    }
}

#[test]
fn test_validate_new_message_valid() {
    assert!(InputValidator::validate_new_message(&valid_message()).is_ok());
}

#[test]
fn test_validate_new_message_zero_chat() {
    let message = NewMessage {
        chat_id: 0,
        ..valid_message()
    };
    assert!(InputValidator::validate_new_message(&message).is_err());
}

#[test]
fn test_validate_new_message_negative_message_id() {
    let message = NewMessage {
        telegram_message_id: -1,
        ..valid_message()
    };
    assert!(InputValidator::validate_new_message(&message).is_err());
}

#[test]
fn test_validate_new_message_blank_file_id() {
    let message = NewMessage {
        file_id: " ".to_string(),
        ..valid_message()
    };
    assert!(InputValidator::validate_new_message(&message).is_err());
}

#[test]
fn test_validate_new_message_missing_storage_fields() {
    let no_path = NewMessage {
        storage_path: String::new(),
        ..valid_message()
    };
    assert!(InputValidator::validate_new_message(&no_path).is_err());

    let no_url = NewMessage {
        public_url: String::new(),
        ..valid_message()
    };
    assert!(InputValidator::validate_new_message(&no_url).is_err());
}

#[test]
fn test_validate_new_message_duplicate_without_owner() {
    let message = NewMessage {
        is_duplicate: true,
        ..valid_message()
    };
    assert!(InputValidator::validate_new_message(&message).is_err());

    let linked = NewMessage {
        is_duplicate: true,
        duplicate_reference_id: Some("owner".to_string()),
        ..valid_message()
    };
    assert!(InputValidator::validate_new_message(&linked).is_ok());
}

#[test]
fn test_validate_new_message_caption_too_long() {
    let message = NewMessage {
        caption: Some("a".repeat(4097)),
        ..valid_message()
    };
    assert!(InputValidator::validate_new_message(&message).is_err());

    let at_limit = NewMessage {
        caption: Some("é".repeat(4096)),
        ..valid_message()
    };
    assert!(InputValidator::validate_new_message(&at_limit).is_ok());
}

#[test]
fn test_validate_file_unique_id_valid() {
    assert!(InputValidator::validate_file_unique_id("AQADxyz_-123").is_ok());
}

#[test]
fn test_validate_file_unique_id_empty() {
    assert!(InputValidator::validate_file_unique_id("").is_err());
    assert!(InputValidator::validate_file_unique_id("   ").is_err());
}

#[test]
fn test_validate_file_unique_id_path_characters() {
    assert!(InputValidator::validate_file_unique_id("../secret").is_err());
    assert!(InputValidator::validate_file_unique_id("a/b").is_err());
    assert!(InputValidator::validate_file_unique_id("a.b").is_err());
}

#[test]
fn test_validate_file_unique_id_too_long() {
    assert!(InputValidator::validate_file_unique_id(&"a".repeat(129)).is_err());
    assert!(InputValidator::validate_file_unique_id(&"a".repeat(128)).is_ok());
}

#[test]
fn test_validate_mime_type() {
    assert!(InputValidator::validate_mime_type("image/jpeg").is_ok());
    assert!(InputValidator::validate_mime_type("application/vnd.ms-excel").is_ok());
    assert!(InputValidator::validate_mime_type("IMAGE/PNG; charset=binary").is_ok());
    assert!(InputValidator::validate_mime_type("jpeg").is_err());
    assert!(InputValidator::validate_mime_type("image/").is_err());
    assert!(InputValidator::validate_mime_type("image/jp eg").is_err());
}

#[test]
fn test_validate_batch_limit() {
    assert!(InputValidator::validate_batch_limit(1, 1000).is_ok());
    assert!(InputValidator::validate_batch_limit(1000, 1000).is_ok());
    assert!(InputValidator::validate_batch_limit(0, 1000).is_err());
    assert!(InputValidator::validate_batch_limit(1001, 1000).is_err());
}

#[test]
fn test_validate_management_request_message_ids() {
    let mut request = ManagementRequest::new(ManagementAction::Redownload);
    request.message_ids = Some(vec!["a".to_string(), String::new()]);
    assert!(InputValidator::validate_management_request(&request, 100).is_err());

    request.message_ids = Some(vec!["a".to_string(); 101]);
    assert!(InputValidator::validate_management_request(&request, 100).is_err());

    request.message_ids = Some(vec!["a".to_string(), "b".to_string()]);
    assert!(InputValidator::validate_management_request(&request, 100).is_ok());
}

#[test]
fn test_validate_management_request_group_modes() {
    let mut request = ManagementRequest::new(ManagementAction::RepairMediaGroups);
    assert!(InputValidator::validate_management_request(&request, 100).is_ok());

    request.options.mode = Some("specific".to_string());
    assert!(InputValidator::validate_management_request(&request, 100).is_err());

    request.media_group_id = Some("G1".to_string());
    assert!(InputValidator::validate_management_request(&request, 100).is_ok());

    request.options.mode = Some("FULL".to_string());
    assert!(InputValidator::validate_management_request(&request, 100).is_ok());

    request.options.mode = Some("partial".to_string());
    assert!(InputValidator::validate_management_request(&request, 100).is_err());
}

#[test]
fn test_sanitize_text() {
    assert_eq!(InputValidator::sanitize_text("  hello\u{0}world  "), "helloworld");
    assert_eq!(InputValidator::sanitize_text("line one\nline two"), "line one\nline two");
    assert_eq!(InputValidator::sanitize_text("\u{7}"), "");
}

#[test]
fn test_validate_database_url() {
    assert!(InputValidator::validate_database_url("sqlite:data/media.db").is_ok());
    assert!(InputValidator::validate_database_url("").is_err());
    assert!(InputValidator::validate_database_url(&"x".repeat(1001)).is_err());
}
