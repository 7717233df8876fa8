mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use serde_json::json;

use common::{new_message, test_store};
use media_ingest::models::{AuditEventType, NewMessage, ProcessingState};
use media_ingest::repository::{CreateOutcome, MediaEdit, TransitionOutcome};
use media_ingest::state::TransitionRequest;
use media_ingest::IngestError;

fn pending(tg_id: i64, file_unique_id: &str) -> NewMessage {
    NewMessage {
        processing_state: Some(ProcessingState::Pending),
        caption: Some("Widget".to_string()),
        is_original_caption: true,
        ..new_message(tg_id, file_unique_id)
    }
}

#[test]
fn create_rejects_invalid_input() {
    let (_dir, store) = test_store();

    let mut missing_fuid = new_message(1, "F1");
    missing_fuid.file_unique_id = String::new();
    assert!(matches!(store.create(missing_fuid, "c"), Err(IngestError::Validation(_))));

    let mut missing_chat = new_message(1, "F1");
    missing_chat.chat_id = 0;
    assert!(matches!(store.create(missing_chat, "c"), Err(IngestError::Validation(_))));

    let mut bad_key = new_message(1, "F1");
    bad_key.file_unique_id = "../etc".to_string();
    assert!(store.create(bad_key, "c").is_err());
}

#[test]
fn create_defaults_to_initialized_and_stamps_expiry() {
    let (_dir, store) = test_store();
    let outcome = store.create(new_message(1, "F1"), "corr-1").unwrap();

    let CreateOutcome::Created(message) = outcome else {
        panic!("expected a new row");
    };
    assert_eq!(message.processing_state, ProcessingState::Initialized);
    assert_eq!(message.correlation_id.as_deref(), Some("corr-1"));
    assert!(message.file_id_expires_at.is_some());

    let audit = store.db().audit_entries(&message.id).unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].event_type, AuditEventType::MessageCreated);
}

#[test]
fn same_telegram_message_is_stored_once() {
    let (_dir, store) = test_store();
    let first = store.create(pending(5, "F1"), "c").unwrap().into_message();

    let mut again = pending(5, "F1");
    again.caption = Some("different".to_string());
    let second = store.create(again, "c").unwrap();

    assert!(matches!(second, CreateOutcome::AlreadyExists(_)));
    assert_eq!(second.message().id, first.id);
    assert_eq!(store.get(&first.id).unwrap().caption.as_deref(), Some("Widget"));

    // Same message id in another chat is a different message
    let mut other_chat = pending(5, "F1");
    other_chat.chat_id = -2002;
    assert!(matches!(store.create(other_chat, "c").unwrap(), CreateOutcome::Created(_)));
}

#[test]
fn happy_path_reaches_completed() {
    let (_dir, store) = test_store();
    let id = store.create(pending(1, "F1"), "c").unwrap().into_message().id;

    let processing = store.begin_processing(&id, "c").unwrap().into_message();
    assert_eq!(processing.processing_state, ProcessingState::Processing);
    assert!(processing.processing_started_at.is_some());

    let completed = store
        .transition_state(&id, TransitionRequest::completed(json!({ "product": "Widget" })), "c")
        .unwrap()
        .into_message();
    assert_eq!(completed.processing_state, ProcessingState::Completed);
    assert!(completed.processing_completed_at.is_some());
    assert_eq!(completed.analyzed_content, Some(json!({ "product": "Widget" })));
}

#[test]
fn completion_without_analysis_is_rejected() {
    let (_dir, store) = test_store();
    let id = store.create(pending(1, "F1"), "c").unwrap().into_message().id;

    let err = store
        .transition_state(&id, TransitionRequest::to(ProcessingState::Completed), "c")
        .unwrap_err();
    assert!(matches!(err, IngestError::InvalidTransition(_)));
    assert_eq!(store.get(&id).unwrap().processing_state, ProcessingState::Pending);
}

#[test]
fn error_increments_retry_count_and_records_reason() {
    let (_dir, store) = test_store();
    let id = store.create(pending(1, "F1"), "c").unwrap().into_message().id;

    let failed = store.mark_error(&id, "download failed", "c").unwrap().into_message();
    assert_eq!(failed.processing_state, ProcessingState::Error);
    assert_eq!(failed.retry_count, 1);
    assert_eq!(failed.error_message.as_deref(), Some("download failed"));
    assert!(failed.last_error_at.is_some());

    let audit = store.db().audit_entries(&id).unwrap();
    let transition = audit
        .iter()
        .find(|e| e.event_type == AuditEventType::StateTransition)
        .unwrap();
    assert_eq!(transition.error_message.as_deref(), Some("download failed"));
}

#[test]
fn backwards_moves_need_an_explicit_reset() {
    let (_dir, store) = test_store();
    let id = store.create(pending(1, "F1"), "c").unwrap().into_message().id;
    store
        .transition_state(&id, TransitionRequest::completed(json!({ "a": 1 })), "c")
        .unwrap();

    assert!(store
        .transition_state(&id, TransitionRequest::to(ProcessingState::Pending), "c")
        .is_err());

    let reset = store.reset_to_pending(&id, "manual reset", "c").unwrap();
    assert_eq!(reset.processing_state, ProcessingState::Pending);
    assert_eq!(reset.retry_count, 1);
    assert_eq!(reset.error_message.as_deref(), Some("manual reset"));
    assert!(reset.processing_started_at.is_none());
}

#[test]
fn repeated_transition_is_a_noop_without_audit() {
    let (_dir, store) = test_store();
    let id = store.create(pending(1, "F1"), "c").unwrap().into_message().id;
    store
        .transition_state(&id, TransitionRequest::completed(json!({ "a": 1 })), "c")
        .unwrap();
    let before = store.db().audit_entries(&id).unwrap().len();

    let again = store
        .transition_state(&id, TransitionRequest::completed(json!({ "a": 1 })), "c")
        .unwrap();
    assert!(matches!(again, TransitionOutcome::NoOp(_)));
    assert_eq!(store.db().audit_entries(&id).unwrap().len(), before);

    // New content on the same state is recorded and the old one kept
    let updated = store
        .transition_state(&id, TransitionRequest::completed(json!({ "a": 2 })), "c")
        .unwrap()
        .into_message();
    assert_eq!(updated.old_analyzed_content, vec![json!({ "a": 1 })]);
    assert_eq!(store.db().audit_entries(&id).unwrap().len(), before + 1);
}

#[test]
fn each_transition_writes_one_audit_entry() {
    let (_dir, store) = test_store();
    let id = store.create(pending(1, "F1"), "c").unwrap().into_message().id;
    store.begin_processing(&id, "c").unwrap();
    store.mark_error(&id, "boom", "c").unwrap();

    let transitions = store
        .db()
        .audit_entries(&id)
        .unwrap()
        .into_iter()
        .filter(|e| e.event_type == AuditEventType::StateTransition)
        .count();
    assert_eq!(transitions, 2);
}

#[test]
fn edit_without_caption_change_keeps_analysis() {
    let (_dir, store) = test_store();
    let id = store.create(pending(1, "F1"), "c").unwrap().into_message().id;
    store
        .transition_state(&id, TransitionRequest::completed(json!({ "a": 1 })), "c")
        .unwrap();

    let edited = store
        .apply_edit(
            &id,
            MediaEdit {
                caption: Some("Widget".to_string()),
                ..MediaEdit::default()
            },
            "c",
        )
        .unwrap();
    assert!(edited.is_edited);
    assert_eq!(edited.edit_count, 1);
    assert_eq!(edited.processing_state, ProcessingState::Completed);
    assert_eq!(edited.analyzed_content, Some(json!({ "a": 1 })));
    assert!(edited.old_analyzed_content.is_empty());
}

#[test]
fn redownload_flag_is_idempotent() {
    let (_dir, store) = test_store();
    let id = store.create(pending(1, "F1"), "c").unwrap().into_message().id;

    store.flag_for_redownload(&id, "File missing from storage", "c").unwrap();
    let again = store.flag_for_redownload(&id, "File missing from storage", "c").unwrap();
    assert!(again.needs_redownload);
    let flags = store
        .db()
        .audit_entries(&id)
        .unwrap()
        .into_iter()
        .filter(|e| e.event_type == AuditEventType::MessageUpdated)
        .count();
    assert_eq!(flags, 1);

    let completed = store
        .complete_redownload(&id, "F1.jpg", "https://cdn.test/telegram-media/F1.jpg", "fid-new", "c")
        .unwrap();
    assert!(!completed.needs_redownload);
    assert!(completed.redownload_reason.is_none());
    assert!(completed.redownload_completed_at.is_some());
    assert_eq!(completed.file_id, "fid-new");
}

#[test]
fn unknown_message_is_not_found() {
    let (_dir, store) = test_store();
    assert!(matches!(store.get("nope"), Err(IngestError::MessageNotFound(_))));
    assert!(store.mark_error("nope", "x", "c").is_err());
}

#[test]
fn concurrent_identical_transitions_apply_once() {
    let (_dir, store) = test_store();

    for round in 0..20 {
        let id = store.create(pending(100 + round, "FC"), "c").unwrap().into_message().id;
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = store.clone();
                let barrier = Arc::clone(&barrier);
                let id = id.clone();
                thread::spawn(move || {
                    barrier.wait();
                    store.begin_processing(&id, "c").unwrap()
                })
            })
            .collect();
        let applied = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|outcome| matches!(outcome, TransitionOutcome::Applied(_)))
            .count();
        assert_eq!(applied, 1, "round {round}");

        let transitions = store
            .db()
            .audit_entries(&id)
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == AuditEventType::StateTransition)
            .count();
        assert_eq!(transitions, 1, "round {round}");
    }
}

#[test]
fn stale_row_version_is_not_written() {
    let (_dir, store) = test_store();
    let id = store.create(pending(1, "F1"), "c").unwrap().into_message().id;
    let mut first = store.get(&id).unwrap();
    let mut stale = first.clone();

    first.caption = Some("first writer".to_string());
    assert!(store.db().save_message_if_current(&mut first).unwrap());

    stale.caption = Some("second writer".to_string());
    assert!(!store.db().save_message_if_current(&mut stale).unwrap());
    assert_eq!(store.get(&id).unwrap().caption.as_deref(), Some("first writer"));
}
