mod common;

use chrono::{Duration, Utc};
use serde_json::json;

use common::{mount_file, new_message, test_dispatcher};
use media_ingest::media_group::SyncOptions;
use media_ingest::models::{AuditEventType, NewMessage, ProcessingState};
use media_ingest::repair::{
    RepairMode, ERROR_RESET_REASON, MISSING_OBJECT_REASON, MISSING_PATH_REASON, PATH_MISMATCH_REASON,
};
use media_ingest::state::{TransitionRequest, STALLED_RESET_REASON};
use media_ingest::{ManagementAction, ManagementRequest};

fn pending(tg_id: i64, file_unique_id: &str) -> NewMessage {
    NewMessage {
        processing_state: Some(ProcessingState::Pending),
        ..new_message(tg_id, file_unique_id)
    }
}

fn grouped(tg_id: i64, file_unique_id: &str, caption: Option<&str>) -> NewMessage {
    NewMessage {
        media_group_id: Some("G".to_string()),
        caption: caption.map(ToString::to_string),
        is_original_caption: caption.is_some(),
        ..pending(tg_id, file_unique_id)
    }
}

#[tokio::test]
async fn stalled_processing_is_reset_to_pending() {
    let (_dir, _server, _storage, dispatcher) = test_dispatcher().await;
    let store = dispatcher.store();
    let stalled = store.create(pending(1, "F1"), "c").unwrap().into_message().id;
    let recent = store.create(pending(2, "F2"), "c").unwrap().into_message().id;
    store.begin_processing(&stalled, "c").unwrap();
    store.begin_processing(&recent, "c").unwrap();

    let mut message = store.get(&stalled).unwrap();
    message.processing_started_at = Some(Utc::now() - Duration::minutes(45));
    store.db().save_message(&mut message).unwrap();

    let report = dispatcher.repair().repair_processing_flow(None, 100, "c").await.unwrap();
    assert_eq!(report.stalled_reset, 1);
    assert_eq!(report.before.stalled, 1);
    assert_eq!(report.after.stalled, 0);

    let reset = store.get(&stalled).unwrap();
    assert_eq!(reset.processing_state, ProcessingState::Pending);
    assert_eq!(reset.retry_count, 1);
    assert_eq!(reset.error_message.as_deref(), Some(STALLED_RESET_REASON));
    assert_eq!(store.get(&recent).unwrap().processing_state, ProcessingState::Processing);

    let audit = store.db().audit_entries("processing_flow").unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].event_type, AuditEventType::ProcessingFlowRepaired);
}

#[tokio::test]
async fn targeted_flow_repair_resets_errors_and_queues_captioned_messages() {
    let (_dir, _server, _storage, dispatcher) = test_dispatcher().await;
    let store = dispatcher.store();
    let failed = store.create(pending(1, "F1"), "c").unwrap().into_message().id;
    store.mark_error(&failed, "download failed", "c").unwrap();

    let captioned = NewMessage {
        caption: Some("Desk".to_string()),
        is_original_caption: true,
        ..new_message(2, "F2")
    };
    let initialized = store.create(captioned, "c").unwrap().into_message().id;
    let untouched = store.create(pending(3, "F3"), "c").unwrap().into_message().id;
    store.mark_error(&untouched, "other failure", "c").unwrap();

    let ids = vec![failed.clone(), initialized.clone()];
    let report = dispatcher
        .repair()
        .repair_processing_flow(Some(&ids), 100, "c")
        .await
        .unwrap();
    assert_eq!(report.errors_reset, 1);
    assert_eq!(report.initialized_queued, 1);

    let failed = store.get(&failed).unwrap();
    assert_eq!(failed.processing_state, ProcessingState::Pending);
    assert_eq!(failed.error_message.as_deref(), Some(ERROR_RESET_REASON));
    assert_eq!(failed.retry_count, 2);
    assert_eq!(store.get(&initialized).unwrap().processing_state, ProcessingState::Pending);
    assert_eq!(store.get(&untouched).unwrap().processing_state, ProcessingState::Error);
}

#[tokio::test]
async fn orphaned_duplicates_are_promoted() {
    let (_dir, _server, _storage, dispatcher) = test_dispatcher().await;
    let store = dispatcher.store();
    let orphan = NewMessage {
        is_duplicate: true,
        duplicate_reference_id: Some("deleted-owner".to_string()),
        ..pending(1, "F1")
    };
    let id = store.create(orphan, "c").unwrap().into_message().id;

    let report = dispatcher.repair().repair_processing_flow(None, 100, "c").await.unwrap();
    assert_eq!(report.orphans_promoted, 1);

    let promoted = store.get(&id).unwrap();
    assert!(!promoted.is_duplicate);
    assert!(promoted.duplicate_reference_id.is_none());
    assert!(promoted.needs_redownload);
}

#[tokio::test]
async fn validation_restores_missing_storage_path() {
    let (_dir, _server, _storage, dispatcher) = test_dispatcher().await;
    let store = dispatcher.store();
    let id = store.create(pending(1, "ABC"), "c").unwrap().into_message().id;
    let mut message = store.get(&id).unwrap();
    message.storage_path = None;
    message.public_url = None;
    store.db().save_message(&mut message).unwrap();

    let report = dispatcher.repair().validate_storage_files(100, true, "c").await.unwrap();
    assert_eq!(report.missing_path, 1);
    assert_eq!(report.flagged_message_ids, vec![id.clone()]);

    let repaired = store.get(&id).unwrap();
    assert_eq!(repaired.storage_path.as_deref(), Some("ABC.jpg"));
    assert_eq!(repaired.public_url.as_deref(), Some("https://cdn.test/telegram-media/ABC.jpg"));
    assert!(repaired.needs_redownload);
    assert_eq!(repaired.redownload_reason.as_deref(), Some(MISSING_PATH_REASON));
}

#[tokio::test]
async fn validation_flags_missing_objects_and_caches_results() {
    let (_dir, _server, storage, dispatcher) = test_dispatcher().await;
    let store = dispatcher.store();
    let present = store.create(pending(1, "F1"), "c").unwrap().into_message().id;
    let missing = store.create(pending(2, "F2"), "c").unwrap().into_message().id;
    storage.put("F1.jpg", b"bytes");

    let report = dispatcher.repair().validate_storage_files(100, true, "c").await.unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.valid, 1);
    assert_eq!(report.missing_object, 1);

    assert!(!store.get(&present).unwrap().needs_redownload);
    let flagged = store.get(&missing).unwrap();
    assert!(flagged.needs_redownload);
    assert_eq!(flagged.redownload_reason.as_deref(), Some(MISSING_OBJECT_REASON));

    assert!(store.db().get_storage_validation("F1").unwrap().unwrap().is_valid);
    assert!(!store.db().get_storage_validation("F2").unwrap().unwrap().is_valid);

    let audit = store.db().audit_entries("storage").unwrap();
    assert_eq!(audit[0].event_type, AuditEventType::StorageValidated);
}

#[tokio::test]
async fn mismatched_paths_are_rewritten() {
    let (_dir, _server, _storage, dispatcher) = test_dispatcher().await;
    let store = dispatcher.store();
    let wrong = NewMessage {
        storage_path: "uploads/photo.png".to_string(),
        ..pending(1, "F1")
    };
    let id = store.create(wrong, "c").unwrap().into_message().id;
    store.create(pending(2, "F2"), "c").unwrap();

    let report = dispatcher.repair().repair_storage_paths(100, "c").unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.repaired_message_ids, vec![id.clone()]);

    let repaired = store.get(&id).unwrap();
    assert_eq!(repaired.storage_path.as_deref(), Some("F1.jpg"));
    assert_eq!(repaired.redownload_reason.as_deref(), Some(PATH_MISMATCH_REASON));

    let again = dispatcher.repair().repair_storage_paths(100, "c").unwrap();
    assert_eq!(again.repaired, 0);
}

#[tokio::test]
async fn duplicates_with_a_copied_bad_path_are_rewritten() {
    let (_dir, _server, _storage, dispatcher) = test_dispatcher().await;
    let store = dispatcher.store();
    let wrong = NewMessage {
        storage_path: "uploads/photo.png".to_string(),
        ..pending(1, "F1")
    };
    let owner = store.create(wrong, "c").unwrap().into_message();
    let snapshot = owner.owner_snapshot().unwrap();
    let duplicate = store
        .create_duplicate(pending(2, "F1"), &snapshot, "c")
        .unwrap()
        .into_message();
    assert_eq!(duplicate.storage_path.as_deref(), Some("uploads/photo.png"));

    let report = dispatcher.repair().repair_storage_paths(100, "c").unwrap();
    assert_eq!(report.repaired, 2);
    assert!(report.failures.is_empty());

    assert_eq!(store.get(&owner.id).unwrap().storage_path.as_deref(), Some("F1.jpg"));
    let duplicate = store.get(&duplicate.id).unwrap();
    assert!(duplicate.is_duplicate);
    assert_eq!(duplicate.storage_path.as_deref(), Some("F1.jpg"));
    assert_eq!(duplicate.public_url.as_deref(), Some("https://cdn.test/telegram-media/F1.jpg"));

    let audit = store.db().audit_entries("storage_paths").unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].event_type, AuditEventType::StoragePathRepaired);
}

#[tokio::test]
async fn full_and_standard_group_repair_converge() {
    let (_dir, _server, _storage, dispatcher) = test_dispatcher().await;
    let store = dispatcher.store();
    let x = store.create(grouped(1, "FX", Some("Widget")), "c").unwrap().into_message().id;
    let y = store.create(grouped(2, "FY", None), "c").unwrap().into_message().id;
    store
        .transition_state(&x, TransitionRequest::completed(json!({ "product": "Widget" })), "c")
        .unwrap();

    let standard = dispatcher
        .repair()
        .repair_media_groups(&RepairMode::Standard, SyncOptions::default(), 100, "c")
        .await
        .unwrap();
    assert_eq!(standard.fixed_count, 1);
    let y_after = store.get(&y).unwrap();
    assert_eq!(y_after.processing_state, ProcessingState::Completed);
    assert_eq!(y_after.message_caption_id.as_deref(), Some(x.as_str()));

    let again = dispatcher
        .repair()
        .repair_media_groups(&RepairMode::Standard, SyncOptions::default(), 100, "c")
        .await
        .unwrap();
    assert_eq!(again.fixed_count, 0);

    let full = dispatcher
        .repair()
        .repair_media_groups(&RepairMode::Full, SyncOptions::default(), 100, "c")
        .await
        .unwrap();
    assert_eq!(full.fixed_count, 0);
    assert!(full.groups.is_empty());
}

#[tokio::test]
async fn specific_group_repair_checks_membership() {
    let (_dir, _server, _storage, dispatcher) = test_dispatcher().await;
    let store = dispatcher.store();
    let x = store.create(grouped(1, "FX", Some("Widget")), "c").unwrap().into_message().id;
    store.create(grouped(2, "FY", None), "c").unwrap();
    let outsider = store.create(pending(3, "FO"), "c").unwrap().into_message().id;
    store
        .transition_state(&x, TransitionRequest::completed(json!({ "product": "Widget" })), "c")
        .unwrap();

    let wrong_source = RepairMode::Specific {
        media_group_id: "G".to_string(),
        source_message_id: Some(outsider),
    };
    assert!(dispatcher
        .repair()
        .repair_media_groups(&wrong_source, SyncOptions::default(), 100, "c")
        .await
        .is_err());

    let elected = RepairMode::Specific {
        media_group_id: "G".to_string(),
        source_message_id: None,
    };
    let report = dispatcher
        .repair()
        .repair_media_groups(&elected, SyncOptions::default(), 100, "c")
        .await
        .unwrap();
    assert_eq!(report.mode, "specific");
    assert_eq!(report.fixed_count, 1);
    assert_eq!(report.groups[0].source_message_id, x);

    let audit = store.db().audit_entries("G").unwrap();
    assert!(audit.iter().any(|e| e.event_type == AuditEventType::MediaGroupRepaired));
}

#[tokio::test]
async fn redownload_uses_a_fresh_file_id_from_the_group() {
    let (_dir, server, storage, dispatcher) = test_dispatcher().await;
    let store = dispatcher.store();
    mount_file(&server, "fid-fresh", b"fresh-bytes").await;

    let stale = store.create(grouped(1, "FR", None), "c").unwrap().into_message().id;
    let sibling = NewMessage {
        file_id: "fid-fresh".to_string(),
        ..grouped(2, "FR", None)
    };
    store.create(sibling, "c").unwrap();

    let mut message = store.get(&stale).unwrap();
    message.file_id_expires_at = Some(Utc::now() - Duration::hours(1));
    store.db().save_message(&mut message).unwrap();
    store.flag_for_redownload(&stale, MISSING_OBJECT_REASON, "c").unwrap();

    let report = dispatcher.repair().redownload(None, 10, "c").await.unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(report.succeeded, 1);
    assert!(report.results[0].used_group_file_id);

    let refreshed = store.get(&stale).unwrap();
    assert_eq!(refreshed.file_id, "fid-fresh");
    assert!(!refreshed.needs_redownload);
    assert!(refreshed.file_id_is_fresh(Utc::now()));
    assert_eq!(storage.get("FR.jpg").unwrap().0, b"fresh-bytes");
}

#[tokio::test]
async fn failed_redownload_is_reported_and_audited() {
    let (_dir, _server, _storage, dispatcher) = test_dispatcher().await;
    let store = dispatcher.store();
    let id = store.create(pending(1, "F1"), "c").unwrap().into_message().id;

    let ids = vec![id.clone()];
    let report = dispatcher.repair().redownload(Some(&ids), 10, "c").await.unwrap();
    assert_eq!(report.failed, 1);
    assert!(report.results[0].error.is_some());

    let audit = store.db().audit_entries(&id).unwrap();
    assert!(audit.iter().any(|e| e.event_type == AuditEventType::RedownloadFailed));
}

#[tokio::test]
async fn management_requests_report_data_or_errors() {
    let (_dir, _server, _storage, dispatcher) = test_dispatcher().await;

    let ok = dispatcher
        .handle_management(ManagementRequest::new(ManagementAction::RepairStoragePaths))
        .await;
    assert!(ok.success);
    assert_eq!(ok.data.unwrap()["repaired"], 0);

    let mut bad_mode = ManagementRequest::new(ManagementAction::RepairMediaGroups);
    bad_mode.options.mode = Some("sideways".to_string());
    let rejected = dispatcher.handle_management(bad_mode).await;
    assert!(!rejected.success);
    assert_eq!(rejected.error_code.as_deref(), Some("validation_error"));

    let mut too_many = ManagementRequest::new(ManagementAction::Validate);
    too_many.limit = Some(1_000_000);
    assert!(!dispatcher.handle_management(too_many).await.success);

    let mut missing_group = ManagementRequest::new(ManagementAction::RepairMediaGroups);
    missing_group.options.mode = Some("specific".to_string());
    let response = dispatcher.handle_management(missing_group).await;
    assert!(!response.success);
    assert!(response.error.unwrap().contains("mediaGroupId"));
}
