/// Upload pass integration tests

use rbook_core::{AttendanceStatus, PendingSubmission};
use rbook_sync::{AttendanceKey, FailureKind, SubmitOutcome};
use rbook_test_utils::{class_ref, submission, test_config, TestStore};
use std::time::Duration;

fn key(slot: &str, date: &str) -> AttendanceKey {
    AttendanceKey {
        faculty_id: "fac-1".to_string(),
        date: date.to_string(),
        slot_id: slot.to_string(),
    }
}

#[tokio::test]
async fn test_six_rejections_drop_submission() {
    let test_store = TestStore::in_memory();
    let (engine, remote) = test_store.engine(test_config());
    let sub = submission("p1", "2024-01-10", AttendanceStatus::Present, 4);
    engine.queue().enqueue(&sub).unwrap();
    remote.fail_next_pushes(100, FailureKind::Rejection);

    for attempt in 1..=5 {
        engine.sync_pending_submissions().await.unwrap().unwrap();
        let stored = engine.queue().get(&sub.id).unwrap().unwrap();
        assert_eq!(stored.retry_count, attempt);
    }

    let report = engine.sync_pending_submissions().await.unwrap().unwrap();
    assert_eq!(report.failed, 1);
    assert!(engine.queue().list().unwrap().is_empty());
    assert_eq!(remote.push_calls(), 6);
}

#[tokio::test]
async fn test_network_failures_never_drop() {
    let test_store = TestStore::in_memory();
    let (engine, remote) = test_store.engine(test_config());
    let sub = submission("p1", "2024-01-10", AttendanceStatus::Present, 4);
    engine.queue().enqueue(&sub).unwrap();
    remote.fail_next_pushes(10, FailureKind::Network);

    for _ in 0..10 {
        engine.sync_pending_submissions().await.unwrap().unwrap();
    }
    let stored = engine.queue().get(&sub.id).unwrap().unwrap();
    assert_eq!(stored.retry_count, 0);

    let report = engine.sync_pending_submissions().await.unwrap().unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(engine.get_pending_count(), 0);
}

#[tokio::test]
async fn test_one_bad_item_does_not_block_others() {
    let test_store = TestStore::in_memory();
    let (engine, remote) = test_store.engine(test_config());
    engine
        .queue()
        .enqueue(&submission("p1", "2024-01-10", AttendanceStatus::Present, 2))
        .unwrap();
    engine
        .queue()
        .enqueue(&submission("p2", "2024-01-10", AttendanceStatus::Absent, 2))
        .unwrap();
    remote.fail_next_pushes(1, FailureKind::Rejection);

    let report = engine.sync_pending_submissions().await.unwrap().unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors.len(), 1);

    let left = engine.queue().list().unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].class.slot_id, "p1");
    assert!(remote.attendance(&key("p2", "2024-01-10")).is_some());
}

#[tokio::test]
async fn test_structurally_bad_records_discarded() {
    let test_store = TestStore::in_memory();
    let (engine, remote) = test_store.engine(test_config());

    let empty = PendingSubmission::new(class_ref("p1", "2024-01-10"), vec![]);
    engine.queue().enqueue(&empty).unwrap();
    test_store
        .store
        .conn()
        .execute(
            "INSERT INTO pending_submissions(id, data, slot_id, date, created_at)
             VALUES ('garbled', 'not json', 'p2', '2024-01-10', 1)",
            [],
        )
        .unwrap();

    let report = engine.sync_pending_submissions().await.unwrap().unwrap();
    assert_eq!(report.failed, 2);
    assert_eq!(report.synced, 0);
    assert_eq!(engine.get_pending_count(), 0);
    assert_eq!(remote.push_calls(), 0);
}

#[tokio::test]
async fn test_subject_recovered_by_name() {
    let test_store = TestStore::in_memory();
    let (engine, remote) = test_store.engine(test_config());
    remote.add_subject("data structures", "sub-42");

    let mut class = class_ref("p4", "2024-01-11");
    class.subject_id = None;
    let sub = PendingSubmission::new(class, submission("p4", "2024-01-11", AttendanceStatus::Leave, 3).marks);
    engine.queue().enqueue(&sub).unwrap();

    let report = engine.sync_pending_submissions().await.unwrap().unwrap();
    assert_eq!(report.synced, 1);
    let stored = remote.attendance(&key("p4", "2024-01-11")).unwrap();
    assert_eq!(stored.subject_id, "sub-42");
    assert_eq!(stored.counts.leave, 3);
    assert_eq!(stored.counts.total, 3);
}

#[tokio::test]
async fn test_last_writer_wins_remotely() {
    let test_store = TestStore::in_memory();
    let (engine, remote) = test_store.engine(test_config());

    let first = submission("p1", "2024-01-10", AttendanceStatus::Present, 3);
    engine.submit_attendance(first, true).await.unwrap();

    let second = submission("p1", "2024-01-10", AttendanceStatus::Absent, 3);
    engine.queue().enqueue(&second).unwrap();
    let report = engine.sync_pending_submissions().await.unwrap().unwrap();

    assert_eq!(report.conflicts, 1);
    assert_eq!(remote.attendance_count(), 1);
    let stored = remote.attendance(&key("p1", "2024-01-10")).unwrap();
    assert_eq!(stored.counts.absent, 3);
    assert_eq!(stored.counts.present, 0);
}

#[tokio::test]
async fn test_online_submit_retires_queued_copy() {
    let test_store = TestStore::in_memory();
    let (engine, remote) = test_store.engine(test_config());

    engine
        .submit_attendance(submission("p1", "2024-01-10", AttendanceStatus::Present, 2), false)
        .await
        .unwrap();
    assert_eq!(engine.get_pending_count(), 1);

    engine
        .submit_attendance(submission("p1", "2024-01-10", AttendanceStatus::Absent, 2), true)
        .await
        .unwrap();
    assert_eq!(engine.get_pending_count(), 0);

    engine.sync_pending_submissions().await.unwrap().unwrap();
    let stored = remote.attendance(&key("p1", "2024-01-10")).unwrap();
    assert_eq!(stored.counts.absent, 2);
}

#[tokio::test]
async fn test_status_after_upload() {
    let test_store = TestStore::in_memory();
    let (engine, remote) = test_store.engine(test_config());
    engine
        .queue()
        .enqueue(&submission("p1", "2024-01-10", AttendanceStatus::Present, 1))
        .unwrap();

    remote.set_offline(true);
    engine.sync_pending_submissions().await.unwrap().unwrap();
    let status = engine.get_sync_status();
    assert!(status.is_expired);
    assert_eq!(status.pending_count, 1);

    remote.set_offline(false);
    engine.sync_pending_submissions().await.unwrap().unwrap();
    let status = engine.get_sync_status();
    assert!(!status.is_expired);
    assert_eq!(status.pending_count, 0);
    assert_eq!(engine.get_cache_age("last_sync"), "Just now");
}

#[tokio::test]
async fn test_direct_submit_holds_off_upload_pass() {
    let test_store = TestStore::in_memory();
    let (engine, remote) = test_store.engine(test_config());
    engine
        .queue()
        .enqueue(&submission("p1", "2024-01-10", AttendanceStatus::Present, 3))
        .unwrap();
    remote.set_latency(Some(Duration::from_millis(50)));

    let submitter = engine.clone();
    let direct = tokio::spawn(async move {
        submitter
            .submit_attendance(submission("p1", "2024-01-10", AttendanceStatus::Absent, 3), true)
            .await
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(engine.sync_pending_submissions().await.is_none());
    let outcome = direct.await.unwrap().unwrap();
    assert_eq!(outcome, SubmitOutcome::Delivered { conflicts: 0 });

    let stored = remote.attendance(&key("p1", "2024-01-10")).unwrap();
    assert_eq!(stored.counts.absent, 3);
    assert_eq!(stored.counts.present, 0);
    assert_eq!(engine.get_pending_count(), 0);
}

#[tokio::test]
async fn test_submit_during_upload_pass_is_queued_and_wins() {
    let test_store = TestStore::in_memory();
    let (engine, remote) = test_store.engine(test_config());
    engine
        .queue()
        .enqueue(&submission("p1", "2024-01-10", AttendanceStatus::Present, 3))
        .unwrap();
    remote.set_latency(Some(Duration::from_millis(50)));

    let syncer = engine.clone();
    let pass = tokio::spawn(async move { syncer.sync_pending_submissions().await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let outcome = engine
        .submit_attendance(submission("p1", "2024-01-10", AttendanceStatus::Absent, 3), true)
        .await
        .unwrap();
    assert_eq!(outcome, SubmitOutcome::Queued);
    pass.await.unwrap().unwrap().unwrap();
    assert_eq!(engine.get_pending_count(), 1);

    remote.set_latency(None);
    engine.sync_pending_submissions().await.unwrap().unwrap();
    let stored = remote.attendance(&key("p1", "2024-01-10")).unwrap();
    assert_eq!(stored.counts.absent, 3);
    assert_eq!(engine.get_pending_count(), 0);
}

#[tokio::test]
async fn test_entry_superseded_mid_pass_is_not_pushed() {
    let test_store = TestStore::in_memory();
    let (engine, remote) = test_store.engine(test_config());
    engine
        .queue()
        .enqueue(&submission("p1", "2024-01-10", AttendanceStatus::Present, 2))
        .unwrap();
    engine
        .queue()
        .enqueue(&submission("p2", "2024-01-10", AttendanceStatus::Present, 2))
        .unwrap();
    remote.set_latency(Some(Duration::from_millis(50)));

    let syncer = engine.clone();
    let pass = tokio::spawn(async move { syncer.sync_pending_submissions().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    engine
        .submit_attendance(submission("p2", "2024-01-10", AttendanceStatus::Absent, 2), false)
        .await
        .unwrap();

    let report = pass.await.unwrap().unwrap().unwrap();
    assert_eq!(report.synced, 1);
    assert!(remote.attendance(&key("p2", "2024-01-10")).is_none());
    assert_eq!(engine.get_pending_count(), 1);

    remote.set_latency(None);
    engine.sync_pending_submissions().await.unwrap().unwrap();
    let stored = remote.attendance(&key("p2", "2024-01-10")).unwrap();
    assert_eq!(stored.counts.absent, 2);
}

