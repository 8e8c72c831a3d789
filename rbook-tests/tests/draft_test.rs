/// Draft persistence tests

use rbook_core::{AttendanceStatus, StorageAdapter, StudentMark};
use rbook_sync::draft_key;
use rbook_test_utils::{submission, test_config, TestStore};
use std::time::Duration;

fn marks(n: usize) -> Vec<StudentMark> {
    (0..n)
        .map(|i| StudentMark::new(format!("s{}", i), AttendanceStatus::Absent))
        .collect()
}

#[tokio::test]
async fn test_draft_written_after_idle_period() {
    let test_store = TestStore::in_memory();
    let (engine, _remote) = test_store.engine(test_config());

    for n in 1..=5 {
        engine.save_draft_attendance("p2", "2024-02-01", marks(n));
    }
    assert!(test_store.store.get(&draft_key("p2", "2024-02-01")).unwrap().is_none());
    assert_eq!(engine.get_draft_attendance("p2", "2024-02-01").unwrap().marks.len(), 5);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(test_store.store.get(&draft_key("p2", "2024-02-01")).unwrap().is_some());
    assert_eq!(engine.get_draft_attendance("p2", "2024-02-01").unwrap().marks.len(), 5);
}

#[tokio::test]
async fn test_draft_survives_restart() {
    let test_store = TestStore::new();
    {
        let (engine, _remote) = test_store.engine(test_config());
        engine.save_draft_attendance("p3", "2024-02-01", marks(4));
        assert_eq!(engine.flush_drafts(), 1);
    }

    let test_store = test_store.reopen();
    let (engine, _remote) = test_store.engine(test_config());
    let draft = engine.get_draft_attendance("p3", "2024-02-01").unwrap();
    assert_eq!(draft.date, "2024-02-01");
    assert_eq!(draft.marks.len(), 4);
}

#[tokio::test]
async fn test_queued_submission_clears_draft() {
    let test_store = TestStore::in_memory();
    let (engine, remote) = test_store.engine(test_config());
    remote.set_offline(true);

    engine.save_draft_attendance("p1", "2024-01-10", marks(2));
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(engine.get_draft_attendance("p1", "2024-01-10").is_some());

    engine
        .submit_attendance(submission("p1", "2024-01-10", AttendanceStatus::Present, 2), true)
        .await
        .unwrap();
    assert!(engine.get_draft_attendance("p1", "2024-01-10").is_none());
    assert!(test_store.store.get(&draft_key("p1", "2024-01-10")).unwrap().is_none());
}

#[tokio::test]
async fn test_drafts_are_not_timestamped() {
    let test_store = TestStore::in_memory();
    let (engine, _remote) = test_store.engine(test_config());

    engine.save_draft_attendance("p5", "2024-01-10", marks(1));
    engine.flush_drafts();

    assert!(engine.cache().get_timestamp(&draft_key("p5", "2024-01-10")).is_none());
}

#[tokio::test]
async fn test_submission_clears_only_its_own_date() {
    let test_store = TestStore::in_memory();
    let (engine, _remote) = test_store.engine(test_config());

    engine.save_draft_attendance("p1", "2024-01-10", marks(3));
    engine.save_draft_attendance("p1", "2024-01-11", marks(2));
    assert_eq!(engine.flush_drafts(), 2);

    engine
        .submit_attendance(submission("p1", "2024-01-10", AttendanceStatus::Present, 3), false)
        .await
        .unwrap();

    assert!(engine.get_draft_attendance("p1", "2024-01-10").is_none());
    let next_day = engine.get_draft_attendance("p1", "2024-01-11").unwrap();
    assert_eq!(next_day.marks.len(), 2);
    assert!(test_store.store.get(&draft_key("p1", "2024-01-11")).unwrap().is_some());
}
