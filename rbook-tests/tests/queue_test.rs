/// Pending queue integration tests
///
/// Dedup by (slot, date), ordering, persistence and corrupt rows.

use proptest::prelude::*;
use rbook_core::{AttendanceStatus, PendingQueue, QueueEntry};
use rbook_test_utils::{submission, TestStore};

#[test]
fn test_resubmission_supersedes() {
    let test_store = TestStore::new();
    let queue = PendingQueue::new(test_store.store.clone());

    let a = submission("p1", "2024-01-10", AttendanceStatus::Present, 3);
    let b = submission("p1", "2024-01-10", AttendanceStatus::Absent, 3);
    queue.enqueue(&a).unwrap();
    queue.enqueue(&b).unwrap();

    let listed = queue.list().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0], b);
}

#[test]
fn test_creation_order_kept() {
    let test_store = TestStore::in_memory();
    let queue = PendingQueue::new(test_store.store.clone());

    for slot in ["p3", "p1", "p2"] {
        queue
            .enqueue(&submission(slot, "2024-01-10", AttendanceStatus::Present, 1))
            .unwrap();
    }

    let slots: Vec<String> = queue
        .list()
        .unwrap()
        .into_iter()
        .map(|s| s.class.slot_id)
        .collect();
    assert_eq!(slots, vec!["p3", "p1", "p2"]);
}

#[test]
fn test_queue_persists_across_reopen() {
    let test_store = TestStore::new();
    let sub = submission("p1", "2024-01-10", AttendanceStatus::Od, 2);
    PendingQueue::new(test_store.store.clone()).enqueue(&sub).unwrap();

    let test_store = test_store.reopen();
    let queue = PendingQueue::new(test_store.store.clone());
    assert_eq!(queue.get(&sub.id).unwrap(), Some(sub));
}

#[test]
fn test_corrupt_row_listed_separately() {
    let test_store = TestStore::in_memory();
    let queue = PendingQueue::new(test_store.store.clone());
    queue
        .enqueue(&submission("p1", "2024-01-10", AttendanceStatus::Present, 1))
        .unwrap();
    test_store
        .store
        .conn()
        .execute(
            "INSERT INTO pending_submissions(id, data, slot_id, date, created_at)
             VALUES ('bad', '{\"truncated', 'p2', '2024-01-10', 0)",
            [],
        )
        .unwrap();

    let entries = queue.list_entries().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(matches!(&entries[0], QueueEntry::Corrupt { id, .. } if id == "bad"));
    assert_eq!(queue.list().unwrap().len(), 1);
}

fn status() -> impl Strategy<Value = AttendanceStatus> {
    prop_oneof![
        Just(AttendanceStatus::Present),
        Just(AttendanceStatus::Absent),
        Just(AttendanceStatus::Od),
        Just(AttendanceStatus::Leave),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// After every enqueue, each (slot, date) holds exactly one record and it
    /// is the most recent one.
    #[test]
    fn prop_one_record_per_key(
        ops in prop::collection::vec((0usize..3, 0usize..2, status(), 1usize..5), 1..25)
    ) {
        let test_store = TestStore::in_memory();
        let queue = PendingQueue::new(test_store.store.clone());
        let mut latest = std::collections::HashMap::new();

        for (slot, day, st, n) in ops {
            let slot = format!("p{}", slot);
            let date = format!("2024-01-1{}", day);
            let sub = submission(&slot, &date, st, n);
            queue.enqueue(&sub).unwrap();
            latest.insert((slot.clone(), date.clone()), sub);

            let listed = queue.list().unwrap();
            let for_key: Vec<_> = listed
                .iter()
                .filter(|s| s.class.slot_id == slot && s.class.date == date)
                .collect();
            prop_assert_eq!(for_key.len(), 1);
            prop_assert_eq!(for_key[0], &latest[&(slot, date)]);
            prop_assert_eq!(listed.len(), latest.len());
        }
    }
}
