/// Test utilities and helpers for Rollbook testing
///
/// Provides a temporary-store fixture and generators for rosters and
/// submissions.

use chrono::Utc;
use rbook_core::{
    AttendanceStatus, ClassAssignment, ClassRef, PendingSubmission, Roster, SqliteStore,
    StoreConfig, Student, StudentMark,
};
use rbook_sync::{MemoryRemote, SyncConfig, SyncEngine};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// SQLite store in a temporary directory, removed on drop
pub struct TestStore {
    pub store: Arc<SqliteStore>,
    pub path: PathBuf,
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("rollbook.db");
        let store = SqliteStore::open(&StoreConfig::at_path(&path)).expect("Failed to open store");

        Self {
            store: Arc::new(store),
            path,
            _temp_dir: Some(temp_dir),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(SqliteStore::open_in_memory().expect("Failed to open in-memory store")),
            path: PathBuf::from(":memory:"),
            _temp_dir: None,
        }
    }

    /// Close and reopen the same file (for testing persistence)
    pub fn reopen(self) -> Self {
        let Self {
            store,
            path,
            _temp_dir,
        } = self;
        drop(store);
        let store = SqliteStore::open(&StoreConfig::at_path(&path)).expect("Failed to reopen store");

        Self {
            store: Arc::new(store),
            path,
            _temp_dir,
        }
    }

    /// Engine over this store with a fresh in-memory remote
    pub fn engine(&self, config: SyncConfig) -> (SyncEngine, Arc<MemoryRemote>) {
        let remote = Arc::new(MemoryRemote::new());
        let engine =
            SyncEngine::new(self.store.clone(), remote.clone(), config).expect("Failed to build engine");
        (engine, remote)
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Sync config suitable for tests: short timeouts and debounce
pub fn test_config() -> SyncConfig {
    SyncConfig::new("fac-1")
        .with_remote_timeout(Duration::from_millis(500))
        .with_draft_debounce(Duration::from_millis(20))
}

pub fn student(class_key: &str, idx: usize) -> Student {
    Student {
        id: format!("{}-s{:03}", class_key, idx),
        name: format!("Student {}", idx),
        roll_no: format!("{:03}", idx),
        beacon_id: if idx % 3 == 0 { Some(format!("beacon-{}", idx)) } else { None },
        batch: Some((idx % 2) as u32 + 1),
    }
}

pub fn roster(class_key: &str, students: usize) -> Roster {
    Roster {
        class_key: class_key.to_string(),
        subject_name: "Data Structures".to_string(),
        subject_id: Some("sub-ds".to_string()),
        section: class_key.rsplit('-').next().unwrap_or_default().to_string(),
        students: (0..students).map(|i| student(class_key, i)).collect(),
        cached_at: Utc::now(),
    }
}

pub fn assignment(dept: &str, year: u8, section: &str) -> ClassAssignment {
    ClassAssignment {
        dept: dept.to_string(),
        year,
        section: section.to_string(),
        subject_name: "Data Structures".to_string(),
        subject_id: Some("sub-ds".to_string()),
    }
}

pub fn class_ref(slot_id: &str, date: &str) -> ClassRef {
    ClassRef {
        slot_id: slot_id.to_string(),
        date: date.to_string(),
        subject_id: Some("sub-ds".to_string()),
        subject_name: "Data Structures".to_string(),
        dept: "CS".to_string(),
        year: 1,
        section: "A".to_string(),
        batch: None,
    }
}

/// Submission with `n` students all marked `status`
pub fn submission(slot_id: &str, date: &str, status: AttendanceStatus, n: usize) -> PendingSubmission {
    PendingSubmission::new(
        class_ref(slot_id, date),
        (0..n)
            .map(|i| StudentMark::new(format!("s{}", i), status))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbook_core::PendingQueue;

    #[test]
    fn test_store_survives_reopen() {
        let test_store = TestStore::new();
        PendingQueue::new(test_store.store.clone())
            .enqueue(&submission("p1", "2024-01-10", AttendanceStatus::Present, 3))
            .unwrap();

        let test_store = test_store.reopen();
        assert_eq!(PendingQueue::new(test_store.store.clone()).count().unwrap(), 1);
    }

    #[test]
    fn test_roster_section_from_key() {
        assert_eq!(roster("CS-2-B", 1).section, "B");
    }
}
