/// Remote backend abstraction
///
/// The engine talks to the server only through `RemoteBackend`. Attendance
/// is written with overwrite semantics: delete whatever exists for
/// `(faculty, date, slot)`, then insert.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rbook_core::{class_key, ClassAssignment, PendingSubmission, StatusCounts, Student, StudentMark};

use crate::error::{SyncError, SyncResult};

#[cfg(feature = "http-sync")]
pub mod http;

#[cfg(feature = "http-sync")]
pub use http::RestRemote;

/// Remote identity of one attendance session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttendanceKey {
    pub faculty_id: String,
    pub date: String,
    pub slot_id: String,
}

/// A submission in the shape the remote stores it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceUpload {
    pub faculty_id: String,
    pub slot_id: String,
    pub date: String,
    pub subject_id: String,
    pub dept: String,
    pub year: u8,
    pub section: String,
    pub batch: Option<u32>,
    pub counts: StatusCounts,
    pub marks: Vec<StudentMark>,
    pub submitted_at: DateTime<Utc>,
}

impl AttendanceUpload {
    pub fn from_submission(faculty_id: &str, submission: &PendingSubmission, subject_id: String) -> Self {
        let class = &submission.class;
        Self {
            faculty_id: faculty_id.to_string(),
            slot_id: class.slot_id.clone(),
            date: class.date.clone(),
            subject_id,
            dept: class.dept.clone(),
            year: class.year,
            section: class.section.clone(),
            batch: class.batch,
            counts: submission.status_counts(),
            marks: submission.marks.clone(),
            submitted_at: submission.submitted_at,
        }
    }

    pub fn key(&self) -> AttendanceKey {
        AttendanceKey {
            faculty_id: self.faculty_id.clone(),
            date: self.date.clone(),
            slot_id: self.slot_id.clone(),
        }
    }
}

#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Active class assignments of a faculty member
    async fn fetch_assignments(&self, faculty_id: &str) -> SyncResult<Vec<ClassAssignment>>;

    /// Current students of one class
    async fn fetch_students(&self, dept: &str, year: u8, section: &str) -> SyncResult<Vec<Student>>;

    /// Delete existing attendance for `key`; returns how many sessions were removed
    async fn delete_attendance(&self, key: &AttendanceKey) -> SyncResult<usize>;

    async fn insert_attendance(&self, upload: &AttendanceUpload) -> SyncResult<()>;

    /// Subject currently scheduled in a timetable slot
    async fn lookup_subject_by_slot(&self, slot_id: &str) -> SyncResult<Option<String>>;

    /// Subject id by case-insensitive name match
    async fn lookup_subject_by_name(&self, name: &str) -> SyncResult<Option<String>>;

    fn name(&self) -> &'static str;
}

/// Failure injected into `MemoryRemote` pushes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Network,
    Rejection,
}

#[derive(Default)]
struct MemoryState {
    assignments: HashMap<String, Vec<ClassAssignment>>,
    students: HashMap<String, Vec<Student>>,
    attendance: HashMap<AttendanceKey, AttendanceUpload>,
    timetable: HashMap<String, String>,
    subjects: HashMap<String, String>,
    offline: bool,
    latency: Option<Duration>,
    failing_pushes: usize,
    failure_kind: Option<FailureKind>,
}

/// Deterministic in-process remote
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
    fetch_calls: AtomicUsize,
    push_calls: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_assignment(&self, faculty_id: &str, assignment: ClassAssignment) {
        self.state
            .lock()
            .assignments
            .entry(faculty_id.to_string())
            .or_default()
            .push(assignment);
    }

    pub fn set_assignments(&self, faculty_id: &str, assignments: Vec<ClassAssignment>) {
        self.state
            .lock()
            .assignments
            .insert(faculty_id.to_string(), assignments);
    }

    pub fn set_students(&self, dept: &str, year: u8, section: &str, students: Vec<Student>) {
        self.state
            .lock()
            .students
            .insert(class_key(dept, year, section), students);
    }

    pub fn add_timetable_entry(&self, slot_id: &str, subject_id: &str) {
        self.state
            .lock()
            .timetable
            .insert(slot_id.to_string(), subject_id.to_string());
    }

    pub fn add_subject(&self, name: &str, subject_id: &str) {
        self.state
            .lock()
            .subjects
            .insert(name.to_lowercase(), subject_id.to_string());
    }

    /// Every call fails with a network error while offline
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Delay applied to every call
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    /// Make the next `n` attendance inserts fail with `kind`
    pub fn fail_next_pushes(&self, n: usize, kind: FailureKind) {
        let mut state = self.state.lock();
        state.failing_pushes = n;
        state.failure_kind = Some(kind);
    }

    pub fn attendance(&self, key: &AttendanceKey) -> Option<AttendanceUpload> {
        self.state.lock().attendance.get(key).cloned()
    }

    pub fn attendance_count(&self) -> usize {
        self.state.lock().attendance.len()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn push_calls(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> SyncResult<()> {
        let (offline, latency) = {
            let state = self.state.lock();
            (state.offline, state.latency)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if offline {
            return Err(SyncError::Network("remote unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteBackend for MemoryRemote {
    async fn fetch_assignments(&self, faculty_id: &str) -> SyncResult<Vec<ClassAssignment>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        Ok(self
            .state
            .lock()
            .assignments
            .get(faculty_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_students(&self, dept: &str, year: u8, section: &str) -> SyncResult<Vec<Student>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        Ok(self
            .state
            .lock()
            .students
            .get(&class_key(dept, year, section))
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_attendance(&self, key: &AttendanceKey) -> SyncResult<usize> {
        self.enter().await?;
        Ok(self.state.lock().attendance.remove(key).map_or(0, |_| 1))
    }

    async fn insert_attendance(&self, upload: &AttendanceUpload) -> SyncResult<()> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;

        let mut state = self.state.lock();
        if state.failing_pushes > 0 {
            state.failing_pushes -= 1;
            return Err(match state.failure_kind {
                Some(FailureKind::Network) => SyncError::Network("connection reset".to_string()),
                _ => SyncError::RemoteRejection("insert refused".to_string()),
            });
        }
        if upload.subject_id.is_empty() {
            return Err(SyncError::RemoteRejection(
                "subject_id violates not-null constraint".to_string(),
            ));
        }
        state.attendance.insert(upload.key(), upload.clone());
        Ok(())
    }

    async fn lookup_subject_by_slot(&self, slot_id: &str) -> SyncResult<Option<String>> {
        self.enter().await?;
        Ok(self.state.lock().timetable.get(slot_id).cloned())
    }

    async fn lookup_subject_by_name(&self, name: &str) -> SyncResult<Option<String>> {
        self.enter().await?;
        Ok(self.state.lock().subjects.get(&name.to_lowercase()).cloned())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
