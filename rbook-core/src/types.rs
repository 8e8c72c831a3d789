use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Build the identity key of a class: `"{dept}-{year}-{section}"`.
pub fn class_key(dept: &str, year: u8, section: &str) -> String {
    format!("{}-{}-{}", dept, year, section)
}

/// Attendance status recorded for one student
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    /// On duty (excused for an institutional activity)
    Od,
    Leave,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Od => "od",
            AttendanceStatus::Leave => "leave",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A student within a cached roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub roll_no: String,
    /// Proximity beacon identifier, if the student carries one
    pub beacon_id: Option<String>,
    /// Sub-group number used to split lab sessions
    pub batch: Option<u32>,
}

/// Snapshot of the students of one class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roster {
    pub class_key: String,
    pub subject_name: String,
    pub subject_id: Option<String>,
    pub section: String,
    pub students: Vec<Student>,
    pub cached_at: DateTime<Utc>,
}

impl Roster {
    /// Students belonging to `batch`; all students when `batch` is `None`.
    pub fn students_in_batch(&self, batch: Option<u32>) -> Vec<&Student> {
        match batch {
            None => self.students.iter().collect(),
            Some(b) => self
                .students
                .iter()
                .filter(|s| s.batch == Some(b))
                .collect(),
        }
    }
}

/// An active teaching assignment of the signed-in faculty member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassAssignment {
    pub dept: String,
    pub year: u8,
    pub section: String,
    pub subject_name: String,
    pub subject_id: Option<String>,
}

impl ClassAssignment {
    pub fn class_key(&self) -> String {
        class_key(&self.dept, self.year, &self.section)
    }
}

/// The class a submission is recorded against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRef {
    pub slot_id: String,
    /// Calendar date, `YYYY-MM-DD`
    pub date: String,
    pub subject_id: Option<String>,
    pub subject_name: String,
    pub dept: String,
    pub year: u8,
    pub section: String,
    pub batch: Option<u32>,
}

impl ClassRef {
    pub fn class_key(&self) -> String {
        class_key(&self.dept, self.year, &self.section)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentMark {
    pub student_id: String,
    pub status: AttendanceStatus,
}

impl StudentMark {
    pub fn new(student_id: impl Into<String>, status: AttendanceStatus) -> Self {
        Self {
            student_id: student_id.into(),
            status,
        }
    }
}

/// Per-status totals of a submission
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub present: usize,
    pub absent: usize,
    pub od: usize,
    pub leave: usize,
    pub total: usize,
}

/// Attendance recorded locally and waiting to reach the remote system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSubmission {
    pub id: String,
    pub class: ClassRef,
    pub marks: Vec<StudentMark>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl PendingSubmission {
    pub fn new(class: ClassRef, marks: Vec<StudentMark>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            class,
            marks,
            submitted_at: Utc::now(),
            retry_count: 0,
            last_error: None,
        }
    }

    /// The `(slot_id, date)` pair that collapses repeated submissions.
    pub fn dedup_key(&self) -> (&str, &str) {
        (&self.class.slot_id, &self.class.date)
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for mark in &self.marks {
            match mark.status {
                AttendanceStatus::Present => counts.present += 1,
                AttendanceStatus::Absent => counts.absent += 1,
                AttendanceStatus::Od => counts.od += 1,
                AttendanceStatus::Leave => counts.leave += 1,
            }
        }
        counts.total = self.marks.len();
        counts
    }
}

/// In-progress marks for a slot, kept so an interrupted session can resume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub slot_id: String,
    pub date: String,
    pub marks: Vec<StudentMark>,
    pub saved_at: DateTime<Utc>,
}
