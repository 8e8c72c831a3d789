/// Normalized roster cache
///
/// A roster is one row in `rosters` plus its rows in `students`. Replacing a
/// roster deletes the old student rows and inserts the new ones inside the
/// same transaction, so readers see either the old roster or the new one.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::collections::HashSet;
use std::sync::Arc;

use crate::sqlite::SqliteStore;
use crate::types::{Roster, Student};
use crate::{Error, Result};

#[derive(Clone)]
pub struct RosterTable {
    store: Arc<SqliteStore>,
}

impl RosterTable {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }

    /// Replace the cached roster for `roster.class_key`.
    pub fn cache_roster(&self, roster: &Roster) -> Result<()> {
        if roster.class_key.is_empty() {
            return Err(Error::InvalidArgument("roster class key is empty".to_string()));
        }

        self.store.transaction(|tx| {
            tx.execute(
                "DELETE FROM students WHERE class_id = ?1",
                [&roster.class_key],
            )?;

            tx.execute(
                "INSERT INTO rosters(class_id, subject_name, subject_id, section, cached_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(class_id) DO UPDATE SET
                    subject_name = excluded.subject_name,
                    subject_id = excluded.subject_id,
                    section = excluded.section,
                    cached_at = excluded.cached_at",
                params![
                    roster.class_key,
                    roster.subject_name,
                    roster.subject_id,
                    roster.section,
                    roster.cached_at.to_rfc3339(),
                ],
            )?;

            let mut insert = tx.prepare_cached(
                "INSERT OR REPLACE INTO students(id, class_id, name, roll_no, beacon_id, batch, sort_order)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (i, student) in roster.students.iter().enumerate() {
                insert.execute(params![
                    student.id,
                    roster.class_key,
                    student.name,
                    student.roll_no,
                    student.beacon_id,
                    student.batch,
                    i as i64,
                ])?;
            }
            Ok(())
        })?;

        tracing::debug!(
            class_key = %roster.class_key,
            students = roster.students.len(),
            "Cached roster"
        );
        Ok(())
    }

    /// Load one roster by joining its students on the class key.
    pub fn find_roster(&self, class_key: &str) -> Result<Option<Roster>> {
        let conn = self.store.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT r.subject_name, r.subject_id, r.section, r.cached_at,
                    s.id, s.name, s.roll_no, s.beacon_id, s.batch
             FROM rosters r
             LEFT JOIN students s ON s.class_id = r.class_id
             WHERE r.class_id = ?1
             ORDER BY s.sort_order",
        )?;

        let mut rows = stmt.query([class_key])?;
        let mut roster: Option<Roster> = None;

        while let Some(row) = rows.next()? {
            if roster.is_none() {
                let cached_at: String = row.get(3)?;
                roster = Some(Roster {
                    class_key: class_key.to_string(),
                    subject_name: row.get(0)?,
                    subject_id: row.get(1)?,
                    section: row.get(2)?,
                    students: Vec::new(),
                    cached_at: parse_timestamp(&cached_at)?,
                });
            }

            let student_id: Option<String> = row.get(4)?;
            if let (Some(id), Some(r)) = (student_id, roster.as_mut()) {
                r.students.push(Student {
                    id,
                    name: row.get(5)?,
                    roll_no: row.get(6)?,
                    beacon_id: row.get(7)?,
                    batch: row.get(8)?,
                });
            }
        }

        Ok(roster)
    }

    /// Class keys of every cached roster, sorted
    pub fn cached_class_keys(&self) -> Result<Vec<String>> {
        let conn = self.store.conn();
        let mut stmt = conn.prepare_cached("SELECT class_id FROM rosters ORDER BY class_id")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(keys)
    }

    /// Delete every roster whose class key is not in `valid`.
    ///
    /// Returns the class keys that were removed.
    pub fn purge_stale_rosters(&self, valid: &[String]) -> Result<Vec<String>> {
        let valid: HashSet<&str> = valid.iter().map(String::as_str).collect();

        let purged = self.store.transaction(|tx| {
            let cached = {
                let mut stmt = tx.prepare_cached("SELECT class_id FROM rosters")?;
                let keys = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                keys
            };

            let stale: Vec<String> = cached
                .into_iter()
                .filter(|key| !valid.contains(key.as_str()))
                .collect();

            for key in &stale {
                tx.execute("DELETE FROM students WHERE class_id = ?1", [key])?;
                tx.execute("DELETE FROM rosters WHERE class_id = ?1", [key])?;
            }
            Ok(stale)
        })?;

        if !purged.is_empty() {
            tracing::info!(purged = ?purged, "Purged stale rosters");
        }
        Ok(purged)
    }

    /// Delete one roster; returns whether it existed
    pub fn remove_roster(&self, class_key: &str) -> Result<bool> {
        self.store.transaction(|tx| {
            tx.execute("DELETE FROM students WHERE class_id = ?1", [class_key])?;
            let removed = tx.execute("DELETE FROM rosters WHERE class_id = ?1", [class_key])?;
            Ok(removed > 0)
        })
    }

    pub fn roster_count(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM rosters")
    }

    pub fn student_count(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM students")
    }

    /// When the roster for `class_key` was last written
    pub fn cached_at(&self, class_key: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.store.conn();
        let raw: Option<String> = conn
            .query_row(
                "SELECT cached_at FROM rosters WHERE class_id = ?1",
                [class_key],
                |row| row.get(0),
            )
            .optional()?;
        raw.as_deref().map(parse_timestamp).transpose()
    }

    fn count(&self, sql: &str) -> Result<usize> {
        let conn = self.store.conn();
        let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Corruption(format!("Invalid cached_at '{}': {}", raw, e)))
}
