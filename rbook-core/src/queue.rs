/// Durable queue of pending submissions
///
/// At most one submission exists per `(slot_id, date)`. Enqueueing deletes
/// the previous holder of that key and inserts the new record in the same
/// transaction, so a reader never sees both or neither.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

use crate::sqlite::SqliteStore;
use crate::types::PendingSubmission;
use crate::{Error, Result};

/// A queue row as stored, before its payload is trusted
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEntry {
    Valid(PendingSubmission),
    /// Row whose payload could not be decoded
    Corrupt { id: String, reason: String },
}

impl QueueEntry {
    pub fn id(&self) -> &str {
        match self {
            QueueEntry::Valid(s) => &s.id,
            QueueEntry::Corrupt { id, .. } => id,
        }
    }
}

#[derive(Clone)]
pub struct PendingQueue {
    store: Arc<SqliteStore>,
}

impl PendingQueue {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }

    /// Insert `submission`, superseding any queued one with the same
    /// `(slot_id, date)`. Returns how many earlier records were replaced.
    pub fn enqueue(&self, submission: &PendingSubmission) -> Result<usize> {
        let data = serde_json::to_string(submission)?;
        let (slot_id, date) = submission.dedup_key();
        let created_at = Utc::now().timestamp_millis();

        let replaced = self.store.transaction(|tx| {
            let replaced = tx.execute(
                "DELETE FROM pending_submissions WHERE slot_id = ?1 AND date = ?2",
                params![slot_id, date],
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO pending_submissions(id, data, slot_id, date, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![submission.id, data, slot_id, date, created_at],
            )?;
            Ok(replaced)
        })?;

        tracing::debug!(
            id = %submission.id,
            slot_id = slot_id,
            date = date,
            replaced = replaced,
            "Enqueued pending submission"
        );
        Ok(replaced)
    }

    /// Remove a submission; returns whether it was present
    pub fn dequeue(&self, id: &str) -> Result<bool> {
        let conn = self.store.conn();
        let removed = conn.execute("DELETE FROM pending_submissions WHERE id = ?1", [id])?;
        tracing::debug!(id = id, removed = removed > 0, "Dequeued pending submission");
        Ok(removed > 0)
    }

    /// Remove whatever is queued for `(slot_id, date)`
    pub fn dequeue_by_key(&self, slot_id: &str, date: &str) -> Result<usize> {
        let conn = self.store.conn();
        let removed = conn.execute(
            "DELETE FROM pending_submissions WHERE slot_id = ?1 AND date = ?2",
            params![slot_id, date],
        )?;
        Ok(removed)
    }

    /// Every row in creation order, including rows that fail to decode
    pub fn list_entries(&self) -> Result<Vec<QueueEntry>> {
        let conn = self.store.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, data FROM pending_submissions ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows
            .into_iter()
            .map(|(id, data)| decode_entry(id, &data))
            .collect())
    }

    /// Decodable submissions in creation order
    pub fn list(&self) -> Result<Vec<PendingSubmission>> {
        let mut out = Vec::new();
        for entry in self.list_entries()? {
            match entry {
                QueueEntry::Valid(s) => out.push(s),
                QueueEntry::Corrupt { id, reason } => {
                    tracing::warn!(id = %id, reason = %reason, "Skipping corrupt pending submission");
                }
            }
        }
        Ok(out)
    }

    pub fn get(&self, id: &str) -> Result<Option<PendingSubmission>> {
        let conn = self.store.conn();
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM pending_submissions WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;

        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.store.conn();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM pending_submissions", [], |row| {
            row.get(0)
        })?;
        Ok(n as usize)
    }

    /// Record a failed delivery: bump `retry_count` and keep the error.
    ///
    /// Returns the new retry count. The row keeps its queue position.
    pub fn record_failure(&self, id: &str, error: &str) -> Result<u32> {
        self.store.transaction(|tx| {
            let data: Option<String> = tx
                .query_row(
                    "SELECT data FROM pending_submissions WHERE id = ?1",
                    [id],
                    |row| row.get(0),
                )
                .optional()?;

            let data = data.ok_or_else(|| Error::NotFound(format!("pending submission {}", id)))?;
            let mut submission: PendingSubmission = serde_json::from_str(&data)?;
            submission.retry_count += 1;
            submission.last_error = Some(error.to_string());

            tx.execute(
                "UPDATE pending_submissions SET data = ?1 WHERE id = ?2",
                params![serde_json::to_string(&submission)?, id],
            )?;
            Ok(submission.retry_count)
        })
    }

    /// Delete every pending submission; returns how many were removed
    pub fn clear(&self) -> Result<usize> {
        let conn = self.store.conn();
        Ok(conn.execute("DELETE FROM pending_submissions", [])?)
    }
}

fn decode_entry(id: String, data: &str) -> QueueEntry {
    match serde_json::from_str::<PendingSubmission>(data) {
        Ok(submission) => QueueEntry::Valid(submission),
        Err(e) => QueueEntry::Corrupt {
            id,
            reason: e.to_string(),
        },
    }
}
