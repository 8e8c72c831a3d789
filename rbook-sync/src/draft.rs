/// Debounced draft persistence
///
/// Each (slot, date) pair has its own `Debouncer`. An edit replaces the
/// pending draft and restarts the pair's timer; the write happens once the
/// timer runs out, so a burst of edits costs one write and the last value
/// wins. Drafts carry no cache timestamp.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use rbook_core::{Draft, StorageAdapter, StorageExt, StudentMark};

const DRAFT_PREFIX: &str = "draft_";

pub fn draft_key(slot_id: &str, date: &str) -> String {
    format!("{}{}_{}", DRAFT_PREFIX, slot_id, date)
}

/// Cancel-on-reschedule timer
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            handle: Mutex::new(None),
        }
    }

    /// Run `task` after the delay unless another call replaces it first.
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let next = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        if let Some(prev) = self.handle.lock().replace(next) {
            prev.abort();
        }
    }

    pub fn cancel(&self) {
        if let Some(prev) = self.handle.lock().take() {
            prev.abort();
        }
    }

    /// Forget the scheduled task without aborting it
    pub fn disarm(&self) {
        self.handle.lock().take();
    }

    pub fn is_pending(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Drafts waiting to be written and their timers, keyed by `draft_key`.
/// Kept under one lock so a firing timer cannot interleave with a clear.
#[derive(Default)]
struct Pending {
    unsaved: HashMap<String, Draft>,
    timers: HashMap<String, Debouncer>,
}

pub struct DraftStore {
    kv: Arc<dyn StorageAdapter>,
    debounce: Duration,
    pending: Arc<Mutex<Pending>>,
}

impl DraftStore {
    pub fn new(kv: Arc<dyn StorageAdapter>, debounce: Duration) -> Self {
        Self {
            kv,
            debounce,
            pending: Arc::new(Mutex::new(Pending::default())),
        }
    }

    /// Record in-progress marks for a slot and date. The write is deferred
    /// until the pair has been idle for the debounce period. Outside a tokio
    /// runtime the draft is written immediately.
    pub fn save_draft_attendance(&self, slot_id: &str, date: &str, marks: Vec<StudentMark>) {
        let draft = Draft {
            slot_id: slot_id.to_string(),
            date: date.to_string(),
            marks,
            saved_at: Utc::now(),
        };

        if Handle::try_current().is_err() {
            write_draft(self.kv.as_ref(), &draft);
            return;
        }

        let key = draft_key(slot_id, date);
        let mut pending = self.pending.lock();
        pending.unsaved.insert(key.clone(), draft);

        let kv = self.kv.clone();
        let shared = self.pending.clone();
        let fired_key = key.clone();
        pending
            .timers
            .entry(key)
            .or_insert_with(|| Debouncer::new(self.debounce))
            .schedule(async move {
                let mut pending = shared.lock();
                if let Some(draft) = pending.unsaved.remove(&fired_key) {
                    write_draft(kv.as_ref(), &draft);
                }
                if let Some(timer) = pending.timers.remove(&fired_key) {
                    timer.disarm();
                }
            });
    }

    /// Latest draft for a slot and date, including one still waiting to be
    /// written.
    pub fn get_draft_attendance(&self, slot_id: &str, date: &str) -> Option<Draft> {
        let key = draft_key(slot_id, date);
        if let Some(draft) = self.pending.lock().unsaved.get(&key) {
            return Some(draft.clone());
        }
        match self.kv.get_json::<Draft>(&key) {
            Ok(draft) => draft,
            Err(e) => {
                tracing::warn!(slot_id = slot_id, date = date, error = %e, "Failed to read draft");
                None
            }
        }
    }

    /// Drop the draft for a slot and date, pending or written.
    pub fn clear_draft_attendance(&self, slot_id: &str, date: &str) {
        let key = draft_key(slot_id, date);
        let mut pending = self.pending.lock();
        if let Some(timer) = pending.timers.remove(&key) {
            timer.cancel();
        }
        pending.unsaved.remove(&key);
        if let Err(e) = self.kv.remove(&key) {
            tracing::warn!(slot_id = slot_id, date = date, error = %e, "Failed to clear draft");
        }
    }

    /// Write every pending draft now. Returns how many were written.
    pub fn flush(&self) -> usize {
        let mut pending = self.pending.lock();
        for (_, timer) in pending.timers.drain() {
            timer.cancel();
        }
        let drafts: Vec<Draft> = pending.unsaved.drain().map(|(_, d)| d).collect();
        for draft in &drafts {
            write_draft(self.kv.as_ref(), draft);
        }
        drafts.len()
    }

    /// Drafts waiting for their debounce period to end
    pub fn unsaved_count(&self) -> usize {
        self.pending.lock().unsaved.len()
    }

    /// Timers still armed
    pub fn timer_count(&self) -> usize {
        self.pending.lock().timers.len()
    }
}

fn write_draft(kv: &dyn StorageAdapter, draft: &Draft) {
    match kv.set_json(&draft_key(&draft.slot_id, &draft.date), draft) {
        Ok(()) => tracing::debug!(
            slot_id = %draft.slot_id,
            date = %draft.date,
            marks = draft.marks.len(),
            "Saved draft"
        ),
        Err(e) => tracing::warn!(slot_id = %draft.slot_id, error = %e, "Failed to save draft"),
    }
}
