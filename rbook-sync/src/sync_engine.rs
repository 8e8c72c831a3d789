/// Sync engine
///
/// Uploads queued submissions and downloads rosters. Both directions run
/// through one `SyncMutex`; a pass that finds it held is skipped. Per-item
/// upload failures are collected into the `SyncReport` instead of aborting
/// the pass.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time;

use rbook_core::{
    Draft, PendingQueue, PendingSubmission, QueueEntry, Roster, RosterTable, SqliteStore,
    StorageAdapter, StudentMark,
};

use crate::cache::{CacheManager, LAST_SYNC_KEY, ROSTERS_KEY};
use crate::config::SyncConfig;
use crate::draft::DraftStore;
use crate::error::{SyncError, SyncResult};
use crate::mutex::SyncMutex;
use crate::remote::{AttendanceUpload, RemoteBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncDirection {
    Upload,
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    Idle,
    Running(SyncDirection),
}

/// Result summary of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Submissions delivered, or rosters cached on download
    pub synced: usize,
    /// Items not delivered in this pass
    pub failed: usize,
    /// Remote records overwritten by a delivery
    pub conflicts: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncEvent {
    Started { direction: SyncDirection },
    /// The mutex was held by another pass
    Skipped { direction: SyncDirection },
    Completed { direction: SyncDirection, report: SyncReport },
    Failed { direction: SyncDirection, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub last_sync_time: Option<DateTime<Utc>>,
    pub pending_count: usize,
    pub is_expired: bool,
}

/// What `submit_attendance` did with a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Delivered { conflicts: usize },
    Queued,
}

/// Puts the engine back to `Idle` even if the pass future is dropped
struct IdleOnDrop<'a>(&'a RwLock<SyncState>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        *self.0.write() = SyncState::Idle;
    }
}

#[derive(Clone)]
pub struct SyncEngine {
    config: Arc<SyncConfig>,
    queue: PendingQueue,
    cache: CacheManager,
    drafts: Arc<DraftStore>,
    remote: Arc<dyn RemoteBackend>,
    mutex: Arc<SyncMutex>,
    state: Arc<RwLock<SyncState>>,
    event_tx: mpsc::UnboundedSender<SyncEvent>,
    event_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<SyncEvent>>>>,
    shutdown_tx: Arc<Mutex<Option<mpsc::Sender<()>>>>,
}

impl SyncEngine {
    /// Create an engine over `store`, which serves as both the key/value
    /// store and the relational cache.
    pub fn new(store: Arc<SqliteStore>, remote: Arc<dyn RemoteBackend>, config: SyncConfig) -> SyncResult<Self> {
        config.validate().map_err(SyncError::Config)?;

        let kv: Arc<dyn StorageAdapter> = store.clone();
        let cache = CacheManager::new(kv.clone(), RosterTable::new(store.clone()))
            .with_yield_every(config.yield_every);
        let drafts = Arc::new(DraftStore::new(kv, config.draft_debounce));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config: Arc::new(config),
            queue: PendingQueue::new(store),
            cache,
            drafts,
            remote,
            mutex: Arc::new(SyncMutex::new()),
            state: Arc::new(RwLock::new(SyncState::Idle)),
            event_tx,
            event_rx: Arc::new(Mutex::new(Some(event_rx))),
            shutdown_tx: Arc::new(Mutex::new(None)),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Take the event receiver; only the first caller gets it.
    pub fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<SyncEvent>> {
        self.event_rx.lock().take()
    }

    /// Start the background loop when `sync_interval` is configured.
    /// Returns whether a loop was started.
    pub fn start(&self) -> bool {
        let Some(period) = self.config.sync_interval else {
            return false;
        };
        let mut shutdown_slot = self.shutdown_tx.lock();
        if shutdown_slot.is_some() {
            return false;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        *shutdown_slot = Some(shutdown_tx);
        let engine = self.clone();

        tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        engine.sync_all().await;
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Sync loop shutting down");
                        break;
                    }
                }
            }
        });

        tracing::info!(interval_ms = period.as_millis() as u64, "Sync loop started");
        true
    }

    pub async fn stop(&self) {
        let tx = self.shutdown_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(()).await;
        }
    }

    /// Upload then download
    pub async fn sync_all(&self) {
        if let Some(Err(e)) = self.sync_pending_submissions().await {
            tracing::error!(error = %e, "Upload pass failed");
        }
        if let Some(Err(e)) = self.sync_rosters().await {
            tracing::error!(error = %e, "Download pass failed");
        }
    }

    /// Deliver queued submissions in creation order.
    ///
    /// `None` means another pass held the mutex and nothing ran.
    pub async fn sync_pending_submissions(&self) -> Option<SyncResult<SyncReport>> {
        self.run_pass(SyncDirection::Upload, self.upload_pass()).await
    }

    /// Refresh cached rosters from the active class assignments.
    ///
    /// `None` means another pass held the mutex and nothing ran.
    pub async fn sync_rosters(&self) -> Option<SyncResult<SyncReport>> {
        self.run_pass(SyncDirection::Download, self.download_pass()).await
    }

    /// Record attendance. When `online`, the submission is delivered at once;
    /// if that fails for a network reason, when offline, or while a sync
    /// pass holds the mutex, it is queued. The draft for the submission's
    /// slot and date is cleared once it is delivered or queued. Remote
    /// rejections are returned to the caller.
    pub async fn submit_attendance(&self, submission: PendingSubmission, online: bool) -> SyncResult<SubmitOutcome> {
        if submission.marks.is_empty() {
            return Err(SyncError::Structural("submission has no student marks".to_string()));
        }

        let outcome = if online {
            match self.mutex.run(|| self.deliver_now(&submission)).await {
                Some(outcome) => outcome?,
                None => {
                    tracing::info!(id = %submission.id, "Sync in progress, queueing submission");
                    self.queue.enqueue(&submission)?;
                    SubmitOutcome::Queued
                }
            }
        } else {
            self.queue.enqueue(&submission)?;
            SubmitOutcome::Queued
        };

        self.drafts
            .clear_draft_attendance(&submission.class.slot_id, &submission.class.date);
        Ok(outcome)
    }

    pub fn get_sync_status(&self) -> SyncStatus {
        SyncStatus {
            last_sync_time: self.cache.get_timestamp(LAST_SYNC_KEY),
            pending_count: self.get_pending_count(),
            is_expired: self.cache.is_stale(LAST_SYNC_KEY, self.config.stale_after_hours),
        }
    }

    pub fn get_pending_count(&self) -> usize {
        self.queue.count().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to count pending submissions");
            0
        })
    }

    pub fn get_cache_age(&self, key: &str) -> String {
        self.cache.age_description(key)
    }

    pub fn find_cached_roster(&self, dept: &str, year: u8, section: &str) -> Option<Roster> {
        self.cache.find_cached_roster(dept, year, section)
    }

    pub fn save_draft_attendance(&self, slot_id: &str, date: &str, marks: Vec<StudentMark>) {
        self.drafts.save_draft_attendance(slot_id, date, marks)
    }

    pub fn get_draft_attendance(&self, slot_id: &str, date: &str) -> Option<Draft> {
        self.drafts.get_draft_attendance(slot_id, date)
    }

    pub fn clear_draft_attendance(&self, slot_id: &str, date: &str) {
        self.drafts.clear_draft_attendance(slot_id, date)
    }

    /// Write pending drafts now, e.g. before the host suspends
    pub fn flush_drafts(&self) -> usize {
        self.drafts.flush()
    }

    async fn run_pass<F>(&self, direction: SyncDirection, pass: F) -> Option<SyncResult<SyncReport>>
    where
        F: Future<Output = SyncResult<SyncReport>>,
    {
        let outcome = self
            .mutex
            .run(|| async move {
                *self.state.write() = SyncState::Running(direction);
                let _idle = IdleOnDrop(&self.state);
                self.emit(SyncEvent::Started { direction });

                let result = pass.await;
                match &result {
                    Ok(report) => self.emit(SyncEvent::Completed {
                        direction,
                        report: report.clone(),
                    }),
                    Err(e) => self.emit(SyncEvent::Failed {
                        direction,
                        error: e.to_string(),
                    }),
                }
                result
            })
            .await;

        if outcome.is_none() {
            self.emit(SyncEvent::Skipped { direction });
        }
        outcome
    }

    async fn upload_pass(&self) -> SyncResult<SyncReport> {
        let entries = self.queue.list_entries()?;
        tracing::info!(pending = entries.len(), "Upload pass started");

        let mut report = SyncReport::default();
        let mut network_failures = 0;

        for entry in entries {
            match entry {
                QueueEntry::Corrupt { id, reason } => {
                    tracing::warn!(id = %id, reason = %reason, "Discarding corrupt submission");
                    self.discard(&id, &mut report);
                    report.errors.push(format!("{}: corrupt record: {}", id, reason));
                }
                QueueEntry::Valid(submission) if submission.marks.is_empty() => {
                    tracing::warn!(id = %submission.id, "Discarding submission without marks");
                    self.discard(&submission.id, &mut report);
                    report.errors.push(format!("{}: no student marks", submission.id));
                }
                QueueEntry::Valid(submission) if !self.still_queued(&submission.id) => {
                    tracing::debug!(id = %submission.id, "Submission superseded during pass, skipping");
                }
                QueueEntry::Valid(submission) => match self.push_submission(&submission).await {
                    Ok(conflicts) => {
                        if let Err(e) = self.queue.dequeue(&submission.id) {
                            tracing::warn!(id = %submission.id, error = %e, "Delivered but not dequeued");
                        }
                        report.synced += 1;
                        report.conflicts += conflicts;
                    }
                    Err(e) if e.is_network() => {
                        network_failures += 1;
                        report.failed += 1;
                        report.errors.push(format!("{}: {}", submission.id, e));
                    }
                    Err(e) if e.penalizes_retry() => {
                        self.penalize(&submission, &e, &mut report);
                    }
                    Err(e) => {
                        report.failed += 1;
                        report.errors.push(format!("{}: {}", submission.id, e));
                    }
                },
            }
            tokio::task::yield_now().await;
        }

        if network_failures == 0 {
            if let Err(e) = self.cache.set_timestamp(LAST_SYNC_KEY) {
                tracing::warn!(error = %e, "Failed to record last sync time");
            }
        }

        tracing::info!(
            synced = report.synced,
            failed = report.failed,
            conflicts = report.conflicts,
            "Upload pass finished"
        );
        Ok(report)
    }

    /// Whether a snapshot entry is still live. A read error counts as live
    /// so the push is attempted.
    fn still_queued(&self, id: &str) -> bool {
        match self.queue.get(id) {
            Ok(found) => found.is_some(),
            Err(e) => {
                tracing::warn!(id = id, error = %e, "Failed to re-read queued submission");
                true
            }
        }
    }

    /// Fetch everything first; the cache is only touched once every fetch
    /// has succeeded.
    async fn download_pass(&self) -> SyncResult<SyncReport> {
        let assignments = self
            .call(self.remote.fetch_assignments(&self.config.faculty_id))
            .await?;

        let mut seen = HashSet::new();
        let classes: Vec<_> = assignments
            .into_iter()
            .filter(|a| seen.insert(a.class_key()))
            .collect();
        tracing::info!(classes = classes.len(), "Download pass started");

        let mut rosters = Vec::with_capacity(classes.len());
        for (i, class) in classes.iter().enumerate() {
            let students = self
                .call(self.remote.fetch_students(&class.dept, class.year, &class.section))
                .await?;
            rosters.push(Roster {
                class_key: class.class_key(),
                subject_name: class.subject_name.clone(),
                subject_id: class.subject_id.clone(),
                section: class.section.clone(),
                students,
                cached_at: Utc::now(),
            });
            if (i + 1) % self.config.yield_every == 0 {
                tokio::task::yield_now().await;
            }
        }

        let valid: Vec<String> = rosters.iter().map(|r| r.class_key.clone()).collect();
        let purged = self.cache.purge_stale_rosters(&valid)?;
        let cached = self.cache.cache_all_rosters(&rosters).await?;

        self.cache.set_timestamp(ROSTERS_KEY)?;
        self.cache.set_timestamp(LAST_SYNC_KEY)?;

        tracing::info!(cached = cached, purged = purged.len(), "Download pass finished");
        Ok(SyncReport {
            synced: cached,
            ..SyncReport::default()
        })
    }

    /// Push a submission outside the queue. Runs under the mutex.
    async fn deliver_now(&self, submission: &PendingSubmission) -> SyncResult<SubmitOutcome> {
        match self.push_submission(submission).await {
            Ok(conflicts) => {
                let (slot_id, date) = submission.dedup_key();
                self.queue.dequeue_by_key(slot_id, date)?;
                Ok(SubmitOutcome::Delivered { conflicts })
            }
            Err(e) if e.is_network() => {
                tracing::info!(id = %submission.id, error = %e, "Remote unreachable, queueing submission");
                self.queue.enqueue(submission)?;
                Ok(SubmitOutcome::Queued)
            }
            Err(e) => Err(e),
        }
    }

    /// Overwrite the remote copy of a submission. Returns how many existing
    /// remote records were replaced.
    async fn push_submission(&self, submission: &PendingSubmission) -> SyncResult<usize> {
        let subject_id = self.resolve_subject(submission).await?;
        let upload = AttendanceUpload::from_submission(&self.config.faculty_id, submission, subject_id);

        let replaced = self.call(self.remote.delete_attendance(&upload.key())).await?;
        self.call(self.remote.insert_attendance(&upload)).await?;

        if replaced > 0 {
            tracing::debug!(
                slot_id = %upload.slot_id,
                date = %upload.date,
                replaced = replaced,
                "Overwrote remote attendance"
            );
        }
        Ok(replaced)
    }

    /// Use the submission's subject id, or recover it from the timetable
    /// slot and then from the subject name.
    async fn resolve_subject(&self, submission: &PendingSubmission) -> SyncResult<String> {
        let class = &submission.class;
        if let Some(id) = class.subject_id.as_deref().filter(|id| !id.is_empty()) {
            return Ok(id.to_string());
        }

        if let Some(id) = self.call(self.remote.lookup_subject_by_slot(&class.slot_id)).await? {
            tracing::debug!(id = %submission.id, subject_id = %id, "Resolved subject from timetable");
            return Ok(id);
        }
        if !class.subject_name.is_empty() {
            if let Some(id) = self.call(self.remote.lookup_subject_by_name(&class.subject_name)).await? {
                tracing::debug!(id = %submission.id, subject_id = %id, "Resolved subject by name");
                return Ok(id);
            }
        }

        Err(SyncError::Resolution(format!(
            "no subject for slot {} ({})",
            class.slot_id, class.subject_name
        )))
    }

    async fn call<T, F>(&self, fut: F) -> SyncResult<T>
    where
        F: Future<Output = SyncResult<T>>,
    {
        let limit = self.config.remote_timeout;
        match time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(remote = self.remote.name(), timeout_ms = limit.as_millis() as u64, "Remote call timed out");
                Err(SyncError::Timeout(limit.as_millis() as u64))
            }
        }
    }

    fn penalize(&self, submission: &PendingSubmission, err: &SyncError, report: &mut SyncReport) {
        report.failed += 1;
        report.errors.push(format!("{}: {}", submission.id, err));

        let retries = match self.queue.record_failure(&submission.id, &err.to_string()) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(id = %submission.id, error = %e, "Failed to record delivery failure");
                return;
            }
        };

        if retries > self.config.max_retries {
            tracing::warn!(
                id = %submission.id,
                retries = retries,
                error = %err,
                "Dropping submission after too many rejections"
            );
            if let Err(e) = self.queue.dequeue(&submission.id) {
                tracing::warn!(id = %submission.id, error = %e, "Failed to drop submission");
            }
        }
    }

    fn discard(&self, id: &str, report: &mut SyncReport) {
        report.failed += 1;
        if let Err(e) = self.queue.dequeue(id) {
            tracing::warn!(id = id, error = %e, "Failed to discard submission");
        }
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.event_tx.send(event);
    }
}
