/// Cache manager
///
/// Per-key refresh timestamps live in the key/value store as JSON RFC 3339
/// strings under `cache_ts_<key>`. Staleness is computed per key; there is no
/// global flag. Rosters go to the normalized tables, everything else is a
/// JSON blob stored next to its timestamp.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

use rbook_core::{class_key, Roster, RosterTable, StorageAdapter, StorageExt};

/// Timestamp key for the roster download
pub const ROSTERS_KEY: &str = "rosters";
/// Timestamp key for the last completed sync pass
pub const LAST_SYNC_KEY: &str = "last_sync";

const TIMESTAMP_PREFIX: &str = "cache_ts_";

/// Blob-cached entities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedEntity {
    Schedule,
    Profile,
    History,
    Watchlist,
}

impl CachedEntity {
    pub fn key(&self) -> &'static str {
        match self {
            CachedEntity::Schedule => "schedule",
            CachedEntity::Profile => "profile",
            CachedEntity::History => "history",
            CachedEntity::Watchlist => "watchlist",
        }
    }
}

fn timestamp_key(key: &str) -> String {
    format!("{}{}", TIMESTAMP_PREFIX, key)
}

/// Human readable age of something refreshed `elapsed` ago.
pub fn describe_age(elapsed: Duration) -> String {
    let minutes = elapsed.num_minutes();
    if minutes < 1 {
        return "Just now".to_string();
    }
    if minutes < 60 {
        return format!("{}m ago", minutes);
    }
    let hours = elapsed.num_hours();
    if hours < 24 {
        return format!("{}h ago", hours);
    }
    match elapsed.num_days() {
        1 => "Yesterday".to_string(),
        days => format!("{}d ago", days),
    }
}

#[derive(Clone)]
pub struct CacheManager {
    kv: Arc<dyn StorageAdapter>,
    rosters: RosterTable,
    yield_every: usize,
}

impl CacheManager {
    pub fn new(kv: Arc<dyn StorageAdapter>, rosters: RosterTable) -> Self {
        Self {
            kv,
            rosters,
            yield_every: 1,
        }
    }

    /// Number of rosters written between yields in `cache_all_rosters`
    pub fn with_yield_every(mut self, classes: usize) -> Self {
        self.yield_every = classes.max(1);
        self
    }

    pub fn kv(&self) -> &Arc<dyn StorageAdapter> {
        &self.kv
    }

    pub fn rosters(&self) -> &RosterTable {
        &self.rosters
    }

    // Timestamps

    pub fn set_timestamp(&self, key: &str) -> rbook_core::Result<()> {
        self.set_timestamp_at(key, Utc::now())
    }

    pub fn set_timestamp_at(&self, key: &str, at: DateTime<Utc>) -> rbook_core::Result<()> {
        self.kv.set_json(&timestamp_key(key), &at)
    }

    /// Last refresh time of `key`; `None` if never set or unreadable.
    pub fn get_timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.kv.get_json::<DateTime<Utc>>(&timestamp_key(key)) {
            Ok(ts) => ts,
            Err(e) => {
                tracing::warn!(key = key, error = %e, "Failed to read cache timestamp");
                None
            }
        }
    }

    /// A key that was never timestamped is always stale.
    pub fn is_stale(&self, key: &str, max_age_hours: i64) -> bool {
        match self.get_timestamp(key) {
            Some(ts) => Utc::now().signed_duration_since(ts) > Duration::hours(max_age_hours),
            None => true,
        }
    }

    pub fn age_description(&self, key: &str) -> String {
        match self.get_timestamp(key) {
            Some(ts) => describe_age(Utc::now().signed_duration_since(ts)),
            None => "Never".to_string(),
        }
    }

    // Blob entities

    pub fn get_entity<T: DeserializeOwned>(&self, entity: CachedEntity) -> Option<T> {
        match self.kv.get_json(entity.key()) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = entity.key(), error = %e, "Failed to read cached entity");
                None
            }
        }
    }

    /// Store the blob and stamp its refresh time.
    pub fn set_entity<T: Serialize>(&self, entity: CachedEntity, value: &T) -> rbook_core::Result<()> {
        self.kv.set_json(entity.key(), value)?;
        self.set_timestamp(entity.key())
    }

    // Rosters

    pub fn cache_roster(&self, roster: &Roster) -> rbook_core::Result<()> {
        self.rosters.cache_roster(roster)
    }

    /// Cache each roster in its own transaction, yielding to the runtime
    /// between classes.
    pub async fn cache_all_rosters(&self, rosters: &[Roster]) -> rbook_core::Result<usize> {
        for (i, roster) in rosters.iter().enumerate() {
            self.rosters.cache_roster(roster)?;
            if (i + 1) % self.yield_every == 0 {
                tokio::task::yield_now().await;
            }
        }
        tracing::debug!(classes = rosters.len(), "Cached rosters");
        Ok(rosters.len())
    }

    pub fn find_cached_roster(&self, dept: &str, year: u8, section: &str) -> Option<Roster> {
        let key = class_key(dept, year, section);
        match self.rosters.find_roster(&key) {
            Ok(roster) => roster,
            Err(e) => {
                tracing::warn!(class_key = %key, error = %e, "Failed to read cached roster");
                None
            }
        }
    }

    /// Drop every cached roster whose class key is not in `valid`.
    pub fn purge_stale_rosters(&self, valid: &[String]) -> rbook_core::Result<Vec<String>> {
        self.rosters.purge_stale_rosters(valid)
    }

    pub fn cached_class_keys(&self) -> Vec<String> {
        self.rosters.cached_class_keys().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to list cached rosters");
            Vec::new()
        })
    }
}
