/// One-time copy of legacy flat key/value data into the new backend
///
/// The completion flag is written only after every chunk has been copied.
/// A crash part-way through leaves the flag unset and the next launch simply
/// copies again; `multi_set` overwrites, so a repeated copy is harmless.

use bytes::Bytes;

use crate::storage::StorageAdapter;
use crate::Result;

/// Flag stored in the target backend once migration has finished
pub const MIGRATION_FLAG_KEY: &str = "migration_complete";

/// Legacy blobs that are rebuilt by the roster download instead of copied.
/// Both can grow to megabytes and would be pulled into memory in one read.
pub const EXCLUDED_LEGACY_KEYS: [&str; 2] = ["cached_rosters", "offline_attendance_queue"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The flag was already set; nothing was read
    AlreadyComplete,
    Migrated { copied: usize, skipped: usize },
}

pub fn is_migration_complete(target: &dyn StorageAdapter) -> Result<bool> {
    Ok(target.get(MIGRATION_FLAG_KEY)?.is_some())
}

/// Copy every legacy key except the excluded blobs into `target`.
pub fn migrate_legacy(
    legacy: &dyn StorageAdapter,
    target: &dyn StorageAdapter,
    chunk_size: usize,
) -> Result<MigrationOutcome> {
    if is_migration_complete(target)? {
        tracing::debug!("Legacy migration already complete");
        return Ok(MigrationOutcome::AlreadyComplete);
    }

    let all_keys = legacy.get_all_keys()?;
    let (keys, excluded): (Vec<String>, Vec<String>) = all_keys
        .into_iter()
        .partition(|k| !EXCLUDED_LEGACY_KEYS.contains(&k.as_str()));

    let mut copied = 0;
    for chunk in keys.chunks(chunk_size.max(1)) {
        let pairs: Vec<(String, Bytes)> = legacy
            .multi_get(chunk)?
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect();
        copied += pairs.len();
        target.multi_set(pairs)?;
    }

    target.set(MIGRATION_FLAG_KEY, Bytes::from_static(b"true"))?;

    tracing::info!(
        from = legacy.backend_name(),
        to = target.backend_name(),
        copied = copied,
        skipped = excluded.len(),
        "Legacy storage migration complete"
    );

    Ok(MigrationOutcome::Migrated {
        copied,
        skipped: excluded.len(),
    })
}
