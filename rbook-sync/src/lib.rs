/// Offline-first sync for Rollbook
///
/// Caches reference data locally, queues attendance recorded without
/// connectivity, and reconciles both with the remote backend under a single
/// exclusion gate.

pub mod error;
pub mod config;
pub mod mutex;
pub mod cache;
pub mod draft;
pub mod remote;
pub mod sync_engine;

pub use cache::{describe_age, CacheManager, CachedEntity, LAST_SYNC_KEY, ROSTERS_KEY};
pub use config::SyncConfig;
pub use draft::{draft_key, Debouncer, DraftStore};
pub use error::{SyncError, SyncResult};
pub use mutex::{SyncGuard, SyncMutex};
pub use remote::{AttendanceKey, AttendanceUpload, FailureKind, MemoryRemote, RemoteBackend};
pub use sync_engine::{
    SubmitOutcome, SyncDirection, SyncEngine, SyncEvent, SyncReport, SyncState, SyncStatus,
};

#[cfg(feature = "http-sync")]
pub use remote::RestRemote;
