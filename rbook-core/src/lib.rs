pub mod error;
pub mod config;
pub mod types;
pub mod storage;
pub mod flat;
pub mod sqlite;
pub mod roster; // rosters + students tables
pub mod queue; // pending_submissions table
pub mod migration;

pub use config::StoreConfig;
pub use error::{Error, Result};
pub use flat::FlatFileStore;
pub use migration::{migrate_legacy, MigrationOutcome};
pub use queue::{PendingQueue, QueueEntry};
pub use roster::RosterTable;
pub use sqlite::SqliteStore;
pub use storage::{open_store, StorageAdapter, StorageExt, StorageKind};
pub use types::*;
