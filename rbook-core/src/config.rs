use std::path::PathBuf;

/// Largest chunk that keeps `2 * chunk` bound parameters under SQLite's
/// default 999 host-parameter limit.
pub const MAX_BATCH_CHUNK_SIZE: usize = 499;

/// Local store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path of the database file (ignored when `in_memory` is set)
    pub path: PathBuf,

    /// Keep everything in memory (tests, previews)
    pub in_memory: bool,

    /// Number of key/value pairs written per transaction in batch operations
    pub batch_chunk_size: usize,

    /// Enable WAL journaling on the SQLite backend
    pub enable_wal: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("rollbook.sqlite3"),
            in_memory: false,
            batch_chunk_size: 400,
            enable_wal: true,
        }
    }
}

impl StoreConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for a store rooted at `path`
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Configuration for an in-memory store
    pub fn in_memory() -> Self {
        Self {
            in_memory: true,
            enable_wal: false,
            ..Self::default()
        }
    }

    /// Set the batch chunk size
    pub fn with_batch_chunk_size(mut self, size: usize) -> Self {
        self.batch_chunk_size = size;
        self
    }

    /// Enable or disable WAL journaling
    pub fn with_wal(mut self, enable: bool) -> Self {
        self.enable_wal = enable;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_chunk_size == 0 {
            return Err("batch_chunk_size must be greater than 0".to_string());
        }

        if self.batch_chunk_size > MAX_BATCH_CHUNK_SIZE {
            return Err(format!(
                "batch_chunk_size must be at most {}",
                MAX_BATCH_CHUNK_SIZE
            ));
        }

        if !self.in_memory && self.path.as_os_str().is_empty() {
            return Err("path must be set for an on-disk store".to_string());
        }

        Ok(())
    }
}
