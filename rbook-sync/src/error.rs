use thiserror::Error;

/// Failures of the sync layer, classified by how the engine reacts to them
#[derive(Error, Debug)]
pub enum SyncError {
    /// Stored record can never be parsed; discard it
    #[error("Structural error: {0}")]
    Structural(String),

    /// Connectivity failure; retry later without penalty
    #[error("Network error: {0}")]
    Network(String),

    /// A single remote call exceeded its deadline
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// The backend refused the write
    #[error("Remote rejected: {0}")]
    RemoteRejection(String),

    /// A required reference (subject id) could not be recovered
    #[error("Resolution error: {0}")]
    Resolution(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rbook_core::Error),
}

impl SyncError {
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Structural(_) => "STRUCTURAL",
            SyncError::Network(_) => "NETWORK",
            SyncError::Timeout(_) => "TIMEOUT",
            SyncError::RemoteRejection(_) => "REMOTE_REJECTION",
            SyncError::Resolution(_) => "RESOLUTION",
            SyncError::Config(_) => "CONFIG",
            SyncError::Storage(_) => "STORAGE",
        }
    }

    /// Connectivity-class failure (timeouts included)
    pub fn is_network(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::Timeout(_))
    }

    /// Whether a failed delivery should count against the retry budget
    pub fn penalizes_retry(&self) -> bool {
        matches!(self, SyncError::RemoteRejection(_) | SyncError::Resolution(_))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Structural(err.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
