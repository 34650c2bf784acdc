use thiserror::Error;

/// Unified error type for velum operations
#[derive(Debug, Error)]
pub enum VelumError {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Storage errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // CRDT engine errors (decode/apply/merge failures)
    #[error("CRDT error: {0}")]
    Crdt(String),

    // Lookup errors: rejected synchronously, no partial effect
    #[error("Version {version} not found for room '{room}'")]
    VersionNotFound { room: String, version: i64 },

    #[error("Tag {0} not found")]
    TagNotFound(i64),

    #[error("Snapshot {snapshot} not found for room '{room}'")]
    SnapshotNotFound { room: String, snapshot: i64 },
}

/// Result type alias for velum operations
pub type Result<T> = std::result::Result<T, VelumError>;

impl VelumError {
    /// Whether this error is a "not found" rejection (maps to HTTP 404).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            VelumError::VersionNotFound { .. }
                | VelumError::TagNotFound(_)
                | VelumError::SnapshotNotFound { .. }
        )
    }
}
