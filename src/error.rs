//! Error types for the storage client
//!
//! None of these ever reach the caller of the public operations. They travel
//! between the internal seams (backends, cache, stats persistence, sinks) and
//! are turned into fallback steps at the component boundary.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// A single upload or retrieval endpoint failed or timed out.
    #[error("Backend unavailable: {backend}: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// The local cache refused a write.
    #[error("Storage quota exceeded: {0}")]
    StorageQuotaExceeded(String),

    #[error("Corrupt persisted stats: {0}")]
    CorruptPersistedStats(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StoreError {
    pub fn unavailable(backend: impl Into<String>, reason: impl ToString) -> Self {
        StoreError::BackendUnavailable {
            backend: backend.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::SerializationError(e.to_string())
    }
}

/// Result type for internal storage operations
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_keeps_kind() {
        let err: StoreError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only").into();
        match err {
            StoreError::IoError(inner) => {
                assert_eq!(inner.kind(), std::io::ErrorKind::PermissionDenied)
            }
            other => panic!("expected IoError, got {:?}", other),
        }
    }

    #[test]
    fn test_unavailable_message() {
        let err = StoreError::unavailable("pinata", "HTTP 401");
        assert_eq!(err.to_string(), "Backend unavailable: pinata: HTTP 401");
    }
}
