//! Error types for the Stash engine.

use crate::{RecordId, StoreName};
use thiserror::Error;

/// All possible errors from the Stash engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Lookup errors
    #[error("store not found: {0}")]
    StoreNotFound(StoreName),

    #[error("not found: {store}/{id}")]
    NotFound { store: StoreName, id: RecordId },

    // Write errors
    #[error("validation failed for field '{field}': {reason}")]
    Validation { field: String, reason: String },

    #[error("duplicate key in {store}: {id}")]
    DuplicateKey { store: StoreName, id: String },

    #[error("{what} capacity exceeded (limit {limit})")]
    CapacityExceeded { what: String, limit: usize },

    // Backup errors
    #[error("corrupt backup: {0}")]
    CorruptBackup(String),

    #[error("invalid backup: {0}")]
    InvalidBackup(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    // Sync errors
    #[error("network error: {0}")]
    Network(String),

    #[error("device is offline")]
    Offline,

    #[error("a sync cycle is already running")]
    SyncInProgress,

    // Lifecycle errors
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("database is closed")]
    Closed,
}

impl Error {
    /// Shorthand for a validation failure.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether the failure is transient and worth retrying on the next cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Offline | Error::SyncInProgress)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Network(e.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::StoreNotFound("users".into());
        assert_eq!(err.to_string(), "store not found: users");

        let err = Error::DuplicateKey {
            store: "users".into(),
            id: "u1".into(),
        };
        assert_eq!(err.to_string(), "duplicate key in users: u1");

        let err = Error::validation("email", "must be a valid email address");
        assert_eq!(
            err.to_string(),
            "validation failed for field 'email': must be a valid email address"
        );
    }

    #[test]
    fn retryable_errors() {
        assert!(Error::Network("timeout".into()).is_retryable());
        assert!(Error::Offline.is_retryable());
        assert!(!Error::CorruptBackup("checksum".into()).is_retryable());
    }
}
