//! Error taxonomy for the update path.
//!
//! Everything except `UpdateError::IrrecoverableStore` is absorbed by the
//! engine and resolved on the next cycle or by rolling back.

use std::path::PathBuf;
use thiserror::Error;

/// Artifact verification failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("hash mismatch: expected {expected:?}, got {actual}")]
    HashMismatch { expected: String, actual: String },
}

/// Version store failure
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no version record at {}", .0.display())]
    Missing(PathBuf),

    #[error("version record at {} is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("no backup version to promote")]
    NoBackup,

    #[error("version store write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of one update attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    /// Manifest or artifact unreachable, timed out, or malformed
    #[error("network error: {0}")]
    Network(String),

    /// Downloaded artifact does not match the manifest digest
    #[error("integrity error: {0}")]
    Integrity(#[from] VerifyError),

    /// Persisted version record unreadable
    #[error("version store corrupt: {0}")]
    StoreCorrupt(String),

    /// Staged version never became healthy and could not be rolled back
    #[error("health check failed: {0}")]
    HealthCheckFailure(String),

    /// Durable storage cannot be written at all
    #[error("storage cannot be written: {0}")]
    IrrecoverableStore(String),
}

impl UpdateError {
    /// Only storage unavailability stops the supervisor from updating.
    pub fn is_fatal(&self) -> bool {
        matches!(self, UpdateError::IrrecoverableStore(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            UpdateError::Network(_) => "NetworkError",
            UpdateError::Integrity(_) => "IntegrityError",
            UpdateError::StoreCorrupt(_) => "StoreCorrupt",
            UpdateError::HealthCheckFailure(_) => "HealthCheckFailure",
            UpdateError::IrrecoverableStore(_) => "IrrecoverableStoreFailure",
        }
    }
}

impl From<StoreError> for UpdateError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Missing(_) | StoreError::Corrupt { .. } => {
                UpdateError::StoreCorrupt(e.to_string())
            }
            StoreError::NoBackup => UpdateError::HealthCheckFailure(e.to_string()),
            StoreError::Io(_) => UpdateError::IrrecoverableStore(e.to_string()),
        }
    }
}
