//! Version store
//!
//! Durable record of the current and backup versions. Both live in a single
//! JSON document (`versions.json`) so every transition is one atomic replace:
//!
//! - `stage`: new record becomes current, previous confirmed current becomes backup
//! - `promote_backup_to_current`: rollback, failed current is remembered as rejected
//! - `clear_backup`: commit, rollback depth returns to zero
//!
//! Invariant: `backup`, when present, always passed a health check.

use crate::error::StoreError;
use crate::fsutil;
use crate::types::VersionRecord;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name of the store document inside the state directory
pub const VERSIONS_FILE: &str = "versions.json";

/// Persisted store document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreState {
    pub current: VersionRecord,

    #[serde(default)]
    pub backup: Option<VersionRecord>,

    /// False while `current` is staged but not yet health-checked
    #[serde(default)]
    pub confirmed: bool,

    /// Last version that failed its health check and was rolled back
    #[serde(default)]
    pub rejected: Option<VersionRecord>,
}

impl StoreState {
    /// Fresh document for a version nobody has health-checked yet
    pub fn unconfirmed(current: VersionRecord) -> Self {
        Self {
            current,
            backup: None,
            confirmed: false,
            rejected: None,
        }
    }

    /// The most recent version known to have passed a health check
    pub fn last_confirmed(&self) -> Option<&VersionRecord> {
        if self.confirmed {
            Some(&self.current)
        } else {
            self.backup.as_ref()
        }
    }
}

/// Exclusive writer of `versions.json`
#[derive(Debug, Clone)]
pub struct VersionStore {
    path: PathBuf,
}

impl VersionStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(VERSIONS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole document.
    pub fn load(&self) -> Result<StoreState, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::Missing(self.path.clone()));
            }
            Err(e) => return Err(self.corrupt(e.to_string())),
        };

        serde_json::from_slice(&bytes).map_err(|e| self.corrupt(e.to_string()))
    }

    /// Current version record, confirmed or not.
    pub fn read_current(&self) -> Result<VersionRecord, StoreError> {
        self.load().map(|state| state.current)
    }

    /// Install `new_record` as unconfirmed current, keeping the last confirmed
    /// version as backup.
    ///
    /// Staging over an unconfirmed current keeps the existing backup, so the
    /// backup never points at a version that has not been proven healthy.
    pub fn stage(&self, new_record: VersionRecord) -> Result<StoreState, StoreError> {
        let previous = match self.load() {
            Ok(state) => Some(state),
            Err(StoreError::Missing(_)) => None,
            Err(StoreError::Corrupt { reason, .. }) => {
                warn!("Overwriting corrupt version store during stage: {}", reason);
                None
            }
            Err(e) => return Err(e),
        };

        let (backup, rejected) = match previous {
            Some(prev) => {
                let backup = if prev.confirmed {
                    Some(prev.current)
                } else {
                    prev.backup
                };
                (backup, prev.rejected)
            }
            None => (None, None),
        };

        let state = StoreState {
            current: new_record,
            backup,
            confirmed: false,
            rejected,
        };
        self.write(&state)?;

        info!(
            "Staged {} (backup: {})",
            state.current,
            state
                .backup
                .as_ref()
                .map(|b| b.to_string())
                .unwrap_or_else(|| "none".to_string())
        );
        Ok(state)
    }

    /// Roll back: backup becomes confirmed current, failed current is kept as
    /// `rejected`.
    pub fn promote_backup_to_current(&self) -> Result<StoreState, StoreError> {
        let previous = self.load()?;
        let backup = previous.backup.ok_or(StoreError::NoBackup)?;

        let state = StoreState {
            current: backup,
            backup: None,
            confirmed: true,
            rejected: Some(previous.current),
        };
        self.write(&state)?;

        info!("Promoted backup {} to current", state.current);
        Ok(state)
    }

    /// Commit: current is confirmed and the backup is dropped.
    pub fn clear_backup(&self) -> Result<StoreState, StoreError> {
        let mut state = self.load()?;
        state.backup = None;
        state.confirmed = true;
        self.write(&state)?;

        info!("Committed {}", state.current);
        Ok(state)
    }

    /// Replace the document wholesale. Used when rebuilding a corrupt store.
    pub fn reset(&self, state: &StoreState) -> Result<(), StoreError> {
        self.write(state)
    }

    fn write(&self, state: &StoreState) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| StoreError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        fsutil::write_atomic(&self.path, &json)?;
        debug!("Wrote version store {}", self.path.display());
        Ok(())
    }

    fn corrupt(&self, reason: String) -> StoreError {
        StoreError::Corrupt {
            path: self.path.clone(),
            reason,
        }
    }
}
