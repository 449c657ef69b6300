//! Force-update trigger file
//!
//! An external controller (operator CLI, remote-control agent) raises the
//! trigger; the supervisor consumes it and runs the update engine at once.

use crate::fsutil;
use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};

/// File name of the trigger inside the state directory
pub const FORCE_UPDATE_FILE: &str = "force_update";

#[derive(Debug, Clone)]
pub struct ForceUpdateTrigger {
    path: PathBuf,
}

impl ForceUpdateTrigger {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(FORCE_UPDATE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn raise(&self) -> io::Result<()> {
        fsutil::write_atomic(&self.path, Utc::now().to_rfc3339().as_bytes())
    }

    pub fn is_pending(&self) -> bool {
        self.path.exists()
    }

    /// Consume the trigger. Returns true if one was pending.
    pub fn take(&self) -> io::Result<bool> {
        fsutil::remove_if_exists(&self.path)
    }
}
