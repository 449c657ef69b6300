//! Health marker
//!
//! The supervised application creates this file once it considers itself
//! healthy. The engine removes it before every probe, so its presence always
//! refers to the most recently started version.

use crate::fsutil;
use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};

/// File name of the marker inside the state directory
pub const HEALTH_MARKER_FILE: &str = "health_ok";

#[derive(Debug, Clone)]
pub struct HealthMarker {
    path: PathBuf,
}

impl HealthMarker {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(HEALTH_MARKER_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_present(&self) -> bool {
        self.path.exists()
    }

    /// Forget any earlier signal.
    pub fn clear(&self) -> io::Result<()> {
        fsutil::remove_if_exists(&self.path).map(|_| ())
    }

    /// What a healthy application does; the content is informational only.
    pub fn write(&self) -> io::Result<()> {
        fsutil::write_atomic(&self.path, Utc::now().to_rfc3339().as_bytes())
    }
}
