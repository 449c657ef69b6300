//! Installed release artifacts
//!
//! Layout under the install directory:
//!
//! ```text
//! releases/<version>-<hash12>/<artifact_name>   (mode 0755)
//! releases/<version>-<hash12>/release.json      (VersionRecord)
//! ```
//!
//! Directories are keyed by version and digest, so re-publishing a version
//! with different content never overwrites the artifact a backup points at.

use crate::fsutil;
use crate::types::VersionRecord;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const RELEASES_DIR: &str = "releases";
const RELEASE_RECORD: &str = "release.json";

#[derive(Debug, Clone)]
pub struct ReleaseStore {
    root: PathBuf,
    artifact_name: String,
}

impl ReleaseStore {
    pub fn new(install_dir: &Path, artifact_name: impl Into<String>) -> Self {
        Self {
            root: install_dir.join(RELEASES_DIR),
            artifact_name: artifact_name.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn release_dir(&self, record: &VersionRecord) -> PathBuf {
        self.root
            .join(format!("{}-{}", record.version, record.short_hash()))
    }

    pub fn artifact_path(&self, record: &VersionRecord) -> PathBuf {
        self.release_dir(record).join(&self.artifact_name)
    }

    pub fn contains(&self, record: &VersionRecord) -> bool {
        self.artifact_path(record).is_file()
    }

    /// Write a verified artifact and its record. The artifact lands first so a
    /// `release.json` always describes a complete artifact.
    pub fn install(&self, record: &VersionRecord, artifact: &[u8]) -> io::Result<PathBuf> {
        let dir = self.release_dir(record);
        // The entry in `releases/` must be durable before anything points at it
        fsutil::create_dir_synced(&dir)?;

        let artifact_path = dir.join(&self.artifact_name);
        fsutil::write_atomic_mode(&artifact_path, artifact, 0o755)?;

        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fsutil::write_atomic(&dir.join(RELEASE_RECORD), &json)?;

        info!(
            "Installed {} ({} bytes) at {}",
            record,
            artifact.len(),
            artifact_path.display()
        );
        Ok(artifact_path)
    }

    /// Every installed release with a readable record and artifact.
    pub fn installed(&self) -> Vec<VersionRecord> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut records = Vec::new();
        for entry in entries.flatten() {
            let record_path = entry.path().join(RELEASE_RECORD);
            let record: VersionRecord = match fs::read(&record_path)
                .ok()
                .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            {
                Some(r) => r,
                None => {
                    debug!("Skipping {}: no readable release record", entry.path().display());
                    continue;
                }
            };
            if self.contains(&record) {
                records.push(record);
            }
        }
        records
    }

    /// Installed releases, most recently installed first. Used to rebuild a
    /// corrupt store.
    pub fn installed_newest_first(&self) -> Vec<VersionRecord> {
        let mut records = self.installed();
        records.sort_by(|a, b| b.installed_at.cmp(&a.installed_at));
        records
    }

    /// Delete every release directory not referenced by `keep`.
    pub fn prune(&self, keep: &[&VersionRecord]) -> io::Result<usize> {
        let keep_dirs: Vec<PathBuf> = keep.iter().map(|r| self.release_dir(r)).collect();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() || keep_dirs.contains(&path) {
                continue;
            }
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    debug!("Pruned release {}", path.display());
                    removed += 1;
                }
                Err(e) => warn!("Failed to prune {}: {}", path.display(), e),
            }
        }
        if removed > 0 {
            fsutil::sync_dir(&self.root)?;
        }
        Ok(removed)
    }
}
