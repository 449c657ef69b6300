//! Core records exchanged between the manifest endpoint, the version store
//! and the update engine.

use crate::error::UpdateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Installed version as persisted in the version store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: String,
    /// Lowercase hex SHA-256 of the installed artifact
    pub artifact_hash: String,
    pub installed_at: DateTime<Utc>,
}

impl VersionRecord {
    pub fn new(version: impl Into<String>, artifact_hash: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            artifact_hash: artifact_hash.into().to_ascii_lowercase(),
            installed_at: Utc::now(),
        }
    }

    /// True when the manifest describes exactly this installed artifact.
    pub fn matches(&self, manifest: &Manifest) -> bool {
        self.version == manifest.version
            && self
                .artifact_hash
                .eq_ignore_ascii_case(manifest.artifact_hash.trim())
    }

    /// First 12 hex digits, used for directory names and log lines.
    pub fn short_hash(&self) -> &str {
        let end = self.artifact_hash.len().min(12);
        self.artifact_hash.get(..end).unwrap_or(&self.artifact_hash)
    }
}

impl fmt::Display for VersionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.version, self.short_hash())
    }
}

/// Latest available version as described by the remote endpoint.
/// Fetched fresh each cycle and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    #[serde(default)]
    pub artifact_url: String,
    #[serde(alias = "hash")]
    pub artifact_hash: String,
    #[serde(default)]
    pub changelog: String,
}

impl Manifest {
    /// Schema checks beyond what serde enforces.
    pub fn validate(&self) -> Result<(), String> {
        validate_version(&self.version)?;
        if self.artifact_hash.trim().is_empty() {
            return Err("manifest has no artifact_hash".to_string());
        }
        if self.artifact_url.trim().is_empty() {
            return Err("manifest has no artifact_url".to_string());
        }
        Ok(())
    }
}

/// Version strings end up as directory names, so keep them boring.
pub fn validate_version(version: &str) -> Result<(), String> {
    if version.trim().is_empty() {
        return Err("empty version".to_string());
    }
    if version.len() > 64 {
        return Err(format!("version too long ({} bytes)", version.len()));
    }
    if version == "." || version.contains("..") {
        return Err(format!("version {:?} is not a valid path component", version));
    }
    if version
        .chars()
        .any(|c| c == '/' || c == '\\' || c.is_control() || c.is_whitespace())
    {
        return Err(format!("version {:?} contains forbidden characters", version));
    }
    Ok(())
}

/// Result of one update attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    NoUpdateAvailable,
    Applied,
    AppliedAndRolledBack,
    Failed(UpdateError),
}

impl UpdateOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, UpdateOutcome::Failed(e) if e.is_fatal())
    }
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateOutcome::NoUpdateAvailable => write!(f, "no update available"),
            UpdateOutcome::Applied => write!(f, "update applied"),
            UpdateOutcome::AppliedAndRolledBack => write!(f, "update applied and rolled back"),
            UpdateOutcome::Failed(e) => write!(f, "update failed ({}): {}", e.kind(), e),
        }
    }
}
