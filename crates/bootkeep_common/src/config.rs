//! Supervisor configuration
//!
//! Config file: /etc/bootkeep/config.toml (override with `--config` or
//! `BOOTKEEP_CONFIG`). Every field has a default, so an empty file is valid.

use crate::exit::EXIT_FORCE_UPDATE;
use crate::marker::HealthMarker;
use crate::releases::ReleaseStore;
use crate::store::VersionStore;
use crate::trigger::ForceUpdateTrigger;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/bootkeep/config.toml";
pub const CONFIG_ENV: &str = "BOOTKEEP_CONFIG";
pub const MANIFEST_URL_ENV: &str = "BOOTKEEP_MANIFEST_URL";

/// Manifest and artifact endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub manifest_url: String,
    /// Sent to the manifest endpoint as `device_uid` when non-empty
    pub device_uid: String,
    pub fetch_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub download_retries: u32,
    pub retry_delay_secs: u64,
    pub max_artifact_bytes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            manifest_url: "http://127.0.0.1:10900/api/device/manifest".to_string(),
            device_uid: String::new(),
            fetch_timeout_secs: 30,
            download_timeout_secs: 60,
            download_retries: 3,
            retry_delay_secs: 5,
            max_artifact_bytes: 64 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn device_uid(&self) -> Option<&str> {
        let uid = self.device_uid.trim();
        (!uid.is_empty()).then_some(uid)
    }
}

/// Where persisted state and installed releases live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub state_dir: PathBuf,
    pub install_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/bootkeep"),
            install_dir: PathBuf::from("/opt/bootkeep"),
        }
    }
}

/// How the supervised application is launched and judged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// File name of the artifact inside each release directory
    pub artifact_name: String,
    /// Interpreter prefix; empty runs the artifact directly
    pub launcher: Vec<String>,
    /// Extra arguments for normal runs
    pub args: Vec<String>,
    /// Arguments appended for a health probe run
    pub health_args: Vec<String>,
    pub health_timeout_secs: u64,
    pub health_poll_millis: u64,
    /// Exit code that counts as healthy during a probe; `None` requires the marker
    pub healthy_exit_code: Option<i32>,
    pub force_update_exit_code: i32,
    pub restart_backoff_secs: u64,
    pub stop_grace_secs: u64,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            artifact_name: "main.py".to_string(),
            launcher: vec!["python3".to_string()],
            args: Vec::new(),
            health_args: vec!["--health-check".to_string()],
            health_timeout_secs: 30,
            health_poll_millis: 1000,
            healthy_exit_code: None,
            force_update_exit_code: EXIT_FORCE_UPDATE,
            restart_backoff_secs: 30,
            stop_grace_secs: 10,
        }
    }
}

impl ApplicationConfig {
    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn health_poll(&self) -> Duration {
        Duration::from_millis(self.health_poll_millis)
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_secs(self.restart_backoff_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

/// Main bootkeep configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub application: ApplicationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            server: ServerConfig::default(),
            paths: PathsConfig::default(),
            application: ApplicationConfig::default(),
        }
    }
}

impl Config {
    /// Config path from the command line, then `BOOTKEEP_CONFIG`, then the default.
    pub fn resolve_path(cli: Option<&Path>) -> PathBuf {
        if let Some(path) = cli {
            return path.to_path_buf();
        }
        match std::env::var(CONFIG_ENV) {
            Ok(p) if !p.trim().is_empty() => PathBuf::from(p),
            _ => PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }

    fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse config TOML")
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config = Self::parse(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate `path`, applying environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Load `path` with overrides taken from `lookup`, validating the merged result once.
    pub fn load_with(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config = Self::parse(&contents)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        config.apply_overrides_from(lookup);
        config
            .validate()
            .with_context(|| format!("Invalid config {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Like `load`, but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("No config at {}, using defaults", path.display());
            let mut config = Self::default();
            config.apply_env_overrides();
            config.validate()?;
            return Ok(config);
        }
        Self::load(path)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(MANIFEST_URL_ENV) {
            if !url.trim().is_empty() {
                self.server.manifest_url = url.trim().to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        let app = &self.application;

        if server.manifest_url.trim().is_empty() {
            bail!("server.manifest_url must not be empty");
        }
        if server.fetch_timeout_secs == 0 || server.download_timeout_secs == 0 {
            bail!("server timeouts must be at least one second");
        }
        if app.artifact_name.trim().is_empty() || app.artifact_name.contains('/') {
            bail!("application.artifact_name must be a plain file name");
        }
        if app.health_timeout_secs == 0 {
            bail!("application.health_timeout_secs must be at least one second");
        }
        if app.health_poll_millis == 0 {
            bail!("application.health_poll_millis must be positive");
        }
        if app.force_update_exit_code == 0 {
            bail!("application.force_update_exit_code must not be 0 (reserved for stop)");
        }
        if app.healthy_exit_code == Some(app.force_update_exit_code) {
            bail!("application.healthy_exit_code must differ from force_update_exit_code");
        }
        Ok(())
    }

    pub fn version_store(&self) -> VersionStore {
        VersionStore::new(&self.paths.state_dir)
    }

    pub fn health_marker(&self) -> HealthMarker {
        HealthMarker::new(&self.paths.state_dir)
    }

    pub fn force_update_trigger(&self) -> ForceUpdateTrigger {
        ForceUpdateTrigger::new(&self.paths.state_dir)
    }

    pub fn release_store(&self) -> ReleaseStore {
        ReleaseStore::new(&self.paths.install_dir, self.application.artifact_name.clone())
    }
}
