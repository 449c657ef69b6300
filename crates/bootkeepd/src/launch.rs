//! Launching the supervised application
//!
//! Both the health probe and the supervisor loop start the application
//! through `AppLauncher`, so the command line only differs by mode.

use bootkeep_common::{Config, VersionRecord};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Environment variable telling the application where to write its marker
pub const MARKER_ENV: &str = "BOOTKEEP_HEALTH_MARKER";
/// Environment variable carrying the version being run
pub const VERSION_ENV: &str = "BOOTKEEP_VERSION";

/// A concrete installed version the application can be started from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppTarget {
    pub record: VersionRecord,
    pub artifact: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    Run,
    HealthCheck,
}

#[derive(Debug, Clone)]
pub struct AppLauncher {
    launcher: Vec<String>,
    args: Vec<String>,
    health_args: Vec<String>,
    marker_path: PathBuf,
}

impl AppLauncher {
    pub fn new(
        launcher: Vec<String>,
        args: Vec<String>,
        health_args: Vec<String>,
        marker_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            launcher,
            args,
            health_args,
            marker_path: marker_path.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let app = &config.application;
        Self::new(
            app.launcher.clone(),
            app.args.clone(),
            app.health_args.clone(),
            config.health_marker().path(),
        )
    }

    /// Build the command for `target`. The working directory is the release
    /// directory and the child is killed if its handle is dropped.
    pub fn command(&self, target: &AppTarget, mode: LaunchMode) -> Command {
        let mut cmd = match self.launcher.split_first() {
            Some((program, prefix)) => {
                let mut cmd = Command::new(program);
                cmd.args(prefix).arg(&target.artifact);
                cmd
            }
            None => Command::new(&target.artifact),
        };

        match mode {
            LaunchMode::Run => cmd.args(&self.args),
            LaunchMode::HealthCheck => cmd.args(&self.health_args),
        };

        if let Some(dir) = target.artifact.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }

        cmd.env(MARKER_ENV, &self.marker_path)
            .env(VERSION_ENV, &target.record.version)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!("Launch command ({:?}): {:?}", mode, cmd.as_std());
        cmd
    }
}

/// Stop a child: SIGTERM, wait up to `grace`, then SIGKILL.
pub async fn stop_child(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            warn!("Failed to send SIGTERM to {}: {}", pid, e);
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!("Application ignored SIGTERM for {:?}, killing it", grace);
            child.kill().await?;
            child.wait().await
        }
    }
}
