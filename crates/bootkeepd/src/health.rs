//! Health monitor
//!
//! Starts the staged application in health-check mode and waits for an
//! explicit liveness signal: the health marker appearing, or (if configured)
//! a designated exit code. No signal inside the window is never success.

use crate::launch::{stop_child, AppLauncher, AppTarget, LaunchMode};
use async_trait::async_trait;
use bootkeep_common::{Config, HealthMarker};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Verdict of one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    Healthy,
    Unhealthy,
    Timeout,
}

/// Sole authority on whether a staged version is good
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, target: &AppTarget, timeout: Duration) -> ProbeResult;
}

/// Probe that runs the real application as a child process
pub struct ProcessHealthMonitor {
    launcher: AppLauncher,
    marker: HealthMarker,
    poll_interval: Duration,
    healthy_exit_code: Option<i32>,
    stop_grace: Duration,
}

impl ProcessHealthMonitor {
    pub fn new(
        launcher: AppLauncher,
        marker: HealthMarker,
        poll_interval: Duration,
        healthy_exit_code: Option<i32>,
        stop_grace: Duration,
    ) -> Self {
        Self {
            launcher,
            marker,
            poll_interval,
            healthy_exit_code,
            stop_grace,
        }
    }

    pub fn from_config(launcher: AppLauncher, config: &Config) -> Self {
        let app = &config.application;
        Self::new(
            launcher,
            config.health_marker(),
            app.health_poll(),
            app.healthy_exit_code,
            app.stop_grace(),
        )
    }
}

#[async_trait]
impl HealthProbe for ProcessHealthMonitor {
    async fn probe(&self, target: &AppTarget, timeout: Duration) -> ProbeResult {
        // A stale marker would make any version look healthy
        if let Err(e) = self.marker.clear() {
            error!("Cannot clear health marker {}: {}", self.marker.path().display(), e);
            return ProbeResult::Unhealthy;
        }

        info!(
            "Starting health check of {} (window {:?})",
            target.record, timeout
        );
        let mut child = match self.launcher.command(target, LaunchMode::HealthCheck).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start {}: {}", target.artifact.display(), e);
                return ProbeResult::Unhealthy;
            }
        };

        let deadline = Instant::now() + timeout;
        loop {
            if self.marker.is_present() {
                info!("Health check PASSED: marker written by {}", target.record);
                if let Err(e) = stop_child(&mut child, self.stop_grace).await {
                    warn!("Failed to stop health-check process: {}", e);
                }
                return ProbeResult::Healthy;
            }

            match child.try_wait() {
                Ok(Some(status)) => {
                    // The marker may have been written just before exiting
                    if self.marker.is_present() {
                        info!("Health check PASSED: marker written before exit");
                        return ProbeResult::Healthy;
                    }
                    if status.code().is_some() && status.code() == self.healthy_exit_code {
                        info!("Health check PASSED: exit code {}", status);
                        return ProbeResult::Healthy;
                    }
                    warn!("Health check FAILED: process exited with {}", status);
                    return ProbeResult::Unhealthy;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Health check FAILED: cannot poll process: {}", e);
                    let _ = stop_child(&mut child, self.stop_grace).await;
                    return ProbeResult::Unhealthy;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("Health check TIMEOUT after {:?}", timeout);
                if let Err(e) = stop_child(&mut child, self.stop_grace).await {
                    warn!("Failed to stop health-check process: {}", e);
                }
                return ProbeResult::Timeout;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}
