//! Bootkeep Daemon - device-side OTA update supervisor
//!
//! Keeps the device on a working application version: fetches the remote
//! manifest, verifies and stages new artifacts, health-checks them, and
//! commits or rolls back. The supervisor itself is never updated.

pub mod engine;
pub mod health;
pub mod launch;
pub mod source;
pub mod supervisor;

pub use engine::{EngineState, UpdateEngine};
pub use health::{HealthProbe, ProbeResult, ProcessHealthMonitor};
pub use launch::{AppLauncher, AppTarget, LaunchMode};
pub use source::{HttpUpdateSource, UpdateSource};
pub use supervisor::{SignalEvent, SignalListener, Supervisor, SupervisorSettings};

use anyhow::Result;
use bootkeep_common::Config;

/// Engine wired to the real HTTP endpoint and process-based health probe
pub type DeviceEngine = UpdateEngine<HttpUpdateSource, ProcessHealthMonitor>;

/// Build the production engine from configuration.
pub fn build_engine(config: &Config) -> Result<DeviceEngine> {
    let source = HttpUpdateSource::from_config(&config.server)?;
    let launcher = AppLauncher::from_config(config);
    let probe = ProcessHealthMonitor::from_config(launcher, config);
    Ok(UpdateEngine::from_config(source, probe, config))
}

/// Build the supervisor loop around the production engine.
pub fn build_supervisor(config: &Config) -> Result<Supervisor<HttpUpdateSource, ProcessHealthMonitor>> {
    let engine = build_engine(config)?;
    Ok(Supervisor::from_config(engine, config))
}
