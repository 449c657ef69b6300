//! `bootkeepctl status`

use bootkeep_common::{Config, StoreError, StoreState, VersionRecord};
use owo_colors::OwoColorize;
use serde::Serialize;
use std::fmt::Write;
use std::path::PathBuf;

/// What the version store currently says
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StoreStatus {
    /// Nothing installed yet
    Empty,
    Ok(StoreState),
    /// Unreadable; the daemon rebuilds it on its next cycle
    Corrupt { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub version: String,
    pub state_dir: PathBuf,
    pub install_dir: PathBuf,
    pub store: StoreStatus,
    pub health_marker_present: bool,
    pub force_update_pending: bool,
    pub installed_releases: Vec<VersionRecord>,
}

impl StatusReport {
    /// Version the supervisor would start right now
    pub fn runnable(&self) -> Option<&VersionRecord> {
        match &self.store {
            StoreStatus::Ok(state) => state.last_confirmed(),
            _ => None,
        }
    }
}

/// Gather status from disk. Never fails; problems are part of the report.
pub fn collect(config: &Config) -> StatusReport {
    let store = match config.version_store().load() {
        Ok(state) => StoreStatus::Ok(state),
        Err(StoreError::Missing(_)) => StoreStatus::Empty,
        Err(e) => StoreStatus::Corrupt {
            reason: e.to_string(),
        },
    };

    let mut installed_releases = config.release_store().installed();
    installed_releases.sort_by(|a, b| a.installed_at.cmp(&b.installed_at));

    StatusReport {
        version: bootkeep_common::VERSION.to_string(),
        state_dir: config.paths.state_dir.clone(),
        install_dir: config.paths.install_dir.clone(),
        store,
        health_marker_present: config.health_marker().is_present(),
        force_update_pending: config.force_update_trigger().is_pending(),
        installed_releases,
    }
}

fn record_line(record: &VersionRecord) -> String {
    format!(
        "{} ({}, installed {})",
        record.version,
        record.short_hash(),
        record.installed_at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

/// Human-readable rendering, ASCII only.
pub fn render(report: &StatusReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "bootkeep v{}", report.version);
    let _ = writeln!(out, "  state:    {}", report.state_dir.display());
    let _ = writeln!(out, "  releases: {}", report.install_dir.display());
    let _ = writeln!(out);

    match &report.store {
        StoreStatus::Empty => {
            let _ = writeln!(out, "{} no version installed yet", "[EMPTY]".yellow());
        }
        StoreStatus::Corrupt { reason } => {
            let _ = writeln!(out, "{} version store unreadable", "[CORRUPT]".bright_red());
            let _ = writeln!(out, "  {}", reason);
        }
        StoreStatus::Ok(state) => {
            let tag = if state.confirmed {
                "[OK]".bright_green().to_string()
            } else {
                "[UNCONFIRMED]".yellow().to_string()
            };
            let _ = writeln!(out, "{} current:  {}", tag, record_line(&state.current));
            if let Some(backup) = &state.backup {
                let _ = writeln!(out, "     backup:   {}", record_line(backup));
            }
            if let Some(rejected) = &state.rejected {
                let _ = writeln!(
                    out,
                    "     rejected: {}",
                    record_line(rejected).dimmed()
                );
            }
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "  health marker:        {}",
        if report.health_marker_present { "present" } else { "absent" }
    );
    let _ = writeln!(
        out,
        "  force update pending: {}",
        if report.force_update_pending { "yes" } else { "no" }
    );
    let _ = writeln!(out, "  installed releases:   {}", report.installed_releases.len());
    out
}
