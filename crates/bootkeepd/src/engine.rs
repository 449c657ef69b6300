//! Update engine
//!
//! ```text
//! Idle -> CheckingManifest -> Downloading -> Verifying -> Staged
//!      -> HealthChecking -> Committed | RollingBack -> Idle
//! ```
//!
//! Persisted state is only touched once an artifact has been verified. A
//! staged version either passes its health probe and is committed, or the
//! previous confirmed version is promoted back. On startup an unconfirmed
//! version left behind by a crash is probed again before anything else.

use crate::health::{HealthProbe, ProbeResult};
use crate::launch::AppTarget;
use crate::source::UpdateSource;
use bootkeep_common::{
    verify, Config, HealthMarker, ReleaseStore, StoreError, StoreState, UpdateError,
    UpdateOutcome, VersionRecord, VersionStore,
};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    CheckingManifest,
    Downloading,
    Verifying,
    Staged,
    HealthChecking,
    Committed,
    RollingBack,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Idle => "Idle",
            EngineState::CheckingManifest => "CheckingManifest",
            EngineState::Downloading => "Downloading",
            EngineState::Verifying => "Verifying",
            EngineState::Staged => "Staged(Unconfirmed)",
            EngineState::HealthChecking => "HealthChecking",
            EngineState::Committed => "Committed",
            EngineState::RollingBack => "RollingBack",
        };
        f.write_str(name)
    }
}

pub struct UpdateEngine<S, P> {
    source: S,
    probe: P,
    store: VersionStore,
    releases: ReleaseStore,
    marker: HealthMarker,
    health_timeout: Duration,
    state: EngineState,
    /// What the supervisor should run when the cycle is over
    last_known_good: Option<VersionRecord>,
}

impl<S: UpdateSource, P: HealthProbe> UpdateEngine<S, P> {
    pub fn new(
        source: S,
        probe: P,
        store: VersionStore,
        releases: ReleaseStore,
        marker: HealthMarker,
        health_timeout: Duration,
    ) -> Self {
        Self {
            source,
            probe,
            store,
            releases,
            marker,
            health_timeout,
            state: EngineState::Idle,
            last_known_good: None,
        }
    }

    pub fn from_config(source: S, probe: P, config: &Config) -> Self {
        Self::new(
            source,
            probe,
            config.version_store(),
            config.release_store(),
            config.health_marker(),
            config.application.health_timeout(),
        )
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn last_known_good(&self) -> Option<&VersionRecord> {
        self.last_known_good.as_ref()
    }

    /// Version the supervisor should run, if any is known to be good.
    pub fn run_target(&self) -> Option<AppTarget> {
        self.last_known_good.as_ref().map(|record| self.target(record))
    }

    /// One full cycle: crash recovery first, then the manifest check.
    pub async fn run_cycle(&mut self) -> UpdateOutcome {
        let recovery = self.recover().await;
        if let Some(outcome) = &recovery {
            info!("Recovery finished: {}", outcome);
            if outcome.is_fatal() {
                return outcome.clone();
            }
        }

        let checked = self.check_for_update().await;
        match recovery {
            // The check applied nothing, so the recovery is what this cycle did
            Some(outcome) if !checked.is_fatal() && !applied(&checked) => {
                if let UpdateOutcome::Failed(e) = &checked {
                    warn!("Manifest check after recovery failed: {}", e);
                }
                outcome
            }
            _ => checked,
        }
    }

    /// Resolve an unconfirmed or unreadable store left by an unclean shutdown.
    ///
    /// Returns `None` when there was nothing to recover.
    pub async fn recover(&mut self) -> Option<UpdateOutcome> {
        let state = match self.store.load() {
            Ok(state) => state,
            Err(StoreError::Missing(_)) => {
                debug!("No version store yet, nothing to recover");
                self.last_known_good = None;
                return None;
            }
            Err(StoreError::Corrupt { reason, .. }) => {
                warn!("Version store corrupt ({}), rebuilding from installed releases", reason);
                match self.rebuild_store() {
                    Ok(Some(state)) => state,
                    Ok(None) => {
                        warn!("No installed release to recover, treating store as empty");
                        self.last_known_good = None;
                        return None;
                    }
                    Err(e) => return Some(UpdateOutcome::Failed(e)),
                }
            }
            Err(e) => return Some(UpdateOutcome::Failed(e.into())),
        };

        if state.confirmed {
            self.last_known_good = Some(state.current);
            return None;
        }

        self.last_known_good = state.backup.clone();
        self.transition(EngineState::Staged);

        if self.marker.is_present() {
            info!(
                "{} reported healthy before the last shutdown, committing",
                state.current
            );
            self.transition(EngineState::HealthChecking);
            return Some(self.commit(&state));
        }

        warn!(
            "Found unconfirmed {} from an unclean shutdown, re-running health check",
            state.current
        );
        Some(self.health_gate(&state).await)
    }

    /// Compare the remote manifest against the installed version and apply it.
    pub async fn check_for_update(&mut self) -> UpdateOutcome {
        self.transition(EngineState::CheckingManifest);

        let installed = match self.store.load() {
            Ok(state) => Some(state),
            Err(StoreError::Missing(_)) => None,
            Err(StoreError::Corrupt { reason, .. }) => {
                // Nothing to rebuild from; staging replaces the document
                warn!("Version store unreadable ({}), treating device as empty", reason);
                None
            }
            Err(e) => return self.idle(UpdateOutcome::Failed(e.into())),
        };

        let manifest = match self
            .source
            .fetch_manifest(installed.as_ref().map(|s| &s.current))
            .await
        {
            Ok(m) => m,
            Err(e) => {
                warn!("Manifest check failed, keeping local version: {}", e);
                return self.idle(UpdateOutcome::Failed(e));
            }
        };

        if let Some(state) = &installed {
            if state.current.matches(&manifest) {
                info!("Already up to date: {}", state.current);
                return self.idle(UpdateOutcome::NoUpdateAvailable);
            }
            if let Some(rejected) = state.rejected.as_ref().filter(|r| r.matches(&manifest)) {
                info!(
                    "Manifest still offers {}, which was rolled back; skipping",
                    rejected
                );
                return self.idle(UpdateOutcome::NoUpdateAvailable);
            }
        }

        info!(
            "Update available: {} -> {}",
            installed
                .as_ref()
                .map(|s| s.current.version.as_str())
                .unwrap_or("none"),
            manifest.version
        );
        if !manifest.changelog.trim().is_empty() {
            info!("Changelog: {}", manifest.changelog.trim());
        }

        self.transition(EngineState::Downloading);
        let artifact = match self.source.download_artifact(&manifest).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Download failed, keeping local version: {}", e);
                return self.idle(UpdateOutcome::Failed(e));
            }
        };

        self.transition(EngineState::Verifying);
        let digest = match verify(&artifact, &manifest.artifact_hash) {
            Ok(digest) => digest,
            Err(e) => {
                error!("Rejecting artifact for {}: {}", manifest.version, e);
                return self.idle(UpdateOutcome::Failed(e.into()));
            }
        };
        let record = VersionRecord::new(manifest.version.clone(), digest);

        if let Err(e) = self.releases.install(&record, &artifact) {
            return self.idle(self.storage_failure("install artifact", e));
        }
        if let Err(e) = self.marker.clear() {
            return self.idle(self.storage_failure("clear health marker", e));
        }

        let staged = match self.store.stage(record) {
            Ok(state) => state,
            Err(e) => return self.idle(UpdateOutcome::Failed(e.into())),
        };
        self.transition(EngineState::Staged);

        self.health_gate(&staged).await
    }

    /// Probe the staged current version and commit or roll back.
    async fn health_gate(&mut self, staged: &StoreState) -> UpdateOutcome {
        self.transition(EngineState::HealthChecking);

        let target = self.target(&staged.current);
        let result = self.probe.probe(&target, self.health_timeout).await;

        match result {
            ProbeResult::Healthy => self.commit(staged),
            ProbeResult::Unhealthy | ProbeResult::Timeout => self.roll_back(staged, result),
        }
    }

    fn commit(&mut self, staged: &StoreState) -> UpdateOutcome {
        // Proven healthy even if the commit write fails below
        self.last_known_good = Some(staged.current.clone());

        let committed = match self.store.clear_backup() {
            Ok(state) => state,
            Err(e) => return self.idle(UpdateOutcome::Failed(e.into())),
        };
        self.transition(EngineState::Committed);
        info!("Update to {} committed", committed.current);

        self.prune(&[&committed.current]);
        self.idle(UpdateOutcome::Applied)
    }

    fn roll_back(&mut self, staged: &StoreState, result: ProbeResult) -> UpdateOutcome {
        let Some(backup) = staged.backup.clone() else {
            error!(
                "{} failed its health check ({:?}) and there is no backup to roll back to",
                staged.current, result
            );
            self.last_known_good = None;
            return self.idle(UpdateOutcome::Failed(UpdateError::HealthCheckFailure(format!(
                "{} reported {:?} and no previous version exists",
                staged.current.version, result
            ))));
        };

        self.transition(EngineState::RollingBack);
        warn!(
            "{} failed its health check ({:?}), rolling back to {}",
            staged.current, result, backup
        );
        self.last_known_good = Some(backup);

        let restored = match self.store.promote_backup_to_current() {
            Ok(state) => state,
            Err(e) => return self.idle(UpdateOutcome::Failed(e.into())),
        };
        info!("Rolled back to {}", restored.current);

        self.prune(&[&restored.current]);
        self.idle(UpdateOutcome::AppliedAndRolledBack)
    }

    /// Rebuild a corrupt store from the newest installed release, unconfirmed.
    ///
    /// Releases are pruned down to the current one on every commit and
    /// rollback, so a second release on disk is the last committed version
    /// and becomes the backup.
    fn rebuild_store(&mut self) -> Result<Option<StoreState>, UpdateError> {
        let mut installed = self.releases.installed_newest_first().into_iter();
        let Some(newest) = installed.next() else {
            return Ok(None);
        };

        let mut state = StoreState::unconfirmed(newest);
        state.backup = installed.next();
        info!(
            "Recovering {} from the release directory (backup: {})",
            state.current,
            state
                .backup
                .as_ref()
                .map(|b| b.to_string())
                .unwrap_or_else(|| "none".to_string())
        );

        // Whatever marker is lying around predates the rebuild
        let written = self
            .marker
            .clear()
            .map_err(|e| UpdateError::IrrecoverableStore(format!("clear health marker: {}", e)))
            .and_then(|()| self.store.reset(&state).map_err(UpdateError::from));

        if let Err(e) = written {
            // Updates stop here; keep running what is on disk
            self.last_known_good = state.backup.or(Some(state.current));
            return Err(e);
        }
        Ok(Some(state))
    }

    fn prune(&self, keep: &[&VersionRecord]) {
        match self.releases.prune(keep) {
            Ok(0) => {}
            Ok(n) => debug!("Pruned {} old release(s)", n),
            Err(e) => warn!("Failed to prune old releases: {}", e),
        }
    }

    fn storage_failure(&self, what: &str, e: std::io::Error) -> UpdateOutcome {
        UpdateOutcome::Failed(UpdateError::IrrecoverableStore(format!("{}: {}", what, e)))
    }

    fn target(&self, record: &VersionRecord) -> AppTarget {
        AppTarget {
            record: record.clone(),
            artifact: self.releases.artifact_path(record),
        }
    }

    fn transition(&mut self, next: EngineState) {
        if self.state != next {
            info!("Update engine: {} -> {}", self.state, next);
            self.state = next;
        }
    }

    fn idle(&mut self, outcome: UpdateOutcome) -> UpdateOutcome {
        self.transition(EngineState::Idle);
        outcome
    }
}

fn applied(outcome: &UpdateOutcome) -> bool {
    matches!(
        outcome,
        UpdateOutcome::Applied | UpdateOutcome::AppliedAndRolledBack
    )
}
