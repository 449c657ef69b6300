//! Update engine scenarios against an in-memory update source and a
//! scripted health probe.

mod common;

use bootkeep_common::{sha256_hex, Config, StoreState, UpdateError, UpdateOutcome, VersionRecord};
use bootkeepd::{EngineState, ProbeResult, UpdateEngine};
use common::{FakeSource, ScriptedProbe};
use std::fs;
use tempfile::TempDir;

struct Device {
    _dir: TempDir,
    config: Config,
    source: FakeSource,
    probe: ScriptedProbe,
}

impl Device {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.state_dir = dir.path().join("state");
        config.paths.install_dir = dir.path().join("opt");
        Self {
            _dir: dir,
            config,
            source: FakeSource::default(),
            probe: ScriptedProbe::default(),
        }
    }

    /// A fresh engine, as after a reboot
    fn engine(&self) -> UpdateEngine<FakeSource, ScriptedProbe> {
        UpdateEngine::from_config(self.source.clone(), self.probe.clone(), &self.config)
    }

    fn state(&self) -> StoreState {
        self.config.version_store().load().unwrap()
    }

    fn store_bytes(&self) -> Vec<u8> {
        fs::read(self.config.version_store().path()).unwrap()
    }

    /// Install and commit `version` through the engine.
    async fn install(&self, version: &str, artifact: &[u8]) -> VersionRecord {
        self.source.publish(version, artifact);
        let outcome = self.engine().run_cycle().await;
        assert_eq!(outcome, UpdateOutcome::Applied);
        self.state().current
    }
}

#[tokio::test]
async fn test_first_install_is_applied_and_committed() {
    let device = Device::new();
    device.source.publish("1.0.0", b"print('v1')\n");

    let mut engine = device.engine();
    let outcome = engine.run_cycle().await;

    assert_eq!(outcome, UpdateOutcome::Applied);
    assert_eq!(engine.state(), EngineState::Idle);

    let state = device.state();
    assert_eq!(state.current.version, "1.0.0");
    assert_eq!(state.current.artifact_hash, sha256_hex(b"print('v1')\n"));
    assert!(state.confirmed);
    assert!(state.backup.is_none());

    let target = engine.run_target().unwrap();
    assert_eq!(target.record, state.current);
    assert_eq!(fs::read(&target.artifact).unwrap(), b"print('v1')\n");
}

#[tokio::test]
async fn test_update_replaces_current() {
    let device = Device::new();
    device.install("1.0.0", b"v1").await;

    device.source.publish("1.0.1", b"v2");
    let mut engine = device.engine();
    assert_eq!(engine.run_cycle().await, UpdateOutcome::Applied);

    let state = device.state();
    assert_eq!(state.current.version, "1.0.1");
    assert!(state.confirmed);
    assert!(state.backup.is_none());
    assert_eq!(engine.last_known_good(), Some(&state.current));

    // Superseded release is pruned once the new one is committed
    let releases = device.config.release_store().installed();
    assert_eq!(releases, vec![state.current.clone()]);
}

#[tokio::test]
async fn test_health_timeout_rolls_back_to_identical_record() {
    let device = Device::new();
    let v1 = device.install("1.0.0", b"v1").await;

    device.source.publish("1.0.1", b"v2-hangs");
    device.probe.then(ProbeResult::Timeout);

    let mut engine = device.engine();
    let outcome = engine.run_cycle().await;
    assert_eq!(outcome, UpdateOutcome::AppliedAndRolledBack);

    let state = device.state();
    assert_eq!(state.current, v1);
    assert!(state.confirmed);
    assert!(state.backup.is_none());
    assert_eq!(state.rejected.as_ref().map(|r| r.version.as_str()), Some("1.0.1"));

    assert_eq!(engine.last_known_good(), Some(&v1));
    assert_eq!(engine.state(), EngineState::Idle);
    assert!(fs::read(engine.run_target().unwrap().artifact).is_ok());
}

#[tokio::test]
async fn test_unhealthy_update_rolls_back() {
    let device = Device::new();
    let v1 = device.install("1.0.0", b"v1").await;

    device.source.publish("1.0.1", b"v2-crashes");
    device.probe.then(ProbeResult::Unhealthy);

    let outcome = device.engine().run_cycle().await;
    assert_eq!(outcome, UpdateOutcome::AppliedAndRolledBack);
    assert_eq!(device.state().current, v1);
}

#[tokio::test]
async fn test_rolled_back_release_is_not_retried() {
    let device = Device::new();
    device.install("1.0.0", b"v1").await;

    device.source.publish("1.0.1", b"v2-bad");
    device.probe.then(ProbeResult::Timeout);
    let mut engine = device.engine();
    assert_eq!(engine.run_cycle().await, UpdateOutcome::AppliedAndRolledBack);
    let downloads = device.source.downloads();

    assert_eq!(engine.run_cycle().await, UpdateOutcome::NoUpdateAvailable);
    assert_eq!(device.source.downloads(), downloads);

    // A fixed build under the same version string has a new hash
    device.source.publish("1.0.1", b"v2-fixed");
    assert_eq!(engine.run_cycle().await, UpdateOutcome::Applied);
    assert_eq!(device.state().current.artifact_hash, sha256_hex(b"v2-fixed"));
}

#[tokio::test]
async fn test_hash_mismatch_is_rejected_without_touching_store() {
    let device = Device::new();
    device.install("1.0.0", b"v1").await;
    let before = device.store_bytes();
    let probes = device.probe.calls();

    device.source.publish_with_hash("1.0.1", b"v2", "abc123");
    let mut engine = device.engine();
    let outcome = engine.run_cycle().await;

    match outcome {
        UpdateOutcome::Failed(UpdateError::Integrity(_)) => {}
        other => panic!("expected integrity failure, got {:?}", other),
    }
    assert!(!outcome.is_fatal());
    assert_eq!(device.store_bytes(), before);
    assert_eq!(device.probe.calls(), probes);
    assert_eq!(engine.last_known_good().map(|r| r.version.as_str()), Some("1.0.0"));
}

#[tokio::test]
async fn test_second_cycle_is_a_no_op() {
    let device = Device::new();
    device.source.publish("1.0.0", b"v1");

    let mut engine = device.engine();
    assert_eq!(engine.run_cycle().await, UpdateOutcome::Applied);
    let before = device.store_bytes();

    assert_eq!(engine.run_cycle().await, UpdateOutcome::NoUpdateAvailable);
    assert_eq!(device.source.downloads(), 1);
    assert_eq!(device.probe.calls(), 1);
    assert_eq!(device.store_bytes(), before);
}

#[tokio::test]
async fn test_network_failure_keeps_local_version() {
    let device = Device::new();
    let v1 = device.install("1.0.0", b"v1").await;
    let before = device.store_bytes();

    device
        .source
        .fail(UpdateError::Network("connection refused".to_string()));
    let mut engine = device.engine();
    let outcome = engine.run_cycle().await;

    assert!(matches!(outcome, UpdateOutcome::Failed(UpdateError::Network(_))));
    assert!(!outcome.is_fatal());
    assert_eq!(device.store_bytes(), before);
    assert_eq!(engine.last_known_good(), Some(&v1));
}

#[tokio::test]
async fn test_unconfirmed_with_marker_is_committed_on_recovery() {
    let device = Device::new();
    let v1 = device.install("1.0.0", b"v1").await;

    // Power lost after the new version wrote its marker, before the commit
    let v2 = VersionRecord::new("1.0.1", sha256_hex(b"v2"));
    device.config.release_store().install(&v2, b"v2").unwrap();
    device.config.version_store().stage(v2.clone()).unwrap();
    device.config.health_marker().write().unwrap();
    let probes = device.probe.calls();

    let mut engine = device.engine();
    assert_eq!(engine.recover().await, Some(UpdateOutcome::Applied));

    let state = device.state();
    assert_eq!(state.current, v2);
    assert!(state.confirmed);
    assert_ne!(state.current, v1);
    assert_eq!(device.probe.calls(), probes);
    assert_eq!(engine.last_known_good(), Some(&v2));
}

#[tokio::test]
async fn test_unconfirmed_without_marker_is_probed_again() {
    let device = Device::new();
    let v1 = device.install("1.0.0", b"v1").await;

    // Power lost in the middle of the health check
    let v2 = VersionRecord::new("1.0.1", sha256_hex(b"v2"));
    device.config.release_store().install(&v2, b"v2").unwrap();
    device.config.version_store().stage(v2.clone()).unwrap();
    device.probe.then(ProbeResult::Unhealthy);

    let mut engine = device.engine();
    assert_eq!(
        engine.recover().await,
        Some(UpdateOutcome::AppliedAndRolledBack)
    );
    assert_eq!(device.state().current, v1);
    assert_eq!(engine.last_known_good(), Some(&v1));
}

#[tokio::test]
async fn test_recovery_outcome_is_reported_when_nothing_new() {
    let device = Device::new();
    device.install("1.0.0", b"v1").await;

    let v2 = VersionRecord::new("1.0.1", sha256_hex(b"v2"));
    device.config.release_store().install(&v2, b"v2").unwrap();
    device.config.version_store().stage(v2).unwrap();
    device.source.publish("1.0.1", b"v2");

    let outcome = device.engine().run_cycle().await;
    assert_eq!(outcome, UpdateOutcome::Applied);
    assert_eq!(device.source.downloads(), 1);
}

#[tokio::test]
async fn test_confirmed_store_needs_no_recovery() {
    let device = Device::new();
    let v1 = device.install("1.0.0", b"v1").await;

    let mut engine = device.engine();
    assert_eq!(engine.recover().await, None);
    assert_eq!(engine.last_known_good(), Some(&v1));
}

#[tokio::test]
async fn test_corrupt_store_is_rebuilt_from_installed_release() {
    let device = Device::new();
    let v1 = device.install("1.0.0", b"v1").await;
    fs::write(device.config.version_store().path(), b"{\"current\": {\"ver").unwrap();

    let mut engine = device.engine();
    let outcome = engine.run_cycle().await;

    assert_eq!(outcome, UpdateOutcome::Applied);
    let state = device.state();
    assert_eq!(state.current, v1);
    assert!(state.confirmed);
    assert_eq!(device.source.downloads(), 1);
}

#[tokio::test]
async fn test_corrupt_store_falls_back_to_older_release() {
    let device = Device::new();
    let v1 = device.install("1.0.0", b"v1").await;

    // Staged update, then the store is lost before the health check
    let v2 = VersionRecord::new("1.0.1", sha256_hex(b"v2"));
    device.config.release_store().install(&v2, b"v2").unwrap();
    device.config.version_store().stage(v2).unwrap();
    fs::write(device.config.version_store().path(), b"{garbage").unwrap();
    device.probe.then(ProbeResult::Unhealthy);

    let mut engine = device.engine();
    let outcome = engine.run_cycle().await;

    assert_eq!(outcome, UpdateOutcome::AppliedAndRolledBack);
    let state = device.state();
    assert_eq!(state.current, v1);
    assert!(state.confirmed);
    assert_eq!(state.rejected.map(|r| r.version), Some("1.0.1".to_string()));
    assert_eq!(engine.run_target().map(|t| t.record), Some(v1));
}

#[tokio::test]
async fn test_recovery_outcome_survives_failed_manifest_check() {
    let device = Device::new();
    device.install("1.0.0", b"v1").await;

    let v2 = VersionRecord::new("1.0.1", sha256_hex(b"v2"));
    device.config.release_store().install(&v2, b"v2").unwrap();
    device.config.version_store().stage(v2.clone()).unwrap();
    device
        .source
        .fail(UpdateError::Network("connection refused".to_string()));

    let mut engine = device.engine();
    assert_eq!(engine.run_cycle().await, UpdateOutcome::Applied);
    assert_eq!(device.state().current, v2);
}

#[tokio::test]
async fn test_first_install_failure_has_nothing_to_run() {
    let device = Device::new();
    device.source.publish("1.0.0", b"broken");
    device.probe.then(ProbeResult::Unhealthy);

    let mut engine = device.engine();
    let outcome = engine.run_cycle().await;

    assert!(matches!(
        outcome,
        UpdateOutcome::Failed(UpdateError::HealthCheckFailure(_))
    ));
    assert!(engine.run_target().is_none());
    assert!(!device.state().confirmed);
}

#[tokio::test]
async fn test_unwritable_state_dir_is_fatal() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("state");
    fs::write(&blocker, b"not a directory").unwrap();

    let mut config = Config::default();
    config.paths.state_dir = blocker;
    config.paths.install_dir = dir.path().join("opt");

    let source = FakeSource::default();
    source.publish("1.0.0", b"v1");
    let mut engine = UpdateEngine::from_config(source, ScriptedProbe::default(), &config);

    let outcome = engine.run_cycle().await;
    assert!(matches!(
        outcome,
        UpdateOutcome::Failed(UpdateError::IrrecoverableStore(_))
    ));
    assert!(outcome.is_fatal());
}
