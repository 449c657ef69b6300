//! Supervisor loop driving `/bin/sh` applications.

mod common;

use bootkeep_common::{Config, UpdateOutcome};
use bootkeepd::{
    AppLauncher, HealthProbe, ProcessHealthMonitor, SignalEvent, SignalListener, Supervisor,
    SupervisorSettings, UpdateEngine,
};
use common::{FakeSource, ScriptedProbe};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

struct Rig {
    dir: TempDir,
    config: Config,
    source: FakeSource,
}

impl Rig {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.state_dir = dir.path().join("state");
        config.paths.install_dir = dir.path().join("opt");
        config.application.launcher = vec!["/bin/sh".to_string()];
        Self {
            dir,
            config,
            source: FakeSource::default(),
        }
    }

    fn counter(&self) -> PathBuf {
        self.dir.path().join("runs")
    }

    fn runs(&self) -> u32 {
        fs::read_to_string(self.counter())
            .map(|s| s.trim().parse().unwrap())
            .unwrap_or(0)
    }

    /// Publish a script that counts its runs in `$n` before running `body`.
    fn publish(&self, body: &str) {
        self.publish_version("1.0.0", body);
    }

    fn publish_version(&self, version: &str, body: &str) {
        let script = format!(
            "n=$(cat '{counter}' 2>/dev/null || echo 0)\nn=$((n + 1))\necho $n > '{counter}'\n{body}",
            counter = self.counter().display(),
            body = body,
        );
        self.source.publish(version, script.as_bytes());
    }

    fn engine(&self) -> UpdateEngine<FakeSource, ScriptedProbe> {
        UpdateEngine::from_config(self.source.clone(), ScriptedProbe::default(), &self.config)
    }

    fn supervisor(&self) -> Supervisor<FakeSource, ScriptedProbe> {
        self.supervisor_with(self.engine())
            .with_signals(SignalListener::disabled())
    }

    /// Supervisor that installs process-wide signal handlers when run
    fn supervisor_with<P: HealthProbe>(
        &self,
        engine: UpdateEngine<FakeSource, P>,
    ) -> Supervisor<FakeSource, P> {
        let settings = SupervisorSettings {
            restart_backoff: Duration::from_millis(50),
            stop_grace: Duration::from_millis(500),
            trigger_poll: Duration::from_millis(20),
            force_update_exit_code: 100,
        };
        Supervisor::new(
            engine,
            AppLauncher::from_config(&self.config),
            self.config.force_update_trigger(),
            settings,
        )
    }
}

async fn wait_until(what: impl Fn() -> bool) {
    for _ in 0..500 {
        if what() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

async fn run_to_completion<P: HealthProbe>(supervisor: Supervisor<FakeSource, P>) {
    tokio::time::timeout(Duration::from_secs(20), supervisor.run())
        .await
        .expect("supervisor did not finish")
        .unwrap();
}

#[tokio::test]
async fn test_clean_exit_ends_supervision() {
    let rig = Rig::new();
    rig.publish("exit 0\n");

    run_to_completion(rig.supervisor()).await;

    assert_eq!(rig.runs(), 1);
    assert_eq!(rig.source.fetches(), 1);
}

#[tokio::test]
async fn test_force_update_exit_code_rechecks_manifest() {
    let rig = Rig::new();
    rig.publish("if [ $n -eq 1 ]; then exit 100; fi\nexit 0\n");

    run_to_completion(rig.supervisor()).await;

    assert_eq!(rig.runs(), 2);
    assert_eq!(rig.source.fetches(), 2);
    assert_eq!(rig.source.downloads(), 1);
}

#[tokio::test]
async fn test_crash_restarts_without_update_check() {
    let rig = Rig::new();
    rig.publish("if [ $n -lt 3 ]; then exit 3; fi\nexit 0\n");

    run_to_completion(rig.supervisor()).await;

    assert_eq!(rig.runs(), 3);
    assert_eq!(rig.source.fetches(), 1);
}

#[tokio::test]
async fn test_force_update_file_interrupts_running_app() {
    let rig = Rig::new();
    let trigger = rig.config.force_update_trigger();
    rig.publish(&format!(
        "if [ $n -eq 1 ]; then touch '{}'; exec sleep 30; fi\nexit 0\n",
        trigger.path().display()
    ));

    run_to_completion(rig.supervisor()).await;

    assert_eq!(rig.runs(), 2);
    assert_eq!(rig.source.fetches(), 2);
    assert!(!trigger.is_pending());
}

#[tokio::test]
async fn test_storage_failure_disables_updates() {
    let rig = Rig::new();
    rig.publish("if [ $n -eq 1 ]; then exit 100; fi\nexit 0\n");
    assert_eq!(rig.engine().run_cycle().await, UpdateOutcome::Applied);

    // A non-empty directory where the marker lives cannot be cleared
    fs::create_dir_all(rig.config.health_marker().path().join("stuck")).unwrap();
    rig.publish_version("1.0.1", "exit 0\n");
    let fetches = rig.source.fetches();

    run_to_completion(rig.supervisor()).await;

    // 1.0.0 ran twice; the exit-100 request did not reach the manifest
    assert_eq!(rig.runs(), 2);
    assert_eq!(rig.source.fetches() - fetches, 1);
    let state = rig.config.version_store().load().unwrap();
    assert_eq!(state.current.version, "1.0.0");
    assert!(state.confirmed);
}

#[tokio::test]
async fn test_sigusr1_forces_update() {
    let rig = Rig::new();
    rig.publish("if [ $n -eq 1 ]; then exec sleep 30; fi\nexit 0\n");
    let supervisor = rig.supervisor_with(rig.engine());

    tokio::join!(run_to_completion(supervisor), async {
        wait_until(|| rig.runs() == 1).await;
        kill(Pid::this(), Signal::SIGUSR1).unwrap();
    });

    assert_eq!(rig.runs(), 2);
    assert_eq!(rig.source.fetches(), 2);
}

#[tokio::test]
async fn test_nothing_installed_retries_update() {
    let rig = Rig::new();
    let supervisor = rig.supervisor();

    tokio::join!(run_to_completion(supervisor), async {
        // Endpoint unreachable at first; the supervisor keeps asking
        wait_until(|| rig.source.fetches() >= 2).await;
        rig.publish("exit 0\n");
    });

    assert_eq!(rig.runs(), 1);
    assert!(rig.source.fetches() >= 3);
}

#[tokio::test]
async fn test_shutdown_interrupts_health_check() {
    let mut rig = Rig::new();
    rig.config.application.health_timeout_secs = 60;
    rig.config.application.health_poll_millis = 20;
    rig.publish("exec sleep 30\n");

    let probe = ProcessHealthMonitor::from_config(AppLauncher::from_config(&rig.config), &rig.config);
    let engine = UpdateEngine::from_config(rig.source.clone(), probe, &rig.config);
    let (controller, signals) = SignalListener::channel();
    let supervisor = rig.supervisor_with(engine).with_signals(signals);

    let started = std::time::Instant::now();
    tokio::join!(run_to_completion(supervisor), async {
        // The health-check run has started
        wait_until(|| rig.runs() == 1).await;
        controller.send(SignalEvent::Shutdown).unwrap();
    });

    assert!(started.elapsed() < Duration::from_secs(15));
    let state = rig.config.version_store().load().unwrap();
    assert_eq!(state.current.version, "1.0.0");
    assert!(!state.confirmed);
}
