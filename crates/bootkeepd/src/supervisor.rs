//! Supervisor loop
//!
//! Runs the update engine, then keeps the last known-good version running.
//! Exit code 0 ends supervision, the force-update code (or SIGUSR1, or the
//! force-update file) goes back to the engine, and anything else is a crash
//! that restarts the same version after a pause. Crashes never trigger a
//! manifest check on their own.

use crate::engine::UpdateEngine;
use crate::health::HealthProbe;
use crate::launch::{stop_child, AppLauncher, AppTarget, LaunchMode};
use crate::source::UpdateSource;
use anyhow::Result;
use bootkeep_common::{Config, ExitEvent, ForceUpdateTrigger};
use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// How often the force-update file is checked while the app runs
pub const TRIGGER_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub restart_backoff: Duration,
    pub stop_grace: Duration,
    pub trigger_poll: Duration,
    pub force_update_exit_code: i32,
}

impl SupervisorSettings {
    pub fn from_config(config: &Config) -> Self {
        let app = &config.application;
        Self {
            restart_backoff: app.restart_backoff(),
            stop_grace: app.stop_grace(),
            trigger_poll: TRIGGER_POLL,
            force_update_exit_code: app.force_update_exit_code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// SIGUSR1
    ForceUpdate,
    /// SIGTERM or SIGINT
    Shutdown,
}

/// Unix signals the supervisor reacts to
pub struct SignalListener {
    usr1: Option<Signal>,
    term: Option<Signal>,
    int: Option<Signal>,
    requests: Option<mpsc::UnboundedReceiver<SignalEvent>>,
}

impl SignalListener {
    /// Register handlers. Must be called inside a tokio runtime.
    pub fn install() -> Self {
        Self {
            usr1: register(SignalKind::user_defined1(), "SIGUSR1"),
            term: register(SignalKind::terminate(), "SIGTERM"),
            int: register(SignalKind::interrupt(), "SIGINT"),
            requests: None,
        }
    }

    /// Listener that never fires
    pub fn disabled() -> Self {
        Self {
            usr1: None,
            term: None,
            int: None,
            requests: None,
        }
    }

    /// Listener driven by an in-process controller instead of Unix signals
    pub fn channel() -> (mpsc::UnboundedSender<SignalEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut listener = Self::disabled();
        listener.requests = Some(rx);
        (tx, listener)
    }

    pub async fn recv(&mut self) -> SignalEvent {
        tokio::select! {
            Some(()) = next(&mut self.usr1) => {
                info!("SIGUSR1 received - force update requested");
                SignalEvent::ForceUpdate
            }
            Some(()) = next(&mut self.term) => {
                info!("SIGTERM received - shutting down");
                SignalEvent::Shutdown
            }
            Some(()) = next(&mut self.int) => {
                info!("SIGINT received - shutting down");
                SignalEvent::Shutdown
            }
            Some(event) = next_request(&mut self.requests) => {
                info!("{:?} requested", event);
                event
            }
            else => std::future::pending::<SignalEvent>().await,
        }
    }
}

fn register(kind: SignalKind, name: &str) -> Option<Signal> {
    match signal(kind) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!("Failed to register {} handler: {}", name, e);
            None
        }
    }
}

async fn next(sig: &mut Option<Signal>) -> Option<()> {
    match sig {
        Some(s) => s.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_request(rx: &mut Option<mpsc::UnboundedReceiver<SignalEvent>>) -> Option<SignalEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn trigger_raised(trigger: &ForceUpdateTrigger, poll: Duration) {
    while !trigger.is_pending() {
        tokio::time::sleep(poll).await;
    }
}

/// What ended one round of supervision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Stop,
    Update,
}

enum Wake {
    Exited(io::Result<ExitStatus>),
    Signal(SignalEvent),
    Trigger,
}

pub struct Supervisor<S, P> {
    engine: UpdateEngine<S, P>,
    launcher: AppLauncher,
    trigger: ForceUpdateTrigger,
    settings: SupervisorSettings,
    signals: Option<SignalListener>,
    updates_enabled: bool,
}

impl<S: UpdateSource, P: HealthProbe> Supervisor<S, P> {
    pub fn new(
        engine: UpdateEngine<S, P>,
        launcher: AppLauncher,
        trigger: ForceUpdateTrigger,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            engine,
            launcher,
            trigger,
            settings,
            signals: None,
            updates_enabled: true,
        }
    }

    pub fn from_config(engine: UpdateEngine<S, P>, config: &Config) -> Self {
        Self::new(
            engine,
            AppLauncher::from_config(config),
            config.force_update_trigger(),
            SupervisorSettings::from_config(config),
        )
    }

    /// Use `signals` instead of installing process-wide handlers in `run`.
    pub fn with_signals(mut self, signals: SignalListener) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Supervise until the application exits cleanly or a shutdown signal
    /// arrives.
    pub async fn run(mut self) -> Result<()> {
        let mut signals = self.signals.take().unwrap_or_else(SignalListener::install);

        loop {
            // Triggers raised from here on cause another cycle
            match self.trigger.take() {
                Ok(true) => info!("Consumed force-update request"),
                Ok(false) => {}
                Err(e) => warn!("Cannot remove force-update file: {}", e),
            }

            let next = match self.update_phase(&mut signals).await {
                Some(next) => next,
                None => match self.engine.run_target() {
                    Some(target) => self.supervise(&target, &mut signals).await,
                    None => self.idle_without_target(&mut signals).await,
                },
            };

            match next {
                Next::Stop => {
                    info!("Supervision finished");
                    return Ok(());
                }
                Next::Update => continue,
            }
        }
    }

    /// Run one update cycle. Returns `Some(Next::Stop)` if a shutdown
    /// arrived first; the cycle is then dropped, which kills any
    /// health-check child, and crash recovery picks up on the next start.
    async fn update_phase(&mut self, signals: &mut SignalListener) -> Option<Next> {
        if !self.updates_enabled {
            warn!("Updates are disabled after a storage failure, running last known-good version");
            return None;
        }

        let outcome = {
            let cycle = self.engine.run_cycle();
            tokio::pin!(cycle);
            loop {
                tokio::select! {
                    outcome = &mut cycle => break outcome,
                    event = signals.recv() => match event {
                        SignalEvent::Shutdown => {
                            warn!("Shutdown during update cycle, abandoning it");
                            return Some(Next::Stop);
                        }
                        SignalEvent::ForceUpdate => debug!("Update cycle already running"),
                    },
                }
            }
        };

        if outcome.is_fatal() {
            error!("Disabling updates: {}", outcome);
            self.updates_enabled = false;
        } else {
            info!("Update cycle: {}", outcome);
        }
        None
    }

    /// Run `target` until something other than a crash happens.
    async fn supervise(&mut self, target: &AppTarget, signals: &mut SignalListener) -> Next {
        loop {
            info!("Starting {}", target.record);
            let event = match self.launcher.command(target, LaunchMode::Run).spawn() {
                Ok(mut child) => {
                    let wake = tokio::select! {
                        status = child.wait() => Wake::Exited(status),
                        event = signals.recv() => Wake::Signal(event),
                        _ = trigger_raised(&self.trigger, self.settings.trigger_poll) => Wake::Trigger,
                    };

                    match wake {
                        Wake::Exited(Ok(status)) => {
                            ExitEvent::classify(status.code(), self.settings.force_update_exit_code)
                        }
                        Wake::Exited(Err(e)) => {
                            warn!("Lost track of application process: {}", e);
                            ExitEvent::Crashed(None)
                        }
                        Wake::Signal(event) => {
                            self.stop(&mut child).await;
                            return self.on_signal(event);
                        }
                        Wake::Trigger => {
                            info!("Force-update file found, stopping application");
                            self.stop(&mut child).await;
                            return Next::Update;
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to start {}: {}", target.artifact.display(), e);
                    ExitEvent::Crashed(None)
                }
            };

            match event {
                ExitEvent::Stop => {
                    info!("Application exited with code 0, stopping supervision");
                    return Next::Stop;
                }
                ExitEvent::ForceUpdate => {
                    info!("Application requested an update check");
                    return Next::Update;
                }
                ExitEvent::Crashed(code) => {
                    warn!(
                        "Application crashed (exit code {:?}), restarting in {:?}",
                        code, self.settings.restart_backoff
                    );
                    let paused = tokio::select! {
                        _ = tokio::time::sleep(self.settings.restart_backoff) => None,
                        event = signals.recv() => Some(self.on_signal(event)),
                        _ = trigger_raised(&self.trigger, self.settings.trigger_poll) => Some(Next::Update),
                    };
                    if let Some(next) = paused {
                        return next;
                    }
                }
            }
        }
    }

    /// Nothing runnable: wait for someone to ask for another update cycle.
    async fn idle_without_target(&mut self, signals: &mut SignalListener) -> Next {
        warn!("No known-good version to run, waiting for a force update");
        tokio::select! {
            _ = tokio::time::sleep(self.settings.restart_backoff) => Next::Update,
            event = signals.recv() => self.on_signal(event),
            _ = trigger_raised(&self.trigger, self.settings.trigger_poll) => Next::Update,
        }
    }

    fn on_signal(&self, event: SignalEvent) -> Next {
        match event {
            SignalEvent::Shutdown => Next::Stop,
            SignalEvent::ForceUpdate => Next::Update,
        }
    }

    async fn stop(&self, child: &mut tokio::process::Child) {
        match stop_child(child, self.settings.stop_grace).await {
            Ok(status) => info!("Application stopped ({})", status),
            Err(e) => warn!("Failed to stop application: {}", e),
        }
    }
}
