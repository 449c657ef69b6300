//! Exit-code contract between the supervised application and the supervisor

/// Exit code that means "stop supervising me"
pub const EXIT_STOP: i32 = 0;

/// Default exit code that means "re-check for updates now"
pub const EXIT_FORCE_UPDATE: i32 = 100;

/// How the supervisor interprets an application exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitEvent {
    /// Clean exit, supervision ends
    Stop,
    /// Skip the restart delay and run the update engine
    ForceUpdate,
    /// Anything else, including death by signal (`None`)
    Crashed(Option<i32>),
}

impl ExitEvent {
    pub fn classify(code: Option<i32>, force_update_code: i32) -> Self {
        match code {
            Some(EXIT_STOP) => ExitEvent::Stop,
            Some(c) if c == force_update_code => ExitEvent::ForceUpdate,
            other => ExitEvent::Crashed(other),
        }
    }
}
