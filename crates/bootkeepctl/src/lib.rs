//! Bootkeep Control - operator CLI for the bootkeep supervisor
//!
//! Reads the persisted state directly; the daemon does not need to be
//! running.

pub mod cli;
pub mod status;

pub use cli::{Cli, Commands};
pub use status::{StatusReport, StoreStatus};
