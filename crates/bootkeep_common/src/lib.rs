//! Bootkeep Common - Shared types and durable state for the update supervisor
//!
//! Everything the daemon and the operator CLI both need to agree on lives
//! here: configuration, the on-disk state layout, the artifact verifier and
//! the exit-code contract with the supervised application.

pub mod config;
pub mod error;
pub mod exit;
pub mod fsutil;
pub mod marker;
pub mod releases;
pub mod store;
pub mod trigger;
pub mod types;
pub mod verify;

pub use config::{ApplicationConfig, Config, PathsConfig, ServerConfig};
pub use error::{StoreError, UpdateError, VerifyError};
pub use exit::ExitEvent;
pub use marker::HealthMarker;
pub use releases::ReleaseStore;
pub use store::{StoreState, VersionStore};
pub use trigger::ForceUpdateTrigger;
pub use types::{Manifest, UpdateOutcome, VersionRecord};
pub use verify::{sha256_hex, verify};

/// Version of the supervisor itself (never updated over the air)
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
