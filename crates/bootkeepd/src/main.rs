//! Bootkeep Daemon - device-side OTA update supervisor

use anyhow::{Context, Result};
use bootkeep_common::Config;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "bootkeepd")]
#[command(about = "Keeps a device application updated, health-checked and running", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file (overrides $BOOTKEEP_CONFIG and the default path)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single update cycle and exit instead of supervising
    #[arg(long)]
    once: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let path = Config::resolve_path(args.config.as_deref());
    let config = Config::load_or_default(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("[BOOT] Bootkeep Daemon v{} starting", env!("CARGO_PKG_VERSION"));
    info!("[BOOT] Configuration: {}", path.display());
    info!(
        "[BOOT] Manifest {}, state in {}, releases in {}",
        config.server.manifest_url,
        config.paths.state_dir.display(),
        config.paths.install_dir.display()
    );

    if args.once {
        let mut engine = bootkeepd::build_engine(&config)?;
        let outcome = engine.run_cycle().await;
        println!("{}", outcome);
        if outcome.is_fatal() {
            error!("[FATAL] {}", outcome);
            std::process::exit(1);
        }
        return Ok(());
    }

    let supervisor = bootkeepd::build_supervisor(&config)?;
    supervisor.run().await?;

    info!("Shutting down gracefully");
    Ok(())
}
