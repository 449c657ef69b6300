//! Bootkeep Control - CLI for the bootkeep supervisor

use anyhow::{Context, Result};
use bootkeep_common::{verify, Config};
use bootkeepctl::{status, Cli, Commands};
use clap::Parser;
use owo_colors::OwoColorize;
use std::fs;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = Config::resolve_path(cli.config.as_deref());
    let config = Config::load_or_default(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    match cli.command {
        Commands::Status { json } => {
            let report = status::collect(&config);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", status::render(&report));
            }
        }

        Commands::ForceUpdate => {
            let trigger = config.force_update_trigger();
            trigger
                .raise()
                .with_context(|| format!("Failed to create {}", trigger.path().display()))?;
            println!(
                "{} force update requested ({})",
                "[OK]".bright_green(),
                trigger.path().display()
            );
        }

        Commands::Verify { file, hash } => {
            let bytes =
                fs::read(&file).with_context(|| format!("Failed to read {}", file.display()))?;
            match verify(&bytes, &hash) {
                Ok(digest) => println!("{} {}  {}", "[OK]".bright_green(), digest, file.display()),
                Err(e) => {
                    eprintln!("{} {}: {}", "[FAIL]".bright_red(), file.display(), e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
