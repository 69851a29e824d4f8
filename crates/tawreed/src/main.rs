// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tawreed - live collection tooling for the procurement marketplace.
//!
//! This is the binary entry point. It validates configuration and replays
//! recorded change-feed captures through the reconciler offline.

mod replay;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tawreed_core::EntityKind;

/// Tawreed - live collection tooling for the procurement marketplace.
#[derive(Parser, Debug)]
#[command(name = "tawreed", version, about, long_about = None)]
struct Cli {
    /// Load this file instead of the layered system/local config.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration and print the effective settings.
    CheckConfig,
    /// Fold a JSON-lines change-feed capture and print the resulting collections.
    Replay {
        /// Capture file, one raw change per line. `-` reads stdin.
        file: PathBuf,
        /// Treat every line as this entity instead of reading its `table`.
        #[arg(long)]
        entity: Option<EntityKind>,
    },
}

fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) if !path.is_file() => {
            eprintln!("tawreed: config file {} does not exist", path.display());
            std::process::exit(1);
        }
        Some(path) => tawreed_config::load_and_validate_path(path),
        None => tawreed_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            tawreed_config::render_errors(&errors);
            std::process::exit(1);
        }
    };
    init_tracing(&config.logging.level);

    match cli.command {
        Some(Commands::CheckConfig) => match toml::to_string_pretty(&config) {
            Ok(rendered) => print!("{rendered}"),
            Err(err) => {
                eprintln!("tawreed: could not render config: {err}");
                std::process::exit(1);
            }
        },
        Some(Commands::Replay { file, entity }) => {
            if let Err(err) = replay::run(&file, entity) {
                eprintln!("tawreed: {err}");
                std::process::exit(1);
            }
        }
        None => {
            println!("tawreed: use --help for available commands");
        }
    }
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tawreed={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
