// SPDX-License-Identifier: GPL-3.0-only

mod commands;
mod config;
mod logging;
mod watch;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use backup_engine::BackupEngine;
use clap::{Parser, Subcommand};

use crate::commands::Setting;
use crate::config::{Config, TomlSettings};

/// Back up a photo library onto a sparse bundle disk image
#[derive(Parser)]
#[command(name = "photos-backup")]
#[command(about = "Back up a photo library onto a sparse bundle disk image", long_about = None)]
struct Cli {
    /// Configuration file (defaults to $XDG_CONFIG_HOME/photos-backup/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print the backup log when the command finishes
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Change a saved setting
    Configure {
        #[command(subcommand)]
        setting: Setting,
    },
    #[command(flatten)]
    Engine(EngineCommand),
}

#[derive(Subcommand)]
enum EngineCommand {
    /// Show library, destination and schedule state
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create and attach a new sparse bundle destination
    Create {
        /// Directory to create the image in
        #[arg(long)]
        directory: PathBuf,
        /// Maximum image size in megabytes
        #[arg(long)]
        size: u64,
        /// Volume name (defaults to photosBackup)
        #[arg(long)]
        name: Option<String>,
    },
    /// Attach a sparse bundle (defaults to the configured destination)
    Mount { image: Option<PathBuf> },
    /// Back up the library onto the destination and wait for completion
    Backup,
    /// Detach the destination
    Detach,
    /// Back up on the configured schedule until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let config = Config::load(&config_path)?;
    logging::init(&config);
    let settings = Arc::new(TomlSettings::new(config_path, config));

    match cli.command {
        Commands::Configure { setting } => commands::configure(&settings, setting),
        Commands::Engine(command) => {
            let engine = commands::build_engine(settings)?;
            engine.subscribe(commands::print_progress);

            let result = run(&engine, command).await;
            if cli.verbose {
                eprintln!("{}", engine.log_contents());
            }
            result
        }
    }
}

async fn run(engine: &BackupEngine, command: EngineCommand) -> Result<()> {
    match command {
        EngineCommand::Status { json } => commands::status(engine, json).await,
        EngineCommand::Create {
            directory,
            size,
            name,
        } => commands::create(engine, &directory, name.as_deref(), size).await,
        EngineCommand::Mount { image } => commands::mount(engine, image).await,
        EngineCommand::Backup => commands::backup(engine).await,
        EngineCommand::Detach => commands::detach(engine).await,
        EngineCommand::Watch => watch::watch(engine).await,
    }
}
