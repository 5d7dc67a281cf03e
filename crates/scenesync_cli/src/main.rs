//! SceneSync CLI
//!
//! Command-line tools for syncing and migrating a SceneSync workspace.
//!
//! A workspace directory holds:
//! - `state.json` - the in-memory collections, as exported by the application
//! - `data/` - the durable layer, one JSON file per entity
//! - `backups/` - backups of `state.json`
//!
//! # Commands
//!
//! - `sync` - Run one sync cycle
//! - `migrate` - Migrate in-memory-only entities into the durable layer
//! - `backup` - Create, list, restore and clean up backups
//! - `status` - Compare in-memory and durable entity counts

mod commands;
mod workspace;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// SceneSync command-line sync and migration tools.
#[derive(Parser)]
#[command(name = "scenesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the workspace directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync cycle
    Sync {
        /// Only sync entities of this project
        #[arg(long)]
        project: Option<String>,

        /// Conflict threshold in milliseconds
        #[arg(long, default_value = "5000")]
        threshold_ms: u64,

        /// Resolution applied to conflicts (local-wins, durable-wins, merge)
        #[arg(long, default_value = "local-wins")]
        resolution: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Migrate in-memory-only entities into the durable layer
    Migrate {
        /// Only migrate entities of this project
        #[arg(long)]
        project: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Manage backups of the in-memory state
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Compare in-memory and durable entity counts
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum BackupAction {
    /// Snapshot the in-memory state
    Create,

    /// List backups, oldest first
    List,

    /// Restore the in-memory state from a backup
    Restore {
        /// Backup id
        id: String,
    },

    /// Remove old backups
    Cleanup {
        /// Remove backups older than this many days
        #[arg(long, default_value = "30")]
        max_age_days: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Sync {
            project,
            threshold_ms,
            resolution,
            format,
        } => {
            let path = cli.path.ok_or("Workspace path required for sync")?;
            let options = commands::sync::SyncOptions {
                project,
                threshold_ms,
                resolution: commands::sync::parse_resolution(&resolution)?,
            };
            commands::sync::run(&path, options, &format).await?;
        }
        Commands::Migrate { project, format } => {
            let path = cli.path.ok_or("Workspace path required for migrate")?;
            commands::migrate::run(&path, project, &format).await?;
        }
        Commands::Backup { action } => {
            let path = cli.path.ok_or("Workspace path required for backup")?;
            match action {
                BackupAction::Create => commands::backup::create(&path).await?,
                BackupAction::List => commands::backup::list(&path).await?,
                BackupAction::Restore { id } => commands::backup::restore(&path, &id).await?,
                BackupAction::Cleanup { max_age_days } => {
                    commands::backup::cleanup(&path, max_age_days).await?
                }
            }
        }
        Commands::Status { format } => {
            let path = cli.path.ok_or("Workspace path required for status")?;
            commands::status::run(&path, &format).await?;
        }
        Commands::Version => {
            println!("SceneSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
