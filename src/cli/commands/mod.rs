//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod harvest;
mod refresh;
mod serve;
mod watch;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use viewharvest::config::{load_settings, LoadOptions};

#[derive(Parser)]
#[command(name = "viewharvest")]
#[command(about = "Harvest content lists and track view changes against a daily baseline")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API and the refresh scheduler
    Serve {
        /// Address to bind to: PORT, HOST, or HOST:PORT (default from config, 127.0.0.1:3030)
        #[arg(long)]
        bind: Option<String>,
        /// Do not run scheduled refreshes
        #[arg(long)]
        no_scheduler: bool,
    },

    /// Harvest one subject and print the result as JSON
    Harvest {
        /// Subject handle (leading @ is ignored)
        user: String,
        /// Number of items to collect (default from config)
        #[arg(short = 'n', long)]
        count: Option<usize>,
        /// Start a new baseline epoch for this subject
        #[arg(long)]
        reset: bool,
    },

    /// Manage the watch list
    Watch {
        #[command(subcommand)]
        command: WatchCommands,
    },

    /// Refresh every watched subject once
    Refresh {
        /// Start a new baseline epoch for every subject
        #[arg(long)]
        reset: bool,
    },
}

#[derive(Subcommand)]
enum WatchCommands {
    /// List watched subjects
    List,
    /// Start watching a subject
    Add {
        /// Subject handle
        user: String,
    },
    /// Stop watching a subject and delete its baselines
    Remove {
        /// Subject handle
        user: String,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
    };
    let (settings, _config) = load_settings(options).await?;

    match cli.command {
        Commands::Serve { bind, no_scheduler } => {
            serve::cmd_serve(&settings, bind.as_deref(), !no_scheduler).await
        }
        Commands::Harvest { user, count, reset } => {
            harvest::cmd_harvest(&settings, &user, count, reset).await
        }
        Commands::Watch { command } => match command {
            WatchCommands::List => watch::cmd_watch_list(&settings).await,
            WatchCommands::Add { user } => watch::cmd_watch_add(&settings, &user).await,
            WatchCommands::Remove { user } => watch::cmd_watch_remove(&settings, &user).await,
        },
        Commands::Refresh { reset } => refresh::cmd_refresh(&settings, reset).await,
    }
}
