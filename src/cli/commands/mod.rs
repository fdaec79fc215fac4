//! CLI command definitions and dispatch.
//!
//! Each subcommand lives in its own submodule:
//! - `search`: remote search and foreground downloads
//! - `library`: the local music folder, tool checks and config
//! - `shell`: the interactive player shell (the default)

mod library;
mod search;
mod shell;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::runtime::Runtime;

use crate::config::Config;

pub use library::{cmd_check_tools, cmd_config, cmd_library};
pub use search::{cmd_download, cmd_search};
pub use shell::cmd_shell;

/// Tunedeck CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Music folder (overrides the config file)
    #[arg(long, global = true, env = "TUNEDECK_MUSIC_DIR")]
    pub music_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Search for tracks
    Search {
        /// Words to search for
        #[arg(required = true)]
        query: Vec<String>,
    },
    /// Download one search result into the music folder
    Download {
        /// Result identifier (as printed by `search`)
        identifier: String,
        /// Title used to name the file (defaults to the identifier)
        #[arg(short, long)]
        title: Option<String>,
    },
    /// List tracks in the music folder
    Library,
    /// Check that the downloader is installed
    CheckTools,
    /// Show the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        save: bool,
    },
    /// Interactive player shell (default)
    Shell,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded config.
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(dir) = &self.music_dir {
            config.library.music_dir = dir.clone();
        }
        config
    }
}

/// Run the specified CLI command, or the shell when none is given.
pub fn run_command(cli: &Cli, config: Config) -> anyhow::Result<()> {
    let config = cli.apply(config);
    let rt = Runtime::new()?;

    let result = match &cli.command {
        Some(Commands::Search { query }) => cmd_search(&rt, &config, &query.join(" ")),
        Some(Commands::Download { identifier, title }) => {
            cmd_download(&rt, &config, identifier, title.as_deref())
        }
        Some(Commands::Library) => cmd_library(&config),
        Some(Commands::CheckTools) => cmd_check_tools(&rt, &config),
        Some(Commands::Config { save }) => cmd_config(&config, *save),
        Some(Commands::Shell) | None => cmd_shell(&rt, config),
    };

    // The shell's stdin reader may still be parked in a blocking read
    rt.shutdown_background();
    result
}
