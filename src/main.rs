//! Tunedeck - search, download and play music from the terminal.
//!
//! Searches a video site for tracks, pulls the audio into a local music
//! folder with an external downloader, and plays the folder back. Run with
//! no command for the interactive shell.

pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod library;
pub mod player;
pub mod scanner;
pub mod search;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // The shell shares the terminal with log output, keep it quiet there
    let default_level = match args.command {
        None | Some(cli::Commands::Shell) => "tunedeck=warn,download=warn,search=warn",
        Some(_) => "tunedeck=info,download=info,search=info",
    };

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = config::load();
    cli::run_command(&args, config)
}
