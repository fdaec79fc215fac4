//! Music folder, tool and configuration commands.

use std::path::Path;

use tokio::runtime::Runtime;

use crate::config::{self, Config};
use crate::download::Downloader;
use crate::error::{Result, ResultExt};
use crate::library::{self, TrackFile};

/// Read the music folder, adding the folder to any error.
pub(crate) fn load_tracks(dir: &Path) -> Result<Vec<TrackFile>> {
    library::read_tracks(dir).with_context(format!("while reading {}", dir.display()))
}

/// List the tracks in the music folder
pub fn cmd_library(config: &Config) -> anyhow::Result<()> {
    let dir = &config.library.music_dir;
    let tracks = load_tracks(dir)?;

    println!("Music folder: {}", dir.display());
    if tracks.is_empty() {
        println!("No tracks found.");
        return Ok(());
    }
    for (i, track) in tracks.iter().enumerate() {
        println!("{:>3}. {}", i + 1, track.name);
    }
    println!("\n{} tracks", tracks.len());
    Ok(())
}

/// Report whether the downloader can be run
pub fn cmd_check_tools(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    println!("Checking tools...\n");

    let downloader = Downloader::new(
        config.library.music_dir.clone(),
        config.download.clone(),
        rt.handle().clone(),
    );
    match downloader.check_tool() {
        Ok(version) => println!("✓ {}: {}", config.download.program, version),
        Err(e) => {
            println!("✗ {}", e);
            print_downloader_install_instructions();
        }
    }

    println!();
    let dir = &config.library.music_dir;
    if dir.is_dir() {
        println!("✓ music folder: {}", dir.display());
    } else {
        println!("✗ music folder: {} (created on first download)", dir.display());
    }

    Ok(())
}

/// Print the effective configuration, optionally saving it
pub fn cmd_config(config: &Config, save: bool) -> anyhow::Result<()> {
    match config::config_path() {
        Some(path) => println!("# {}", path.display()),
        None => println!("# no config directory on this system"),
    }
    println!("{}", toml::to_string_pretty(config)?);

    if save {
        config::save(config).map_err(crate::error::Error::from)?;
        println!("Saved.");
    }
    Ok(())
}

fn print_downloader_install_instructions() {
    eprintln!("Install yt-dlp:");
    eprintln!("  Windows: winget install yt-dlp");
    eprintln!("  macOS:   brew install yt-dlp");
    eprintln!("  Linux:   pipx install yt-dlp");
    eprintln!("or point [download] program at it in the config file.");
}
