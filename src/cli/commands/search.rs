//! Remote search and foreground download commands.

use std::time::Duration;

use tokio::runtime::Runtime;
use tracing::debug;

use crate::config::Config;
use crate::download::{DownloadProgress, Downloader, STATUS_CANCELLED};
use crate::search::{SearchApi, YouTubeClient};

/// How often the foreground download polls the job.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Search and print the results
pub fn cmd_search(rt: &Runtime, config: &Config, query: &str) -> anyhow::Result<()> {
    let client = YouTubeClient::new(&config.search)?;
    let results = rt.block_on(SearchApi::search(&client, query))?;

    if results.is_empty() {
        println!("No results for \"{}\"", query);
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!("{:>2}. {}", i + 1, result.display_line());
        println!("    id: {}", result.id);
        if let Some(thumbnail) = &result.thumbnail {
            debug!(id = %result.id, %thumbnail, "Thumbnail");
        }
    }
    Ok(())
}

/// Download one result in the foreground, cancelling on Ctrl+C
pub fn cmd_download(
    rt: &Runtime,
    config: &Config,
    identifier: &str,
    title: Option<&str>,
) -> anyhow::Result<()> {
    let downloader = Downloader::new(
        config.library.music_dir.clone(),
        config.download.clone(),
        rt.handle().clone(),
    );
    downloader.start(identifier, title.unwrap_or(identifier))?;

    let progress = rt.block_on(async {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        let mut last_percent = -1.0f32;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    debug!("Interrupted, cancelling download");
                    downloader.cancel();
                    break downloader.progress();
                }
                _ = ticker.tick() => {
                    let progress = downloader.progress();
                    if !progress.is_running {
                        break progress;
                    }
                    if progress.percent > last_percent {
                        last_percent = progress.percent;
                        print_progress(&progress);
                    }
                }
            }
        }
    });

    println!("\n{}", progress.status);
    match progress.files.first() {
        Some(file) => {
            println!("Saved to {}", file.display());
            Ok(())
        }
        None if progress.status == STATUS_CANCELLED => Ok(()),
        None => {
            if let Some(output) = &progress.last_output {
                eprintln!("{}", output.trim_end());
            }
            anyhow::bail!("{}", progress.status)
        }
    }
}

fn print_progress(progress: &DownloadProgress) {
    use std::io::Write;
    print!("\r{:5.1}%  {}", progress.percent, progress.status);
    let _ = std::io::stdout().flush();
}
