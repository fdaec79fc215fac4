//! Interactive shell tying search, download and playback together.
//!
//! The shell loop owns the terminal. Searches run as tasks and report back
//! through an event channel, the download job is polled on a timer, and the
//! player's song-change callback posts into the same channel. Nothing the
//! user types ever waits on the network or the downloader.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, warn};

use super::library::load_tracks;
use crate::config::Config;
use crate::download::{Downloader, derive_name};
use crate::error::{Result, ResultExt};
use crate::library::{self, TrackFile};
use crate::player::{PlaybackState, PlaybackStatus, Player};
use crate::search::{SearchApi, SearchError, SearchResult, YouTubeClient};

/// How often the download job is polled.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

const HELP: &str = "\
Commands:
  search <words>   search for tracks
  get <n>          download search result n
  play <n>         play library track n
  pause            pause or resume
  next / prev      skip forward or back
  stop             stop playback
  volume <0-100>   set the volume
  status           show playback and download status
  cancel           cancel the running download
  list             list library tracks
  rescan           re-read the music folder
  help             show this text
  quit             leave";

/// One line of shell input. Track and result numbers are zero-based here.
#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    Search(String),
    Get(usize),
    Play(usize),
    Pause,
    Next,
    Prev,
    Stop,
    /// Volume as a fraction (0.0 - 1.0)
    Volume(f32),
    Status,
    Cancel,
    List,
    Rescan,
    Help,
    Quit,
}

impl ShellCommand {
    /// Parse a line. Blank lines are `Ok(None)`.
    ///
    /// Numbers are typed one-based, as they are listed.
    pub fn parse(line: &str) -> std::result::Result<Option<Self>, String> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word.to_lowercase().as_str() {
            "" => return Ok(None),
            "search" | "s" if rest.is_empty() => return Err("usage: search <words>".into()),
            "search" | "s" => Self::Search(rest.to_string()),
            "get" | "g" => Self::Get(parse_number(rest)?),
            "play" | "p" => Self::Play(parse_number(rest)?),
            "pause" | "space" => Self::Pause,
            "next" | "n" => Self::Next,
            "prev" | "previous" => Self::Prev,
            "stop" => Self::Stop,
            "volume" | "vol" => match rest.parse::<u8>() {
                Ok(percent) if percent <= 100 => Self::Volume(f32::from(percent) / 100.0),
                _ => return Err("usage: volume <0-100>".into()),
            },
            "status" | "st" => Self::Status,
            "cancel" => Self::Cancel,
            "list" | "ls" => Self::List,
            "rescan" => Self::Rescan,
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => return Err(format!("unknown command: {other} (try help)")),
        };
        Ok(Some(command))
    }
}

fn parse_number(text: &str) -> std::result::Result<usize, String> {
    match text.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n - 1),
        _ => Err(format!("expected a number from the list, got \"{text}\"")),
    }
}

/// Things that happen off the input loop.
#[derive(Debug)]
pub enum ShellEvent {
    Searched {
        query: String,
        result: std::result::Result<Vec<SearchResult>, SearchError>,
    },
    SongChanged(PlaybackState),
}

/// The composition root of the interactive client.
pub struct Shell {
    search: Arc<dyn SearchApi>,
    downloader: Downloader,
    player: Player,
    events: UnboundedSender<ShellEvent>,
    results: Vec<SearchResult>,
    tracks: Vec<TrackFile>,
    /// Whether the last poll saw a running job
    download_running: bool,
}

impl Shell {
    /// Wire up the shell. `events` must feed the receiver passed to [`Shell::run`].
    pub fn new(
        search: Arc<dyn SearchApi>,
        downloader: Downloader,
        player: Player,
        events: UnboundedSender<ShellEvent>,
    ) -> Self {
        let song_events = events.clone();
        player.set_on_song_change(move |state| {
            let _ = song_events.send(ShellEvent::SongChanged(state.clone()));
        });

        Self {
            search,
            downloader,
            player,
            events,
            results: Vec::new(),
            tracks: Vec::new(),
            download_running: false,
        }
    }

    fn music_dir(&self) -> PathBuf {
        self.downloader.music_dir().to_path_buf()
    }

    /// Re-read the music folder into the player.
    pub fn rescan(&mut self) -> Result<usize> {
        self.tracks = load_tracks(&self.music_dir())?;
        self.player.set_playlist(self.tracks.clone());
        debug!(tracks = self.tracks.len(), "Library rescanned");
        Ok(self.tracks.len())
    }

    /// Read commands until `quit` or end of input.
    pub async fn run(mut self, mut events: UnboundedReceiver<ShellEvent>) -> anyhow::Result<()> {
        println!("{HELP}");
        prompt();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut ticker = tokio::time::interval(POLL_INTERVAL);

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        break;
                    };
                    match ShellCommand::parse(&line) {
                        Ok(Some(command)) => {
                            if !self.execute(command) {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(message) => println!("{message}"),
                    }
                    prompt();
                }
                Some(event) = events.recv() => {
                    self.handle_event(event);
                    prompt();
                }
                _ = ticker.tick() => {
                    if self.poll_download() {
                        prompt();
                    }
                }
            }
        }

        self.downloader.cancel();
        self.player.stop();
        Ok(())
    }

    /// Run one command. Returns `false` to leave the shell.
    pub fn execute(&mut self, command: ShellCommand) -> bool {
        match command {
            ShellCommand::Search(query) => self.start_search(query),
            ShellCommand::Get(n) => self.get(n),
            ShellCommand::Play(n) => {
                let result = self
                    .player
                    .play_index(n)
                    .with_context(format!("cannot play track {}", n + 1));
                self.report(result);
            }
            ShellCommand::Pause => match self.player.toggle_pause() {
                PlaybackStatus::Paused => println!("Paused"),
                PlaybackStatus::Playing => println!("Resumed"),
                PlaybackStatus::Idle => println!("Nothing is playing"),
            },
            ShellCommand::Next => {
                let result = self.player.next().with_context("cannot skip forward");
                self.report(result);
            }
            ShellCommand::Prev => {
                let result = self.player.previous().with_context("cannot skip back");
                self.report(result);
            }
            ShellCommand::Stop => {
                self.player.stop();
                println!("Stopped");
            }
            ShellCommand::Volume(volume) => {
                self.player.set_volume(volume);
                println!("Volume {:.0}%", self.player.volume() * 100.0);
            }
            ShellCommand::Status => self.print_status(),
            ShellCommand::Cancel => {
                if self.downloader.is_running() {
                    self.downloader.cancel();
                    self.download_running = false;
                    println!("{}", self.downloader.progress().status);
                } else {
                    println!("No download running");
                }
            }
            ShellCommand::List => self.print_tracks(),
            ShellCommand::Rescan => match self.rescan() {
                Ok(n) => println!("{n} tracks"),
                Err(e) => println!("{e}"),
            },
            ShellCommand::Help => println!("{HELP}"),
            ShellCommand::Quit => return false,
        }
        true
    }

    fn start_search(&self, query: String) {
        println!("Searching for \"{query}\"...");
        let api = Arc::clone(&self.search);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = api.search(&query).await;
            let _ = events.send(ShellEvent::Searched { query, result });
        });
    }

    /// Download search result `n` unless the library already has it.
    fn get(&mut self, n: usize) {
        let Some(result) = self.results.get(n) else {
            println!("No search result {}", n + 1);
            return;
        };

        let name = derive_name(&result.title, &result.id);
        if library::contains_similar(&self.tracks, &name) {
            println!("Already in library: {name}");
            return;
        }

        match self.downloader.start(&result.id, &result.title) {
            Ok(()) => {
                self.download_running = true;
                println!("Downloading {name}");
            }
            Err(e) => println!("{e}"),
        }
    }

    pub fn handle_event(&mut self, event: ShellEvent) {
        match event {
            ShellEvent::Searched { query, result } => match result {
                Ok(results) => {
                    if results.is_empty() {
                        println!("\nNo results for \"{query}\"");
                    } else {
                        println!();
                        for (i, r) in results.iter().enumerate() {
                            println!("{:>2}. {}", i + 1, r.display_line());
                        }
                    }
                    self.results = results;
                }
                Err(e) => {
                    warn!("Search for {:?} failed: {}", query, e);
                    println!("\nNo results for \"{query}\"");
                    self.results.clear();
                }
            },
            ShellEvent::SongChanged(state) => match &state.current_track {
                Some(path) => println!("\nNow playing: {}", track_label(path)),
                None => println!("\nPlayback stopped"),
            },
        }
    }

    /// Check on the download job. Returns `true` when a job just ended.
    pub fn poll_download(&mut self) -> bool {
        let progress = self.downloader.progress();
        let ended = self.download_running && !progress.is_running;
        self.download_running = progress.is_running;
        if !ended {
            return false;
        }

        println!("\n{}", progress.status);
        let Some(file) = progress.files.first() else {
            return true;
        };
        if let Err(e) = self.rescan() {
            println!("{e}");
            return true;
        }
        let added = library::find_by_name(&self.tracks, &track_label(file))
            .and_then(|found| self.tracks.iter().position(|t| t.path == found.path));
        if let Some(i) = added {
            println!("Added as track {} (play {})", i + 1, i + 1);
        }
        true
    }

    fn print_status(&self) {
        let state = self.player.state();
        match (&state.current_track, state.current_index) {
            (Some(path), Some(i)) => println!(
                "{:?} [{}/{}] {}  {} / {} ({:.0}%)",
                state.status,
                i + 1,
                state.total_tracks,
                track_label(path),
                state.position_str(),
                state.duration_str(),
                state.position_fraction() * 100.0
            ),
            _ => println!("{:?} ({} tracks)", state.status, state.total_tracks),
        }

        let progress = self.downloader.progress();
        if progress.is_running {
            println!("Download: {:.0}% {}", progress.percent, progress.status);
        }
    }

    fn print_tracks(&self) {
        if self.tracks.is_empty() {
            println!("No tracks in {}", self.music_dir().display());
            return;
        }
        let current = self.player.state().current_index;
        for (i, track) in self.tracks.iter().enumerate() {
            let marker = if current == Some(i) { '>' } else { ' ' };
            println!("{marker}{:>3}. {}", i + 1, track.name);
        }
    }

    fn report(&self, result: Result<()>) {
        match result {
            Ok(()) => {
                if let Some(path) = self.player.state().current_track {
                    println!("Now playing: {}", track_label(&path));
                }
            }
            Err(e) => println!("{e}"),
        }
    }
}

fn track_label(path: &std::path::Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn prompt() {
    use std::io::Write;
    print!("> ");
    let _ = std::io::stdout().flush();
}

/// Run the interactive shell
pub fn cmd_shell(rt: &Runtime, config: Config) -> anyhow::Result<()> {
    let (events_tx, events_rx) = unbounded_channel();

    let client = YouTubeClient::new(&config.search)?;
    let downloader = Downloader::new(
        config.library.music_dir.clone(),
        config.download.clone(),
        rt.handle().clone(),
    );
    let player = Player::with_defaults(config.audio.volume)?;

    let mut shell = Shell::new(Arc::new(client), downloader, player, events_tx);
    match shell.rescan() {
        Ok(n) => println!("{} tracks in {}", n, config.library.music_dir.display()),
        Err(e) => warn!("{}", e),
    }

    rt.block_on(shell.run(events_rx))
}
