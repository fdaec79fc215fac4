//! Background audio acquisition through an external downloader.
//!
//! A [`Downloader`] runs at most one job at a time. The job shells out to
//! the configured tool (yt-dlp by default), asking for audio only in a fixed
//! codec at best quality, and writes into the music folder under a name
//! derived from the result title.
//!
//! Callers never wait on a job. They poll [`Downloader::progress`], which
//! returns a consistent snapshot of the job state; completion is visible
//! only there.
//!
//! # Locking
//!
//! All job fields live behind one mutex. Starting checks and sets the
//! running flag under that lock, so two jobs can never overlap. Each start
//! bumps a generation counter; a background path only writes back while its
//! generation is current, so a cancelled job cannot clobber its successor.

mod filename;

pub use filename::derive_name;

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DownloadConfig;

/// Status text of a downloader that has never run a job.
pub const STATUS_IDLE: &str = "Idle";
/// Status text after a job was cancelled.
pub const STATUS_CANCELLED: &str = "Download cancelled";

/// Progress lines printed by the tool with `--newline`.
static PROGRESS_LINE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\[download\]\s+(\d+(?:\.\d+)?)%").ok());

/// Page URL handed to the downloader for a result identifier.
pub fn watch_url(identifier: &str) -> String {
    format!("https://www.youtube.com/watch?v={identifier}")
}

/// Snapshot of the acquisition job.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    /// Whether a job is running
    pub is_running: bool,
    /// Percent complete (0 - 100)
    pub percent: f32,
    /// Human-readable status
    pub status: String,
    /// Files produced by the last successful job
    pub files: Vec<PathBuf>,
    /// Combined tool output of the last failed job
    pub last_output: Option<String>,
}

/// Download errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DownloadError {
    #[error("a download is already in progress")]
    AlreadyRunning,

    #[error("downloader not available: {0}")]
    ToolNotFound(String),
}

#[derive(Debug)]
struct JobState {
    running: bool,
    percent: f32,
    status: String,
    files: Vec<PathBuf>,
    last_output: Option<String>,
    generation: u64,
    cancel: Option<CancellationToken>,
}

impl Default for JobState {
    fn default() -> Self {
        Self {
            running: false,
            percent: 0.0,
            status: STATUS_IDLE.to_string(),
            files: Vec::new(),
            last_output: None,
            generation: 0,
            cancel: None,
        }
    }
}

/// Runs one background acquisition job at a time.
pub struct Downloader {
    state: Arc<Mutex<JobState>>,
    music_dir: PathBuf,
    config: DownloadConfig,
    runtime: Handle,
}

impl Downloader {
    /// Create an idle downloader writing into `music_dir`.
    ///
    /// Jobs are spawned on `runtime`.
    pub fn new(music_dir: impl Into<PathBuf>, config: DownloadConfig, runtime: Handle) -> Self {
        Self {
            state: Arc::new(Mutex::new(JobState::default())),
            music_dir: music_dir.into(),
            config,
            runtime,
        }
    }

    /// Folder downloads are written to.
    pub fn music_dir(&self) -> &Path {
        &self.music_dir
    }

    /// Start downloading `identifier`, naming the file after `title`.
    ///
    /// Returns immediately. Rejected with [`DownloadError::AlreadyRunning`]
    /// while another job is active.
    pub fn start(&self, identifier: &str, title: &str) -> Result<(), DownloadError> {
        let token = CancellationToken::new();
        let generation = {
            let mut state = self.state.lock();
            if state.running {
                return Err(DownloadError::AlreadyRunning);
            }
            state.running = true;
            state.percent = 0.0;
            state.status = "Starting download...".to_string();
            state.files.clear();
            state.last_output = None;
            state.generation += 1;
            state.cancel = Some(token.clone());
            state.generation
        };

        let job = Job {
            state: Arc::clone(&self.state),
            generation,
            music_dir: self.music_dir.clone(),
            config: self.config.clone(),
            identifier: identifier.to_string(),
            title: title.to_string(),
            token,
        };
        info!(target: "download", identifier, title, generation, "Starting download");
        self.runtime.spawn(job.run());
        Ok(())
    }

    /// Current job snapshot. Never blocks on the job itself.
    pub fn progress(&self) -> DownloadProgress {
        let state = self.state.lock();
        DownloadProgress {
            is_running: state.running,
            percent: state.percent,
            status: state.status.clone(),
            files: state.files.clone(),
            last_output: state.last_output.clone(),
        }
    }

    /// Whether a job is running.
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Cancel the running job, killing the tool if it was spawned.
    ///
    /// Does nothing when no job is running.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        if !state.running {
            return;
        }
        if let Some(token) = state.cancel.take() {
            token.cancel();
        }
        state.running = false;
        state.status = STATUS_CANCELLED.to_string();
        info!(target: "download", generation = state.generation, "Download cancelled");
    }

    /// Check that the tool can be executed, returning its version string.
    pub fn check_tool(&self) -> Result<String, DownloadError> {
        let output = std::process::Command::new(&self.config.program)
            .args(&self.config.program_args)
            .arg("--version")
            .output()
            .map_err(|e| DownloadError::ToolNotFound(format!("{}: {}", self.config.program, e)))?;

        if !output.status.success() {
            return Err(DownloadError::ToolNotFound(format!(
                "{} exited with {}",
                self.config.program, output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Drop for Downloader {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// How a job ended.
#[derive(Debug)]
enum Outcome {
    Completed(PathBuf),
    Failed { message: String, output: String },
    Cancelled,
}

/// One execution of the background path.
struct Job {
    state: Arc<Mutex<JobState>>,
    generation: u64,
    music_dir: PathBuf,
    config: DownloadConfig,
    identifier: String,
    title: String,
    token: CancellationToken,
}

impl Job {
    async fn run(self) {
        let name = derive_name(&self.title, &self.identifier);
        self.update(|state| state.status = format!("Downloading {name}..."));

        let outcome = self.execute(&name).await;
        self.finish(outcome);
    }

    /// Apply `f` to the shared state if this job is still the current one.
    fn update(&self, f: impl FnOnce(&mut JobState)) -> bool {
        let mut state = self.state.lock();
        if state.generation != self.generation {
            return false;
        }
        f(&mut state);
        true
    }

    fn command(&self, name: &str) -> Command {
        let template = self.music_dir.join(format!("{name}.%(ext)s"));
        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.program_args)
            .arg("-x")
            .args(["--audio-format", self.config.audio_format.as_str()])
            .args(["--audio-quality", self.config.audio_quality.as_str()])
            .arg("-o")
            .arg(&template)
            .arg("--no-playlist")
            .arg("--newline")
            .arg(watch_url(&self.identifier))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    async fn execute(&self, name: &str) -> Outcome {
        let mut child = match self.command(name).spawn() {
            Ok(child) => child,
            Err(e) => {
                return Outcome::Failed {
                    message: format!("Download failed: could not run {}: {}", self.config.program, e),
                    output: String::new(),
                };
            }
        };
        debug!(target: "download", pid = ?child.id(), "Downloader spawned");

        let finished = tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            result = self.drain_and_wait(&mut child) => Some(result),
        };

        let Some((status, output)) = finished else {
            if let Err(e) = child.start_kill() {
                debug!(target: "download", error = %e, "Downloader already exited");
            }
            if let Err(e) = child.wait().await {
                debug!(target: "download", error = %e, "Could not reap cancelled downloader");
            }
            return Outcome::Cancelled;
        };

        if self.token.is_cancelled() {
            return Outcome::Cancelled;
        }

        match status {
            Ok(status) if status.success() => {}
            Ok(status) => {
                return Outcome::Failed {
                    message: format!("Download failed: {status}"),
                    output,
                };
            }
            Err(e) => {
                return Outcome::Failed {
                    message: format!("Download failed: {e}"),
                    output,
                };
            }
        }

        match resolve_output(&self.music_dir, name, &self.config.audio_format) {
            Some(path) => Outcome::Completed(path),
            None => Outcome::Failed {
                message: "Download completed but file not found".to_string(),
                output,
            },
        }
    }

    /// Read both output pipes to the end, then reap the process.
    ///
    /// Returns the exit status and the combined output.
    async fn drain_and_wait(&self, child: &mut Child) -> (std::io::Result<ExitStatus>, String) {
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_task = async {
            let mut collected = String::new();
            let Some(stdout) = stdout else {
                return collected;
            };
            // Lines are not always UTF-8; keep reading to EOF regardless
            let mut reader = BufReader::new(stdout);
            let mut raw = Vec::new();
            loop {
                raw.clear();
                match reader.read_until(b'\n', &mut raw).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(target: "download", error = %e, "Downloader stdout closed");
                        break;
                    }
                }
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim_end_matches(['\r', '\n']);
                if let Some(percent) = parse_progress(line) {
                    // 100 is reserved for a resolved output file
                    let percent = percent.min(99.0);
                    self.update(|state| {
                        if state.running {
                            state.percent = percent;
                        }
                    });
                }
                collected.push_str(line);
                collected.push('\n');
            }
            collected
        };

        let (mut output, errors) = tokio::join!(stdout_task, read_all(stderr));
        output.push_str(&errors);

        (child.wait().await, output)
    }

    fn finish(&self, outcome: Outcome) {
        let applied = self.update(|state| {
            state.running = false;
            state.cancel = None;
            match &outcome {
                Outcome::Completed(path) => {
                    let file_name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    state.files = vec![path.clone()];
                    state.percent = 100.0;
                    state.status = format!("Downloaded: {file_name}");
                }
                Outcome::Failed { message, output } => {
                    state.status = message.clone();
                    state.last_output = (!output.is_empty()).then(|| output.clone());
                }
                Outcome::Cancelled => {
                    state.status = STATUS_CANCELLED.to_string();
                }
            }
        });

        if !applied {
            debug!(target: "download", generation = self.generation, "Superseded job finished");
            return;
        }

        match outcome {
            Outcome::Completed(path) => {
                info!(target: "download", path = %path.display(), "Download complete");
            }
            Outcome::Failed { message, output } => {
                warn!(target: "download", %message, "Download failed");
                if !output.is_empty() {
                    warn!(target: "download", "Downloader output:\n{}", output.trim_end());
                }
            }
            Outcome::Cancelled => {
                info!(target: "download", generation = self.generation, "Download stopped");
            }
        }
    }
}

async fn read_all(pipe: Option<impl AsyncRead + Unpin>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!(target: "download", error = %e, "Downloader stderr closed");
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// Parse a `[download]  42.0% of ...` line.
fn parse_progress(line: &str) -> Option<f32> {
    let re = PROGRESS_LINE.as_ref()?;
    re.captures(line.trim_start())?.get(1)?.as_str().parse().ok()
}

/// Locate the file a finished job produced.
///
/// Prefers `<name>.<format>`; otherwise takes the first `<name>.*` entry.
fn resolve_output(dir: &Path, name: &str, format: &str) -> Option<PathBuf> {
    let exact = dir.join(format!("{name}.{format}"));
    if exact.is_file() {
        return Some(exact);
    }

    let prefix = format!("{name}.");
    let mut matches: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    matches.sort();
    matches.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    #[test]
    fn test_parse_progress() {
        assert_eq!(parse_progress("[download]  42.5% of 3.10MiB at 1.2MiB/s"), Some(42.5));
        assert_eq!(parse_progress("[download] 100% of 3.10MiB"), Some(100.0));
        assert_eq!(parse_progress("[ExtractAudio] Destination: x.mp3"), None);
        assert_eq!(parse_progress("[download] Destination: x.webm"), None);
    }

    #[test]
    fn test_watch_url() {
        assert_eq!(watch_url("abc"), "https://www.youtube.com/watch?v=abc");
    }

    #[test]
    fn test_resolve_output_prefers_exact_name() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Song.m4a"), b"").unwrap();
        std::fs::write(dir.path().join("Song.mp3"), b"").unwrap();

        let path = resolve_output(dir.path(), "Song", "mp3").unwrap();
        assert_eq!(path, dir.path().join("Song.mp3"));
    }

    #[test]
    fn test_resolve_output_falls_back_to_prefix_match() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Song.opus"), b"").unwrap();
        std::fs::write(dir.path().join("Songbook.mp3"), b"").unwrap();

        let path = resolve_output(dir.path(), "Song", "mp3").unwrap();
        assert_eq!(path, dir.path().join("Song.opus"));
        assert!(resolve_output(dir.path(), "Missing", "mp3").is_none());
    }

    #[tokio::test]
    async fn test_cancel_without_job_is_noop() {
        let dir = tempdir().unwrap();
        let downloader = Downloader::new(dir.path(), DownloadConfig::default(), Handle::current());

        downloader.cancel();
        downloader.cancel();

        let progress = downloader.progress();
        assert!(!progress.is_running);
        assert_eq!(progress.status, STATUS_IDLE);
        assert!(progress.files.is_empty());
    }

    #[tokio::test]
    async fn test_missing_tool_fails_job() {
        let dir = tempdir().unwrap();
        let config = DownloadConfig {
            program: "tunedeck-no-such-downloader".to_string(),
            ..Default::default()
        };
        let downloader = Downloader::new(dir.path(), config, Handle::current());
        assert!(matches!(downloader.check_tool(), Err(DownloadError::ToolNotFound(_))));

        downloader.start("abc", "Song").unwrap();
        let progress = wait_until_idle(&downloader).await;
        assert!(progress.status.starts_with("Download failed"));
        assert!(progress.files.is_empty());
    }

    /// Poll until the job is no longer running.
    async fn wait_until_idle(downloader: &Downloader) -> DownloadProgress {
        for _ in 0..500 {
            let progress = downloader.progress();
            if !progress.is_running {
                return progress;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("download did not finish: {:?}", downloader.progress());
    }

    /// A shell script standing in for the downloader.
    ///
    /// `body` runs after `$out` is set to the `-o` template with the
    /// extension placeholder still in it.
    #[cfg(unix)]
    fn fake_tool(body: &str) -> (TempDir, TempDir, DownloadConfig) {
        let tool_dir = tempdir().unwrap();
        let music_dir = tempdir().unwrap();
        let script = tool_dir.path().join("fake-dl.sh");
        let source = format!(
            "out=\"\"\n\
             while [ $# -gt 0 ]; do\n\
               case \"$1\" in\n\
                 -o) out=\"$2\"; shift ;;\n\
               esac\n\
               shift\n\
             done\n\
             {body}\n"
        );
        std::fs::write(&script, source).unwrap();
        let config = DownloadConfig {
            program: "sh".to_string(),
            program_args: vec![script.to_string_lossy().to_string()],
            ..Default::default()
        };
        (tool_dir, music_dir, config)
    }

    #[cfg(unix)]
    const WRITE_MP3: &str = "echo \"[download]  50.0% of 3.00MiB\"\n\
                             : > \"$(printf '%s' \"$out\" | sed 's/%(ext)s/mp3/')\"";

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_successful_download() {
        let (_tool, music, config) = fake_tool(WRITE_MP3);
        let downloader = Downloader::new(music.path(), config, Handle::current());

        downloader.start("vid123", "A/B: Song?").unwrap();
        let progress = wait_until_idle(&downloader).await;

        assert_eq!(progress.files, vec![music.path().join("AB Song.mp3")]);
        assert_eq!(progress.percent, 100.0);
        assert!(!progress.is_running);
        assert_eq!(progress.status, "Downloaded: AB Song.mp3");
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_non_utf8_output_does_not_break_download() {
        let (_tool, music, config) = fake_tool(
            "printf '[download] Destination: Caf\\351 Song.webm\\n'\n\
             for p in 10 20 30 40 50; do echo \"[download]  $p.0% of 3.00MiB\"; done\n\
             : > \"$(printf '%s' \"$out\" | sed 's/%(ext)s/mp3/')\"",
        );
        let downloader = Downloader::new(music.path(), config, Handle::current());

        downloader.start("vid", "Cafe Song").unwrap();
        let progress = wait_until_idle(&downloader).await;

        assert_eq!(progress.files, vec![music.path().join("Cafe Song.mp3")]);
        assert_eq!(progress.status, "Downloaded: Cafe Song.mp3");
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_progress_visible_while_running() {
        let (_tool, music, config) = fake_tool(
            "echo \"[download]  50.0% of 3.00MiB\"\n\
             sleep 2\n\
             : > \"$(printf '%s' \"$out\" | sed 's/%(ext)s/mp3/')\"",
        );
        let downloader = Downloader::new(music.path(), config, Handle::current());

        downloader.start("vid", "Halfway").unwrap();
        let mut seen = None;
        for _ in 0..75 {
            let progress = downloader.progress();
            if progress.percent > 0.0 {
                seen = Some(progress);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let seen = seen.expect("no intermediate progress");
        assert_eq!(seen.percent, 50.0);
        assert!(seen.is_running);

        let progress = wait_until_idle(&downloader).await;
        assert_eq!(progress.percent, 100.0);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_illegal_title_uses_identifier() {
        let (_tool, music, config) = fake_tool(WRITE_MP3);
        let downloader = Downloader::new(music.path(), config, Handle::current());

        downloader.start("vid123", "???").unwrap();
        let progress = wait_until_idle(&downloader).await;

        assert_eq!(progress.files, vec![music.path().join("vid123.mp3")]);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_other_extension_found_by_prefix() {
        let (_tool, music, config) =
            fake_tool(": > \"$(printf '%s' \"$out\" | sed 's/%(ext)s/opus/')\"");
        let downloader = Downloader::new(music.path(), config, Handle::current());

        downloader.start("vid", "Track").unwrap();
        let progress = wait_until_idle(&downloader).await;

        assert_eq!(progress.files, vec![music.path().join("Track.opus")]);
        assert_eq!(progress.percent, 100.0);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_missing_output_is_failure() {
        let (_tool, music, config) = fake_tool("exit 0");
        let downloader = Downloader::new(music.path(), config, Handle::current());

        downloader.start("vid", "Nothing").unwrap();
        let progress = wait_until_idle(&downloader).await;

        assert_eq!(progress.status, "Download completed but file not found");
        assert!(progress.files.is_empty());
        assert!(progress.percent < 100.0);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_nonzero_exit_keeps_output() {
        let (_tool, music, config) = fake_tool("echo 'ERROR: video unavailable' >&2\nexit 1");
        let downloader = Downloader::new(music.path(), config, Handle::current());

        downloader.start("vid", "Broken").unwrap();
        let progress = wait_until_idle(&downloader).await;

        assert!(progress.status.starts_with("Download failed"));
        assert!(progress.last_output.unwrap().contains("video unavailable"));
        assert!(progress.files.is_empty());

        // A fresh start is accepted after a failure
        assert!(downloader.start("vid", "Broken").is_ok());
        wait_until_idle(&downloader).await;
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_second_start_is_rejected() {
        let (_tool, music, config) = fake_tool("exec sleep 30");
        let downloader = Downloader::new(music.path(), config, Handle::current());

        downloader.start("first", "First").unwrap();
        let before = downloader.progress();
        assert!(before.is_running);

        assert_eq!(
            downloader.start("second", "Second"),
            Err(DownloadError::AlreadyRunning)
        );
        let after = downloader.progress();
        assert!(after.is_running);
        assert_eq!(after.files, before.files);
        assert!(after.status == before.status || after.status == "Downloading First...");

        downloader.cancel();
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_running_job() {
        let (_tool, music, config) = fake_tool("exec sleep 30");
        let downloader = Downloader::new(music.path(), config, Handle::current());

        downloader.start("slow", "Slow").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        downloader.cancel();

        let progress = downloader.progress();
        assert!(!progress.is_running);
        assert_eq!(progress.status, STATUS_CANCELLED);

        // Give the background path time to observe the cancellation
        tokio::time::sleep(Duration::from_millis(200)).await;
        let progress = downloader.progress();
        assert_eq!(progress.status, STATUS_CANCELLED);
        assert!(progress.files.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_job_does_not_clobber_next_job() {
        let (_tool, music, config) = fake_tool(
            "case \"$out\" in\n  *Slow*) exec sleep 30 ;;\nesac\n\
             : > \"$(printf '%s' \"$out\" | sed 's/%(ext)s/mp3/')\"",
        );
        let downloader = Downloader::new(music.path(), config, Handle::current());

        downloader.start("slow", "Slow").unwrap();
        downloader.cancel();
        downloader.start("fast", "Fast").unwrap();

        let progress = wait_until_idle(&downloader).await;
        assert_eq!(progress.files, vec![music.path().join("Fast.mp3")]);
        assert_eq!(progress.status, "Downloaded: Fast.mp3");
    }
}
