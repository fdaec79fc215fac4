//! Playback controller: one track at a time from an ordered playlist.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Player (caller threads)                     │
//! │   play_index / next / previous / toggle_pause / stop / state    │
//! └────────────────────────────┬────────────────────────────────────┘
//!                              │ session lock, then mixer lock
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Mixer (shared with the device)                  │
//! │        current voice, pause flag, volume, decode cursor         │
//! └────────────────────────────┬────────────────────────────────────┘
//!                              │ cpal callback
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Audio device                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! When a voice runs dry the device posts its id on a channel. The
//! `player-events` thread picks it up, advances the playlist under the
//! session lock, releases it, and only then runs the song-change callback.

mod decoder;
mod output;
mod resampler;
mod state;
mod stream;

pub use decoder::SymphoniaOpener;
pub use output::{CpalBackend, Mixer, OutputBackend, SharedMixer, Voice};
pub use resampler::ResampledStream;
pub use state::{PlaybackState, PlaybackStatus};
pub use stream::{AudioStream, StreamOpener};

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

use crate::library::TrackFile;

/// Callback run after the player moves on to another track by itself.
pub type SongChangeCallback = Arc<dyn Fn(&PlaybackState) + Send + Sync>;

/// The playback controller.
///
/// Cheap to share by reference across threads; every method takes `&self`.
pub struct Player {
    inner: Arc<Shared>,
}

struct Shared {
    session: Mutex<Session>,
    mixer: SharedMixer,
    backend: Arc<dyn OutputBackend>,
    opener: Arc<dyn StreamOpener>,
    finished_tx: Sender<u64>,
    on_change: Mutex<Option<SongChangeCallback>>,
}

#[derive(Default)]
struct Session {
    tracks: Vec<TrackFile>,
    current: Option<usize>,
    status: PlaybackStatus,
    current_file: Option<PathBuf>,
    duration: Duration,
    /// Set once the output device is running
    device_rate: Option<u32>,
    /// Id of the voice last handed to the mixer
    voice_id: u64,
}

impl Player {
    /// Create a player on the given output and decoder.
    ///
    /// The device is not opened until the first track plays.
    pub fn new(
        backend: Arc<dyn OutputBackend>,
        opener: Arc<dyn StreamOpener>,
        volume: f32,
    ) -> Result<Self, PlayerError> {
        let (finished_tx, finished_rx) = unbounded();
        let inner = Arc::new(Shared {
            session: Mutex::new(Session::default()),
            mixer: Mixer::shared(volume),
            backend,
            opener,
            finished_tx,
            on_change: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        thread::Builder::new()
            .name("player-events".to_string())
            .spawn(move || run_events(weak, finished_rx))
            .map_err(|e| PlayerError::AudioInit(e.to_string()))?;

        Ok(Self { inner })
    }

    /// Player on the default audio device, decoding with symphonia.
    pub fn with_defaults(volume: f32) -> Result<Self, PlayerError> {
        Self::new(Arc::new(CpalBackend::new()), Arc::new(SymphoniaOpener), volume)
    }

    /// Replace the playlist.
    ///
    /// Playback continues. The selection follows the open track when the new
    /// list still contains it. Otherwise a selection past the end moves to
    /// the last track, or is cleared when the list is empty.
    pub fn set_playlist(&self, tracks: Vec<TrackFile>) {
        let mut session = self.inner.session.lock();
        let anchored = session
            .current_file
            .as_ref()
            .and_then(|open| tracks.iter().position(|t| &t.path == open));
        session.current = match (anchored, session.current, tracks.len()) {
            (Some(i), _, _) => Some(i),
            (None, _, 0) => None,
            (None, Some(i), len) if i >= len => Some(len - 1),
            (None, current, _) => current,
        };
        session.tracks = tracks;
    }

    /// Copy of the current playlist.
    pub fn playlist(&self) -> Vec<TrackFile> {
        self.inner.session.lock().tracks.clone()
    }

    /// Register the callback run after an automatic advance.
    pub fn set_on_song_change<F>(&self, callback: F)
    where
        F: Fn(&PlaybackState) + Send + Sync + 'static,
    {
        *self.inner.on_change.lock() = Some(Arc::new(callback));
    }

    /// Play track `index`, replacing whatever is open.
    pub fn play_index(&self, index: usize) -> Result<(), PlayerError> {
        let mut session = self.inner.session.lock();
        let len = session.tracks.len();
        if index >= len {
            return Err(PlayerError::IndexOutOfRange { index, len });
        }
        self.inner.load(&mut session, index)
    }

    /// Flip pause on the open track. No-op when idle.
    pub fn toggle_pause(&self) -> PlaybackStatus {
        let mut session = self.inner.session.lock();
        let next = match session.status {
            PlaybackStatus::Playing => PlaybackStatus::Paused,
            PlaybackStatus::Paused => PlaybackStatus::Playing,
            PlaybackStatus::Idle => return PlaybackStatus::Idle,
        };
        if self
            .inner
            .mixer
            .lock()
            .set_paused(next == PlaybackStatus::Paused)
        {
            session.status = next;
        }
        session.status
    }

    /// Play the following track, wrapping to the first.
    pub fn next(&self) -> Result<(), PlayerError> {
        let mut session = self.inner.session.lock();
        let len = session.tracks.len();
        if len == 0 {
            return Err(PlayerError::EmptyPlaylist);
        }
        let index = session.current.map_or(0, |i| (i + 1) % len);
        self.inner.load(&mut session, index)
    }

    /// Play the preceding track, wrapping to the last.
    pub fn previous(&self) -> Result<(), PlayerError> {
        let mut session = self.inner.session.lock();
        let len = session.tracks.len();
        if len == 0 {
            return Err(PlayerError::EmptyPlaylist);
        }
        let index = session.current.map_or(len - 1, |i| (i % len + len - 1) % len);
        self.inner.load(&mut session, index)
    }

    /// Close the open track. The selection is kept.
    pub fn stop(&self) {
        let mut session = self.inner.session.lock();
        self.inner.close(&mut session);
    }

    pub fn set_volume(&self, volume: f32) {
        self.inner.mixer.lock().set_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        self.inner.mixer.lock().volume()
    }

    /// Get current playback state snapshot.
    pub fn state(&self) -> PlaybackState {
        self.inner.snapshot()
    }
}

impl Shared {
    /// Open track `index` and hand it to the mixer.
    ///
    /// The old voice is closed first, so a failure leaves nothing open.
    fn load(&self, session: &mut Session, index: usize) -> Result<(), PlayerError> {
        self.close(session);
        session.current = Some(index);
        let path = session.tracks[index].path.clone();

        let stream = self.opener.open(&path)?;
        let device_rate = match session.device_rate {
            Some(rate) => rate,
            None => {
                let rate = self
                    .backend
                    .start(stream.sample_rate(), Arc::clone(&self.mixer))?;
                session.device_rate = Some(rate);
                rate
            }
        };

        let stream: Box<dyn AudioStream> = if stream.sample_rate() == device_rate {
            stream
        } else {
            Box::new(ResampledStream::new(stream, device_rate)?)
        };

        session.voice_id += 1;
        session.duration = stream.duration();
        self.mixer.lock().play(Voice::new(
            session.voice_id,
            stream,
            self.finished_tx.clone(),
        ));
        session.status = PlaybackStatus::Playing;
        tracing::info!(index, path = %path.display(), "Playing");
        session.current_file = Some(path);
        Ok(())
    }

    fn close(&self, session: &mut Session) {
        self.mixer.lock().clear();
        session.status = PlaybackStatus::Idle;
        session.current_file = None;
        session.duration = Duration::ZERO;
    }

    fn snapshot(&self) -> PlaybackState {
        let mut state = {
            let session = self.session.lock();
            PlaybackState {
                status: session.status,
                current_index: session.current,
                current_track: session.current_file.clone(),
                position: Duration::ZERO,
                duration: session.duration,
                total_tracks: session.tracks.len(),
                device_rate: session.device_rate,
            }
        };
        if state.is_playing() {
            state.position = self.mixer.lock().position().unwrap_or_default();
        }
        state
    }

    /// Voice `id` played to the end.
    fn stream_ended(&self, id: u64) {
        {
            let mut session = self.session.lock();
            if session.voice_id != id || session.status != PlaybackStatus::Playing {
                return;
            }
            self.close(&mut session);

            let len = session.tracks.len();
            if len == 0 {
                session.current = None;
            } else {
                let index = session.current.map_or(0, |i| (i + 1) % len);
                if let Err(e) = self.load(&mut session, index) {
                    tracing::warn!("Auto-advance to track {} failed: {}", index, e);
                }
            }
        }

        let callback = self.on_change.lock().clone();
        if let Some(callback) = callback {
            callback(&self.snapshot());
        }
    }
}

fn run_events(shared: Weak<Shared>, finished: Receiver<u64>) {
    for id in finished.iter() {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.stream_ended(id);
    }
    tracing::debug!("Player event thread exiting");
}

/// Player errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlayerError {
    #[error("Audio output initialization failed: {0}")]
    AudioInit(String),

    #[error("Failed to decode audio: {0}")]
    Decode(String),

    #[error("Audio channel closed")]
    ChannelClosed,

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Playlist is empty")]
    EmptyPlaylist,

    #[error("Track {index} out of range (playlist has {len})")]
    IndexOutOfRange { index: usize, len: usize },
}
