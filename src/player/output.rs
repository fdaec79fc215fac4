//! Audio output: the shared mixer and the cpal device that drains it.
//!
//! The [`Mixer`] holds at most one [`Voice`], the stream of the current
//! track. The device callback locks the mixer, pulls samples, and when a
//! voice runs dry it is dropped and its id is posted on the voice's
//! `finished` channel. Nothing else happens on the device thread.
//!
//! The output device is opened once, at the rate of the first track played,
//! and never reconfigured. Later tracks are resampled to that rate.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{Sender, bounded};
use parking_lot::Mutex;

use super::PlayerError;
use super::stream::{AudioStream, OUTPUT_CHANNELS};

/// The mixer behind its device lock.
pub type SharedMixer = Arc<Mutex<Mixer>>;

/// The stream of one track, as handed to the mixer.
pub struct Voice {
    id: u64,
    stream: Box<dyn AudioStream>,
    paused: bool,
    finished: Sender<u64>,
}

impl Voice {
    /// `finished` receives `id` once the stream drains on its own.
    pub fn new(id: u64, stream: Box<dyn AudioStream>, finished: Sender<u64>) -> Self {
        Self {
            id,
            stream,
            paused: false,
            finished,
        }
    }
}

/// Single-voice mixer shared between the player and the device callback.
pub struct Mixer {
    voice: Option<Voice>,
    volume: f32,
}

impl Mixer {
    pub fn new(volume: f32) -> Self {
        Self {
            voice: None,
            volume: volume.clamp(0.0, 1.0),
        }
    }

    /// Wrap a new mixer in its lock.
    pub fn shared(volume: f32) -> SharedMixer {
        Arc::new(Mutex::new(Self::new(volume)))
    }

    /// Replace the current voice. The previous stream is closed.
    pub fn play(&mut self, voice: Voice) {
        self.voice = Some(voice);
    }

    /// Close the current voice, if any.
    pub fn clear(&mut self) {
        self.voice = None;
    }

    pub fn has_voice(&self) -> bool {
        self.voice.is_some()
    }

    /// Pause or resume the current voice in place.
    ///
    /// Returns `false` when there is no voice.
    pub fn set_paused(&mut self, paused: bool) -> bool {
        match self.voice.as_mut() {
            Some(voice) => {
                voice.paused = paused;
                true
            }
            None => false,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.voice.as_ref().is_some_and(|v| v.paused)
    }

    /// Decode cursor of the current voice.
    pub fn position(&self) -> Option<Duration> {
        self.voice.as_ref().map(|v| v.stream.position())
    }

    /// Sample rate of the current voice's samples.
    pub fn voice_rate(&self) -> Option<u32> {
        self.voice.as_ref().map(|v| v.stream.sample_rate())
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Fill `out` with interleaved stereo samples.
    ///
    /// Silence is written when idle or paused. A voice that comes up short
    /// has ended: it is dropped and its id is posted.
    pub fn fill(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let Some(voice) = self.voice.as_mut() else {
            return;
        };
        if voice.paused {
            return;
        }

        let n = voice.stream.read(out);
        if self.volume < 1.0 {
            for sample in &mut out[..n] {
                *sample *= self.volume;
            }
        }

        if n < out.len()
            && let Some(voice) = self.voice.take()
        {
            // The receiver is gone only while the player shuts down
            let _ = voice.finished.send(voice.id);
        }
    }
}

/// Something that plays a [`SharedMixer`] on an output device.
pub trait OutputBackend: Send + Sync {
    /// Open the device at `sample_rate` and start draining `mixer`.
    ///
    /// Called once per process. Returns the rate the device actually runs at.
    fn start(&self, sample_rate: u32, mixer: SharedMixer) -> Result<u32, PlayerError>;
}

/// The system's default output device, via cpal.
///
/// cpal streams are not `Send` on every platform, so the stream is built
/// and owned by a dedicated thread that lives as long as this value.
#[derive(Default)]
pub struct CpalBackend {
    shutdown: Mutex<Option<Sender<()>>>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputBackend for CpalBackend {
    fn start(&self, sample_rate: u32, mixer: SharedMixer) -> Result<u32, PlayerError> {
        let (ready_tx, ready_rx) = bounded::<Result<u32, PlayerError>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || match open_stream(sample_rate, mixer) {
                Ok((stream, rate)) => {
                    let _ = ready_tx.send(Ok(rate));
                    // Park until the backend is dropped
                    let _ = shutdown_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| PlayerError::AudioInit(e.to_string()))?;

        let rate = ready_rx.recv().map_err(|_| PlayerError::ChannelClosed)??;
        *self.shutdown.lock() = Some(shutdown_tx);
        Ok(rate)
    }
}

/// Build and start an output stream, preferring `sample_rate`.
fn open_stream(sample_rate: u32, mixer: SharedMixer) -> Result<(Stream, u32), PlayerError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlayerError::AudioInit("No output device found".to_string()))?;

    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    tracing::info!("Using audio device: {}", device_name);

    let supported = device
        .default_output_config()
        .map_err(|e| PlayerError::AudioInit(e.to_string()))?;
    let channels = supported.channels();
    let format = supported.sample_format();

    let requested = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match build_stream(&device, &requested, format, Arc::clone(&mixer)) {
        Ok(stream) => (stream, sample_rate),
        Err(e) => {
            let fallback = supported.sample_rate().0;
            tracing::warn!(
                "Device rejected {}Hz ({}), falling back to {}Hz",
                sample_rate,
                e,
                fallback
            );
            let config = StreamConfig {
                sample_rate: supported.sample_rate(),
                ..requested
            };
            (build_stream(&device, &config, format, mixer)?, fallback)
        }
    };

    stream
        .0
        .play()
        .map_err(|e| PlayerError::AudioInit(e.to_string()))?;

    tracing::info!("Audio format: {}Hz, {} channels, {:?}", stream.1, channels, format);
    Ok(stream)
}

fn build_stream(
    device: &Device,
    config: &StreamConfig,
    format: SampleFormat,
    mixer: SharedMixer,
) -> Result<Stream, PlayerError> {
    let result = match format {
        SampleFormat::F32 => build_typed::<f32>(device, config, mixer),
        SampleFormat::I16 => build_typed::<i16>(device, config, mixer),
        SampleFormat::U16 => build_typed::<u16>(device, config, mixer),
        format => {
            return Err(PlayerError::AudioInit(format!(
                "Unsupported sample format: {:?}",
                format
            )));
        }
    };
    result.map_err(|e| PlayerError::AudioInit(e.to_string()))
}

/// Build an output stream for sample type `T`.
fn build_typed<T>(
    device: &Device,
    config: &StreamConfig,
    mixer: SharedMixer,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels.max(1);
            scratch.resize(frames * OUTPUT_CHANNELS, 0.0);
            mixer.lock().fill(&mut scratch);

            for (frame, out) in data.chunks_mut(channels.max(1)).enumerate() {
                let left = scratch[frame * OUTPUT_CHANNELS];
                let right = scratch[frame * OUTPUT_CHANNELS + 1];
                match out {
                    [mono] => *mono = T::from_sample((left + right) * 0.5),
                    [l, r, rest @ ..] => {
                        *l = T::from_sample(left);
                        *r = T::from_sample(right);
                        for s in rest {
                            *s = T::from_sample(0.0f32);
                        }
                    }
                    [] => {}
                }
            }
        },
        |err| {
            tracing::error!("Audio stream error: {}", err);
        },
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    /// Stereo stream of `frames` frames at a constant level.
    struct Level {
        frames: u64,
        cursor: u64,
    }

    impl AudioStream for Level {
        fn sample_rate(&self) -> u32 {
            1000
        }
        fn len_frames(&self) -> u64 {
            self.frames
        }
        fn position(&self) -> Duration {
            Duration::from_millis(self.cursor)
        }
        fn read(&mut self, out: &mut [f32]) -> usize {
            let frames = ((out.len() / OUTPUT_CHANNELS) as u64).min(self.frames - self.cursor);
            let n = frames as usize * OUTPUT_CHANNELS;
            out[..n].fill(0.8);
            self.cursor += frames;
            n
        }
    }

    fn voice(id: u64, frames: u64, tx: &Sender<u64>) -> Voice {
        Voice::new(id, Box::new(Level { frames, cursor: 0 }), tx.clone())
    }

    #[test]
    fn test_idle_mixer_outputs_silence() {
        let mut mixer = Mixer::new(1.0);
        let mut buf = vec![1.0f32; 8];
        mixer.fill(&mut buf);
        assert!(buf.iter().all(|&s| s == 0.0));
        assert!(mixer.position().is_none());
    }

    #[test]
    fn test_volume_is_applied() {
        let (tx, _rx) = unbounded();
        let mut mixer = Mixer::new(0.5);
        mixer.play(voice(1, 100, &tx));

        let mut buf = vec![0.0f32; 8];
        mixer.fill(&mut buf);
        assert!(buf.iter().all(|&s| (s - 0.4).abs() < 1e-6));
    }

    #[test]
    fn test_paused_voice_does_not_advance() {
        let (tx, rx) = unbounded();
        let mut mixer = Mixer::new(1.0);
        mixer.play(voice(1, 4, &tx));
        assert!(mixer.set_paused(true));

        let mut buf = vec![0.0f32; 64];
        mixer.fill(&mut buf);
        assert!(buf.iter().all(|&s| s == 0.0));
        assert_eq!(mixer.position(), Some(Duration::ZERO));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_end_of_stream_posts_id_once() {
        let (tx, rx) = unbounded();
        let mut mixer = Mixer::new(1.0);
        mixer.play(voice(7, 10, &tx));

        let mut buf = vec![0.0f32; 16];
        mixer.fill(&mut buf); // 8 frames, still going
        assert!(rx.try_recv().is_err());
        mixer.fill(&mut buf); // 2 frames, then dry
        assert_eq!(rx.try_recv(), Ok(7));
        assert!(!mixer.has_voice());

        mixer.fill(&mut buf);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_replacing_voice_does_not_signal_end() {
        let (tx, rx) = unbounded();
        let mut mixer = Mixer::new(1.0);
        mixer.play(voice(1, 10, &tx));
        mixer.play(voice(2, 10, &tx));
        mixer.clear();
        assert!(rx.try_recv().is_err());
        assert!(!mixer.set_paused(true));
    }
}
