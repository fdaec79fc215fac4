//! Audio decoder using symphonia for multi-format support.
//!
//! Supported formats:
//! - MP3
//! - FLAC
//! - OGG Vorbis
//! - WAV/PCM
//! - AAC

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::PlayerError;
use super::stream::{AudioStream, OUTPUT_CHANNELS, StreamOpener, to_stereo};

/// Opens files through symphonia.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaOpener;

impl StreamOpener for SymphoniaOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn AudioStream>, PlayerError> {
        Ok(Box::new(AudioDecoder::open(path)?))
    }
}

/// Audio decoder wrapper for symphonia.
pub struct AudioDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    n_frames: u64,
    /// Decoded stereo samples not yet handed out
    pending: Vec<f32>,
    pending_pos: usize,
    /// Frames handed out so far
    cursor: u64,
    finished: bool,
}

impl AudioDecoder {
    /// Open a file for decoding.
    pub fn open(path: &Path) -> Result<Self, PlayerError> {
        let file = File::open(path)
            .map_err(|e| PlayerError::FileNotFound(format!("{}: {}", path.display(), e)))?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension() {
            hint.with_extension(&ext.to_string_lossy());
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let metadata_opts = MetadataOptions::default();

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &metadata_opts)
            .map_err(|e| PlayerError::UnsupportedFormat(e.to_string()))?;

        let reader = probed.format;

        // Find the first audio track
        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| PlayerError::UnsupportedFormat("No audio track found".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| PlayerError::Decode("Unknown sample rate".to_string()))?;
        let channels = codec_params.channels.map(|c| c.count() as u16).unwrap_or(2);
        let n_frames = codec_params.n_frames.unwrap_or(0);

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| PlayerError::Decode(e.to_string()))?;

        tracing::debug!(
            path = %path.display(),
            sample_rate,
            channels,
            n_frames,
            "Opened audio stream"
        );

        Ok(Self {
            reader,
            decoder,
            track_id,
            sample_rate,
            channels,
            n_frames,
            pending: Vec::new(),
            pending_pos: 0,
            cursor: 0,
            finished: false,
        })
    }

    /// Decode the next packet into interleaved f32 samples.
    ///
    /// Returns `Ok(None)` at end of stream.
    fn decode_next(&mut self) -> Result<Option<Vec<f32>>, PlayerError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(PlayerError::Decode(e.to_string())),
            };

            // Skip packets from other tracks
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(_)) => continue, // Skip bad frame
                Err(e) => return Err(PlayerError::Decode(e.to_string())),
            };

            return Ok(Some(Self::convert_to_f32(&decoded)));
        }
    }

    /// Convert audio buffer to interleaved f32 samples.
    fn convert_to_f32(buffer: &AudioBufferRef) -> Vec<f32> {
        fn interleave<T: Copy>(planes: &[&[T]], frames: usize, f: impl Fn(T) -> f32) -> Vec<f32> {
            let mut output = Vec::with_capacity(frames * planes.len());
            for frame in 0..frames {
                for plane in planes {
                    output.push(f(plane[frame]));
                }
            }
            output
        }

        match buffer {
            AudioBufferRef::F32(buf) => interleave(buf.planes().planes(), buf.frames(), |s| s),
            AudioBufferRef::S16(buf) => {
                interleave(buf.planes().planes(), buf.frames(), |s| s as f32 / 32768.0)
            }
            AudioBufferRef::S24(buf) => {
                interleave(buf.planes().planes(), buf.frames(), |s| s.0 as f32 / 8388608.0)
            }
            AudioBufferRef::S32(buf) => {
                interleave(buf.planes().planes(), buf.frames(), |s| s as f32 / 2147483648.0)
            }
            AudioBufferRef::U8(buf) => {
                interleave(buf.planes().planes(), buf.frames(), |s| (s as f32 - 128.0) / 128.0)
            }
            _ => Vec::new(),
        }
    }
}

impl AudioStream for AudioDecoder {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn len_frames(&self) -> u64 {
        self.n_frames
    }

    fn position(&self) -> Duration {
        Duration::from_secs_f64(self.cursor as f64 / self.sample_rate as f64)
    }

    fn read(&mut self, out: &mut [f32]) -> usize {
        let mut written = 0;
        while written < out.len() {
            if self.pending_pos >= self.pending.len() {
                if self.finished {
                    break;
                }
                match self.decode_next() {
                    Ok(Some(samples)) => {
                        self.pending = to_stereo(&samples, self.channels as usize);
                        self.pending_pos = 0;
                    }
                    Ok(None) => self.finished = true,
                    Err(e) => {
                        tracing::error!("Decode error: {}", e);
                        self.finished = true;
                    }
                }
                continue;
            }

            let n = (self.pending.len() - self.pending_pos).min(out.len() - written);
            out[written..written + n]
                .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
            self.pending_pos += n;
            written += n;
        }
        self.cursor += (written / OUTPUT_CHANNELS) as u64;
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_nonexistent_file() {
        let result = AudioDecoder::open(Path::new("/nonexistent/file.mp3"));
        assert!(matches!(result, Err(PlayerError::FileNotFound(_))));
    }

    #[test]
    fn test_decoder_rejects_non_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.mp3");
        std::fs::write(&path, b"definitely not audio").unwrap();
        assert!(SymphoniaOpener.open(&path).is_err());
    }

    /// Minimal 16-bit PCM WAV file.
    fn wav_bytes(sample_rate: u32, channels: u16, frames: u32) -> Vec<u8> {
        let block_align = channels * 2;
        let data_len = frames * block_align as u32;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
        bytes.extend_from_slice(&block_align.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        bytes.resize(bytes.len() + data_len as usize, 0);
        bytes
    }

    #[test]
    fn test_decode_wav_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        std::fs::write(&path, wav_bytes(8000, 1, 8000)).unwrap();

        let mut stream = SymphoniaOpener.open(&path).unwrap();
        assert_eq!(stream.sample_rate(), 8000);
        assert_eq!(stream.len_frames(), 8000);
        assert_eq!(stream.duration(), Duration::from_secs(1));

        let mut buf = vec![0.0f32; 4096];
        let mut total = 0;
        loop {
            let n = stream.read(&mut buf);
            total += n;
            if n < buf.len() {
                break;
            }
        }
        // Mono is widened to stereo
        assert_eq!(total, 8000 * OUTPUT_CHANNELS);
        assert_eq!(stream.position(), Duration::from_secs(1));
    }
}
