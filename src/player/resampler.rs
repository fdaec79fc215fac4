//! Audio resampler using rubato for high-quality sample rate conversion.
//!
//! The output device runs at one fixed rate for the whole session. Tracks
//! recorded at another rate are wrapped in a [`ResampledStream`] so they
//! play at the right pitch and speed.

use std::time::Duration;

use rubato::{FftFixedIn, Resampler as RubatoResampler};

use super::PlayerError;
use super::stream::{AudioStream, OUTPUT_CHANNELS};

/// Input frames per resampling pass.
const CHUNK_FRAMES: usize = 1024;

/// Audio resampler wrapper.
pub struct Resampler {
    resampler: FftFixedIn<f32>,
    input_rate: u32,
    output_rate: u32,
    channels: usize,
    /// Input buffer for accumulating samples before resampling
    input_buffer: Vec<Vec<f32>>,
}

impl Resampler {
    /// Create a new resampler.
    pub fn new(input_rate: u32, output_rate: u32, channels: u16) -> Result<Self, PlayerError> {
        let channels = channels as usize;
        let resampler = FftFixedIn::<f32>::new(
            input_rate as usize,
            output_rate as usize,
            CHUNK_FRAMES,
            2, // Sub-chunks
            channels,
        )
        .map_err(|e| PlayerError::Decode(format!("Failed to create resampler: {}", e)))?;

        tracing::info!(
            "Resampler: {}Hz → {}Hz ({} channels)",
            input_rate,
            output_rate,
            channels
        );

        Ok(Self {
            resampler,
            input_rate,
            output_rate,
            channels,
            input_buffer: vec![Vec::new(); channels],
        })
    }

    /// Get the resampling ratio.
    pub fn ratio(&self) -> f64 {
        self.output_rate as f64 / self.input_rate as f64
    }

    /// Process interleaved samples, returning resampled interleaved output.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        // Deinterleave input into per-channel buffers
        for (i, sample) in input.iter().enumerate() {
            self.input_buffer[i % self.channels].push(*sample);
        }

        let mut output = Vec::new();

        while self.input_buffer[0].len() >= CHUNK_FRAMES {
            let input_chunks: Vec<Vec<f32>> = self
                .input_buffer
                .iter_mut()
                .map(|ch_buf| ch_buf.drain(..CHUNK_FRAMES).collect())
                .collect();

            match self.resampler.process(&input_chunks, None) {
                Ok(resampled) => interleave_into(&resampled, usize::MAX, &mut output),
                Err(e) => tracing::warn!("Resampling error: {}", e),
            }
        }

        output
    }

    /// Flush any remaining samples in the buffer.
    /// Call this at end of stream.
    pub fn flush(&mut self) -> Vec<f32> {
        let ratio = self.ratio();
        let remaining = self.input_buffer[0].len();
        if remaining == 0 {
            return Vec::new();
        }

        // Pad remaining samples to chunk size
        let pad_needed = CHUNK_FRAMES - remaining;
        for ch_buf in &mut self.input_buffer {
            ch_buf.extend(std::iter::repeat_n(0.0, pad_needed));
        }

        let input_chunks: Vec<Vec<f32>> = std::mem::replace(
            &mut self.input_buffer,
            vec![Vec::new(); self.channels],
        );

        let mut output = Vec::new();
        match self.resampler.process(&input_chunks, None) {
            Ok(resampled) => {
                // Only take the non-padded portion
                let expected_frames = (remaining as f64 * ratio).ceil() as usize;
                interleave_into(&resampled, expected_frames, &mut output);
            }
            Err(e) => tracing::warn!("Resampling flush error: {}", e),
        }

        output
    }
}

fn interleave_into(channels: &[Vec<f32>], max_frames: usize, output: &mut Vec<f32>) {
    let Some(first) = channels.first() else {
        return;
    };
    let frames = first.len().min(max_frames);
    for frame in 0..frames {
        for ch in channels {
            output.push(ch[frame]);
        }
    }
}

/// An [`AudioStream`] converted to a different sample rate.
///
/// Position is the wrapped stream's decode cursor.
pub struct ResampledStream {
    inner: Box<dyn AudioStream>,
    resampler: Resampler,
    output_rate: u32,
    scratch: Vec<f32>,
    buffer: Vec<f32>,
    buffer_pos: usize,
    input_done: bool,
}

impl ResampledStream {
    pub fn new(inner: Box<dyn AudioStream>, output_rate: u32) -> Result<Self, PlayerError> {
        let resampler = Resampler::new(inner.sample_rate(), output_rate, OUTPUT_CHANNELS as u16)?;
        Ok(Self {
            inner,
            resampler,
            output_rate,
            scratch: vec![0.0; CHUNK_FRAMES * OUTPUT_CHANNELS],
            buffer: Vec::new(),
            buffer_pos: 0,
            input_done: false,
        })
    }

    /// Refill the output buffer from the wrapped stream.
    fn refill(&mut self) {
        let n = self.inner.read(&mut self.scratch);
        if n < self.scratch.len() {
            self.input_done = true;
        }
        self.buffer = self.resampler.process(&self.scratch[..n]);
        if self.input_done {
            self.buffer.extend(self.resampler.flush());
        }
        self.buffer_pos = 0;
    }
}

impl AudioStream for ResampledStream {
    fn sample_rate(&self) -> u32 {
        self.output_rate
    }

    fn len_frames(&self) -> u64 {
        (self.inner.len_frames() as f64 * self.resampler.ratio()).round() as u64
    }

    fn position(&self) -> Duration {
        self.inner.position()
    }

    fn read(&mut self, out: &mut [f32]) -> usize {
        let mut written = 0;
        while written < out.len() {
            if self.buffer_pos >= self.buffer.len() {
                if self.input_done {
                    break;
                }
                self.refill();
                continue;
            }
            let n = (self.buffer.len() - self.buffer_pos).min(out.len() - written);
            out[written..written + n]
                .copy_from_slice(&self.buffer[self.buffer_pos..self.buffer_pos + n]);
            self.buffer_pos += n;
            written += n;
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Constant-valued stereo stream of a fixed length.
    struct Flat {
        rate: u32,
        frames: u64,
        cursor: u64,
    }

    impl AudioStream for Flat {
        fn sample_rate(&self) -> u32 {
            self.rate
        }
        fn len_frames(&self) -> u64 {
            self.frames
        }
        fn position(&self) -> Duration {
            Duration::from_secs_f64(self.cursor as f64 / self.rate as f64)
        }
        fn read(&mut self, out: &mut [f32]) -> usize {
            let frames = ((out.len() / OUTPUT_CHANNELS) as u64).min(self.frames - self.cursor);
            let n = frames as usize * OUTPUT_CHANNELS;
            out[..n].fill(0.25);
            self.cursor += frames;
            n
        }
    }

    #[test]
    fn test_ratio_calculation() {
        let resampler = Resampler::new(44100, 48000, 2).unwrap();
        assert!((resampler.ratio() - 48000.0 / 44100.0).abs() < 0.0001);
    }

    #[test]
    fn test_resampled_stream_length() {
        let inner = Box::new(Flat {
            rate: 24000,
            frames: 24000,
            cursor: 0,
        });
        let mut stream = ResampledStream::new(inner, 48000).unwrap();
        assert_eq!(stream.sample_rate(), 48000);
        assert_eq!(stream.len_frames(), 48000);

        let mut buf = vec![0.0f32; 4096];
        let mut total = 0;
        loop {
            let n = stream.read(&mut buf);
            total += n;
            if n < buf.len() {
                break;
            }
        }

        let frames = total / OUTPUT_CHANNELS;
        // Within one resampling chunk of the ideal length
        assert!((frames as i64 - 48000).abs() <= 2 * CHUNK_FRAMES as i64, "got {frames}");
        assert_eq!(stream.position(), Duration::from_secs(1));
    }
}
