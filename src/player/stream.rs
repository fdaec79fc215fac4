//! The decoded-stream capability the player is built on.

use std::path::Path;
use std::time::Duration;

use super::PlayerError;

/// Samples per frame handed to the mixer (interleaved stereo).
pub const OUTPUT_CHANNELS: usize = 2;

/// A source of interleaved stereo `f32` samples.
pub trait AudioStream: Send {
    /// Rate of the samples produced by [`read`](Self::read), in Hz.
    fn sample_rate(&self) -> u32;

    /// Total length in frames at [`sample_rate`](Self::sample_rate), 0 when unknown.
    fn len_frames(&self) -> u64;

    /// Time of the decode cursor.
    fn position(&self) -> Duration;

    /// Fill `out` with interleaved stereo samples.
    ///
    /// Returns the number of samples written. Anything short of
    /// `out.len()` means the stream has ended.
    fn read(&mut self, out: &mut [f32]) -> usize;

    /// Length as a duration.
    fn duration(&self) -> Duration {
        let rate = self.sample_rate();
        if rate == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(self.len_frames() as f64 / rate as f64)
        }
    }
}

/// Opens a file as an [`AudioStream`].
pub trait StreamOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn AudioStream>, PlayerError>;
}

/// Convert interleaved samples with `channels` channels to stereo.
pub fn to_stereo(samples: &[f32], channels: usize) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.iter().flat_map(|&s| [s, s]).collect(),
        2 => samples.to_vec(),
        n => samples
            .chunks_exact(n)
            .flat_map(|frame| [frame[0], frame[1]])
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_stereo() {
        assert_eq!(to_stereo(&[0.1, 0.2], 1), vec![0.1, 0.1, 0.2, 0.2]);
        assert_eq!(to_stereo(&[0.1, 0.2], 2), vec![0.1, 0.2]);
        assert_eq!(
            to_stereo(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6], 3),
            vec![0.1, 0.2, 0.4, 0.5]
        );
    }
}
