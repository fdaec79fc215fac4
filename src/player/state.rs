//! Player state snapshot types.

use std::path::PathBuf;
use std::time::Duration;

/// Current playback status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    /// No stream open
    #[default]
    Idle,
    Playing,
    Paused,
}

/// Point-in-time view of the player, safe to hand to the UI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackState {
    /// Current playback status
    pub status: PlaybackStatus,
    /// Selected playlist index (`None` = nothing selected)
    pub current_index: Option<usize>,
    /// Path of the open track
    pub current_track: Option<PathBuf>,
    /// Position of the decode cursor
    pub position: Duration,
    /// Length of the open track
    pub duration: Duration,
    /// Number of tracks in the playlist
    pub total_tracks: usize,
    /// Rate the output device runs at, once opened
    pub device_rate: Option<u32>,
}

impl PlaybackState {
    /// Whether a track is open (playing or paused).
    pub fn is_playing(&self) -> bool {
        self.status != PlaybackStatus::Idle
    }

    /// Whether the open track is paused.
    pub fn is_paused(&self) -> bool {
        self.status == PlaybackStatus::Paused
    }

    /// Get position as a fraction (0.0 - 1.0).
    pub fn position_fraction(&self) -> f32 {
        if self.duration.is_zero() {
            0.0
        } else {
            (self.position.as_secs_f32() / self.duration.as_secs_f32()).min(1.0)
        }
    }

    /// Format position as MM:SS.
    pub fn position_str(&self) -> String {
        format_duration(self.position)
    }

    /// Format duration as MM:SS.
    pub fn duration_str(&self) -> String {
        format_duration(self.duration)
    }
}

/// Format a duration as MM:SS or HH:MM:SS.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{}:{:02}", mins, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0:00");
        assert_eq!(format_duration(Duration::from_secs(65)), "1:05");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1:01:01");
    }

    #[test]
    fn test_position_fraction() {
        let mut state = PlaybackState::default();
        assert_eq!(state.position_fraction(), 0.0);

        state.duration = Duration::from_secs(100);
        state.position = Duration::from_secs(50);
        assert!((state.position_fraction() - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_status_flags() {
        let mut state = PlaybackState::default();
        assert!(!state.is_playing());
        assert!(!state.is_paused());

        state.status = PlaybackStatus::Paused;
        assert!(state.is_playing());
        assert!(state.is_paused());
    }
}
