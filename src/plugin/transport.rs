//! Musical transport context handed to the plugin each block.
//!
//! Recomputed from the host's [`ProcessDetails`] every block, never
//! accumulated, so positions cannot drift.

use super::types::{PlayingState, ProcessDetails};

/// Frame rate reported alongside the transport.
pub const FRAMES_PER_SECOND: u32 = 60;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransportContext {
    pub playing: bool,
    pub recording: bool,
    pub cycle_active: bool,
    pub sample_rate: f64,
    pub project_time_samples: i64,
    /// Quarter notes.
    pub project_time_music: f64,
    pub bar_position_music: f64,
    pub cycle_start_music: f64,
    pub cycle_end_music: f64,
    pub tempo: f64,
    pub time_sig_numerator: i32,
    pub time_sig_denominator: i32,
    /// Nanoseconds.
    pub system_time: i64,
    pub frames_per_second: u32,
}

impl TransportContext {
    pub fn from_details(details: &ProcessDetails) -> Self {
        Self {
            playing: details.playing_state.is_rolling(),
            recording: details.playing_state == PlayingState::Recording,
            cycle_active: details.cycle_enabled,
            sample_rate: details.sample_rate,
            project_time_samples: beats_to_samples(
                details.player_time,
                details.tempo,
                details.sample_rate,
            ),
            project_time_music: details.player_time,
            bar_position_music: details.bar_start_pos,
            cycle_start_music: details.cycle_start,
            cycle_end_music: details.cycle_end,
            tempo: details.tempo,
            time_sig_numerator: details.time_sig_numerator as i32,
            time_sig_denominator: details.time_sig_denominator as i32,
            system_time: details.nanos,
            frames_per_second: FRAMES_PER_SECOND,
        }
    }
}

/// `samples = beats / (tempo / 60) * sample_rate`; `0` for a non-positive tempo.
pub fn beats_to_samples(beats: f64, tempo: f64, sample_rate: f64) -> i64 {
    if tempo <= 0.0 || !tempo.is_finite() {
        return 0;
    }
    ((beats / (tempo / 60.0)) * sample_rate) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beats_to_samples() {
        // 4 beats at 120 bpm is two seconds
        assert_eq!(beats_to_samples(4.0, 120.0, 48_000.0), 96_000);
        assert_eq!(beats_to_samples(1.0, 60.0, 44_100.0), 44_100);
        assert_eq!(beats_to_samples(8.0, 0.0, 48_000.0), 0);
    }

    #[test]
    fn test_from_details() {
        let details = ProcessDetails {
            sample_rate: 44_100.0,
            tempo: 90.0,
            player_time: 3.0,
            bar_start_pos: 0.0,
            time_sig_numerator: 3,
            time_sig_denominator: 4,
            cycle_enabled: true,
            cycle_start: 0.0,
            cycle_end: 12.0,
            playing_state: PlayingState::Recording,
            nanos: 1_000,
            ..Default::default()
        };
        let t = TransportContext::from_details(&details);
        assert!(t.playing);
        assert!(t.recording);
        assert!(t.cycle_active);
        assert_eq!(t.project_time_samples, 88_200);
        assert_eq!(t.time_sig_numerator, 3);
        assert_eq!(t.cycle_end_music, 12.0);
        assert_eq!(t.system_time, 1_000);
        assert_eq!(t.frames_per_second, 60);
    }

    #[test]
    fn test_stopped_is_not_playing() {
        let t = TransportContext::from_details(&ProcessDetails::default());
        assert!(!t.playing);
        assert!(!t.recording);
    }
}
