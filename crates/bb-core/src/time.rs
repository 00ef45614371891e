//! Time-related types for the playback core
//!
//! Two time domains exist:
//! - Sample time: absolute audio-sample positions (i64, may go negative
//!   during pre-roll arithmetic)
//! - Musical time: beats as f64, tempo-dependent

use serde::{Deserialize, Serialize};

/// Absolute position on the sample timeline
pub type SampleTime = i64;

/// Musical position in beats (quarter notes at the project tempo)
pub type Beat = f64;

/// Track identifier
pub type TrackId = u32;

/// Sample position in the timeline (unsigned, for buffer/file offsets)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SamplePosition(pub u64);

impl SamplePosition {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub fn from_seconds(seconds: f64, sample_rate: f64) -> Self {
        Self((seconds * sample_rate) as u64)
    }

    #[inline]
    pub fn to_seconds(self, sample_rate: f64) -> f64 {
        self.0 as f64 / sample_rate
    }

    #[inline]
    pub fn advance(&mut self, samples: u64) {
        self.0 += samples;
    }
}

impl std::ops::Add<u64> for SamplePosition {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl std::ops::Sub for SamplePosition {
    type Output = u64;

    fn sub(self, rhs: Self) -> Self::Output {
        self.0.saturating_sub(rhs.0)
    }
}

/// Musical time (bars, beats, ticks) for display
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MusicalTime {
    pub bar: u32,
    pub beat: u32,
    pub tick: u32,
}

impl MusicalTime {
    pub const TICKS_PER_BEAT: u32 = 960; // Standard MIDI resolution

    /// Convert a beat position to bars/beats/ticks at a given meter
    pub fn from_beats(beats: Beat, beats_per_bar: u32) -> Self {
        let beats = beats.max(0.0);
        let total_ticks = (beats * Self::TICKS_PER_BEAT as f64) as u64;
        let ticks_per_bar = Self::TICKS_PER_BEAT as u64 * beats_per_bar.max(1) as u64;

        let bar = (total_ticks / ticks_per_bar) as u32;
        let remaining = total_ticks % ticks_per_bar;
        let beat = (remaining / Self::TICKS_PER_BEAT as u64) as u32;
        let tick = (remaining % Self::TICKS_PER_BEAT as u64) as u32;

        Self { bar, beat, tick }
    }
}
