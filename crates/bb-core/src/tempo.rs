//! Tempo and time signature

use serde::{Deserialize, Serialize};

/// Minimum tempo
pub const MIN_TEMPO: f64 = 20.0;

/// Maximum tempo
pub const MAX_TEMPO: f64 = 400.0;

/// Tempo in BPM
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tempo(f64);

impl Tempo {
    pub const DEFAULT: Self = Self(120.0);

    /// Create a tempo, clamped to the valid BPM range
    pub fn new(bpm: f64) -> Self {
        Self(bpm.clamp(MIN_TEMPO, MAX_TEMPO))
    }

    #[inline]
    pub fn bpm(self) -> f64 {
        self.0
    }

    /// Duration of one beat in seconds
    #[inline]
    pub fn beat_duration_secs(self) -> f64 {
        60.0 / self.0
    }

    /// Duration of one beat in samples
    #[inline]
    pub fn beat_duration_samples(self, sample_rate: f64) -> f64 {
        self.beat_duration_secs() * sample_rate
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Time signature (e.g., 4/4, 3/4, 6/8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    /// Numerator (beats per bar)
    pub numerator: u8,
    /// Denominator (note value that gets one beat)
    pub denominator: u8,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

impl TimeSignature {
    /// Common time (4/4)
    pub const COMMON: Self = Self {
        numerator: 4,
        denominator: 4,
    };

    pub fn new(numerator: u8, denominator: u8) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Quarter-note beats per bar
    pub fn beats_per_bar(&self) -> f64 {
        self.numerator as f64 * 4.0 / self.denominator.max(1) as f64
    }
}
