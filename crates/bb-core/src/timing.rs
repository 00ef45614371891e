//! Timing reference: immutable beats ↔ samples conversion snapshot
//!
//! A `TimingReference` pins one musical position to one sample position at
//! one tempo. It is created on every discontinuous transport event (play,
//! seek, tempo change, cycle jump) and replaced wholesale, never mutated.
//! Schedulers convert beat-relative events through the reference they were
//! given; once a reference is older than its staleness threshold, the
//! conversion origin can no longer be trusted and schedulers fall back to
//! immediate dispatch instead of predictive placement.

use std::time::{Duration, Instant};

use crate::tempo::Tempo;
use crate::time::{Beat, SampleTime};

/// Conversion snapshot between musical and sample time
///
/// Immutable by design: transport publishes a fresh reference on every
/// discontinuity and schedulers rebuild their event indices against it.
#[derive(Debug, Clone)]
pub struct TimingReference {
    /// Sample position that `origin_beat` maps to
    pub origin_sample_time: SampleTime,
    /// Musical position at the origin
    pub origin_beat: Beat,
    /// Tempo at capture time
    pub tempo: Tempo,
    /// Sample rate at capture time
    pub sample_rate: f64,
    /// Monotonic capture timestamp, for staleness checks
    captured_at: Instant,
}

impl TimingReference {
    /// Default staleness threshold
    ///
    /// The control tick runs every ~8ms; a reference that has not been
    /// refreshed for 250ms belongs to a transport state some thirty ticks
    /// old, and predicting sample positions from it is worse than
    /// dispatching immediately.
    pub const DEFAULT_MAX_AGE: Duration = Duration::from_millis(250);

    pub fn new(
        origin_sample_time: SampleTime,
        origin_beat: Beat,
        tempo: Tempo,
        sample_rate: f64,
    ) -> Self {
        Self {
            origin_sample_time,
            origin_beat,
            tempo,
            sample_rate,
            captured_at: Instant::now(),
        }
    }

    /// Samples per beat at this reference's tempo
    #[inline]
    pub fn samples_per_beat(&self) -> f64 {
        self.tempo.beat_duration_samples(self.sample_rate)
    }

    /// Seconds spanned by a beat delta at this reference's tempo
    #[inline]
    pub fn seconds_from_beat_delta(&self, delta_beats: f64) -> f64 {
        delta_beats * self.tempo.beat_duration_secs()
    }

    /// Absolute sample time of a beat position
    #[inline]
    pub fn beat_to_sample_time(&self, beat: Beat) -> SampleTime {
        let delta = (beat - self.origin_beat) * self.samples_per_beat();
        self.origin_sample_time + delta.round() as SampleTime
    }

    /// Beat position of an absolute sample time
    #[inline]
    pub fn sample_time_to_beat(&self, sample_time: SampleTime) -> Beat {
        let delta = (sample_time - self.origin_sample_time) as f64;
        self.origin_beat + delta / self.samples_per_beat()
    }

    /// Age of this reference
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// Is this reference too old to convert from?
    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.age() > max_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_at(origin_samples: SampleTime, origin_beat: Beat, bpm: f64) -> TimingReference {
        TimingReference::new(origin_samples, origin_beat, Tempo::new(bpm), 48000.0)
    }

    #[test]
    fn test_beat_to_sample_round_trip() {
        let r = reference_at(96000, 4.0, 120.0);

        // 120 BPM @ 48kHz: 24000 samples per beat
        assert_eq!(r.beat_to_sample_time(4.0), 96000);
        assert_eq!(r.beat_to_sample_time(5.0), 120000);
        assert_eq!(r.beat_to_sample_time(3.0), 72000);

        assert!((r.sample_time_to_beat(120000) - 5.0).abs() < 1e-9);
        assert!((r.sample_time_to_beat(60000) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_seconds_from_beat_delta() {
        let r = reference_at(0, 0.0, 120.0);
        assert!((r.seconds_from_beat_delta(2.0) - 1.0).abs() < 1e-12);
        assert!((r.seconds_from_beat_delta(-1.0) + 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_fresh_reference_not_stale() {
        let r = reference_at(0, 0.0, 120.0);
        assert!(!r.is_stale(TimingReference::DEFAULT_MAX_AGE));

        std::thread::sleep(Duration::from_millis(2));
        assert!(r.is_stale(Duration::from_millis(1)));
    }
}
