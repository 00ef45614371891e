//! Parameter smoothing for zipper-free automation
//!
//! Raw interpolated automation values pass through a one-pole low-pass
//! filter before reaching the audio path:
//!
//! ```text
//!   y[n] = a * y[n-1] + (1 - a) * x[n],   a = exp(-1 / (tau * fs))
//! ```
//!
//! Discontinuous parameter steps are audible as clicks ("zipper" noise);
//! a ~5ms time constant removes them without softening intentional moves.
//!
//! Reset contract: on every playback (re)start the smoother is re-seeded
//! from the automation value at the new playhead beat, never left at
//! whatever value was cached from the previous session. A stale seed makes
//! the first ~50ms of playback audibly ramp from the wrong level.

/// Default smoothing time constant in milliseconds
pub const DEFAULT_SMOOTH_TAU_MS: f64 = 5.0;

/// Steps smaller than this are treated as converged
const SMOOTH_THRESHOLD: f64 = 1e-6;

/// One-pole low-pass parameter smoother
#[derive(Debug, Clone)]
pub struct Smoother {
    /// Current smoothed value
    current: f64,
    /// Filter coefficient `a` (pre-calculated)
    coeff: f64,
    /// Update rate the coefficient was calculated for
    update_rate: f64,
    /// Time constant in milliseconds
    tau_ms: f64,
}

impl Smoother {
    /// Create a smoother updated at `update_rate` Hz, seeded at `initial`
    pub fn new(update_rate: f64, initial: f64) -> Self {
        Self::with_tau(update_rate, initial, DEFAULT_SMOOTH_TAU_MS)
    }

    /// Create with a custom time constant
    pub fn with_tau(update_rate: f64, initial: f64, tau_ms: f64) -> Self {
        Self {
            current: initial,
            coeff: Self::calculate_coeff(update_rate, tau_ms),
            update_rate,
            tau_ms,
        }
    }

    #[inline]
    fn calculate_coeff(update_rate: f64, tau_ms: f64) -> f64 {
        let tau_updates = (tau_ms / 1000.0) * update_rate;
        if tau_updates <= 0.0 {
            return 0.0; // degenerate rate: pass input through
        }
        (-1.0 / tau_updates).exp()
    }

    /// Advance one update toward `target`, returning the smoothed value
    #[inline]
    pub fn process(&mut self, target: f64) -> f64 {
        self.current = self.coeff * self.current + (1.0 - self.coeff) * target;
        if (self.current - target).abs() < SMOOTH_THRESHOLD {
            self.current = target;
        }
        self.current
    }

    /// Re-seed the filter state (playback restart path)
    #[inline]
    pub fn reset(&mut self, value: f64) {
        self.current = value;
    }

    /// Current smoothed value without advancing
    #[inline]
    pub fn current(&self) -> f64 {
        self.current
    }

    /// Update the rate (recalculates the coefficient, keeps state)
    pub fn set_update_rate(&mut self, update_rate: f64) {
        self.update_rate = update_rate;
        self.coeff = Self::calculate_coeff(update_rate, self.tau_ms);
    }
}
