//! Engine diagnostics
//!
//! Render-side code feeds these counters through the RT-safe primitives;
//! an external meter/health display reads them from the control domain.

use bb_rt::{RtCounter, RtMaxTracker};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared diagnostic counters
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// Output samples that exceeded full scale
    pub clip_count: RtCounter,
    /// Events dropped: no dispatch target attached, or scheduled past the
    /// immediate-dispatch window of a stale timing reference
    pub dropped_events: RtCounter,
    /// Peak render-callback load, in permille of the buffer period
    pub render_load_permille: RtMaxTracker,
    /// Render-side trylock misses (wait-free counter: a miss counter that
    /// could itself miss would under-report exactly when it matters)
    trylock_misses: AtomicU64,
}

/// Point-in-time diagnostic readout
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DiagnosticsSnapshot {
    pub clip_count: u64,
    pub dropped_events: u64,
    pub render_load_permille: u64,
    pub trylock_misses: u64,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render-side: record a trylock miss
    #[inline]
    pub fn note_trylock_miss(&self) {
        self.trylock_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Control-side: read and clear all counters
    pub fn snapshot_and_reset(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            clip_count: self.clip_count.read_and_reset(),
            dropped_events: self.dropped_events.read_and_reset(),
            render_load_permille: self.render_load_permille.read_and_reset(),
            trylock_misses: self.trylock_misses.swap(0, Ordering::AcqRel),
        }
    }

    /// Control-side: read without clearing
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            clip_count: self.clip_count.read(),
            dropped_events: self.dropped_events.read(),
            render_load_permille: self.render_load_permille.read(),
            trylock_misses: self.trylock_misses.load(Ordering::Acquire),
        }
    }
}
