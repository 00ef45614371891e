//! Plugin Delay Compensation (PDC) calculator
//!
//! Tracks whose plugin chains process with low latency must be delayed to
//! stay phase-aligned with tracks whose chains are slower:
//!
//! ```text
//!   compensation[track] = max_latency_across_tracks - track_latency
//! ```
//!
//! The result is non-negative and capped at `MAX_COMPENSATION_SAMPLES`.
//! Recomputed whenever any track's chain latency changes (plugin insert,
//! remove, bypass, format change) and published atomically through the
//! engine context so one scheduling pass always reads one consistent table.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use bb_core::TrackId;

use crate::context::EngineContext;

/// Latency in samples
pub type LatencySamples = u32;

/// Compensation ceiling, bounding worst-case export tail growth
pub const MAX_COMPENSATION_SAMPLES: LatencySamples = 65_536;

// ═══════════════════════════════════════════════════════════════════════════
// COMPENSATION TABLE
// ═══════════════════════════════════════════════════════════════════════════

/// Immutable per-track compensation snapshot
///
/// Swapped wholesale on recalculation; never mutated in place.
#[derive(Debug, Clone, Default)]
pub struct CompensationTable {
    compensation: HashMap<TrackId, LatencySamples>,
    max_latency: LatencySamples,
}

impl CompensationTable {
    /// Compensation delay for a track; unknown tracks need none
    #[inline]
    pub fn compensation(&self, track_id: TrackId) -> LatencySamples {
        self.compensation.get(&track_id).copied().unwrap_or(0)
    }

    /// Highest effective chain latency across all tracks
    #[inline]
    pub fn max_latency(&self) -> LatencySamples {
        self.max_latency
    }

    pub fn len(&self) -> usize {
        self.compensation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compensation.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CALCULATOR
// ═══════════════════════════════════════════════════════════════════════════

/// Per-track latency report from the plugin host
#[derive(Debug, Clone, Copy, Default)]
struct TrackLatency {
    /// Declared plugin-chain latency in samples
    chain: LatencySamples,
    /// Manual per-track delay adjustment (positive = extra delay)
    manual: i32,
}

impl TrackLatency {
    fn effective(&self) -> LatencySamples {
        let manual = self.manual.max(0) as LatencySamples;
        self.chain
            .saturating_add(manual)
            .min(MAX_COMPENSATION_SAMPLES)
    }
}

/// Plugin delay compensation calculator
///
/// The plugin host reports chain latencies from the control domain; the
/// transport asks for recalculation before each scheduling pass that may
/// have seen a topology change.
pub struct PdcCalculator {
    latencies: Mutex<HashMap<TrackId, TrackLatency>>,
    needs_recalc: AtomicBool,
}

impl PdcCalculator {
    pub fn new() -> Self {
        Self {
            latencies: Mutex::new(HashMap::new()),
            needs_recalc: AtomicBool::new(false),
        }
    }

    /// Report a track's declared plugin-chain latency.
    /// Called on plugin insert/remove/bypass/format change.
    pub fn report_chain_latency(&self, track_id: TrackId, latency: LatencySamples) {
        let mut latencies = self.latencies.lock();
        let entry = latencies.entry(track_id).or_default();
        if entry.chain != latency {
            entry.chain = latency;
            self.needs_recalc.store(true, Ordering::Release);
        }
    }

    /// Set a manual per-track delay adjustment
    pub fn set_manual_delay(&self, track_id: TrackId, delay_samples: i32) {
        let mut latencies = self.latencies.lock();
        let entry = latencies.entry(track_id).or_default();
        if entry.manual != delay_samples {
            entry.manual = delay_samples;
            self.needs_recalc.store(true, Ordering::Release);
        }
    }

    /// Forget a removed track
    pub fn remove_track(&self, track_id: TrackId) {
        if self.latencies.lock().remove(&track_id).is_some() {
            self.needs_recalc.store(true, Ordering::Release);
        }
    }

    /// Has anything changed since the last recalculation?
    pub fn is_dirty(&self) -> bool {
        self.needs_recalc.load(Ordering::Acquire)
    }

    /// Recompute the table and publish it through the context.
    ///
    /// Publishing is one atomic swap: schedulers that read the table before
    /// the swap keep their consistent old view for the rest of their pass.
    pub fn recalculate(&self, ctx: &EngineContext) -> Arc<CompensationTable> {
        self.needs_recalc.store(false, Ordering::Release);

        let latencies = self.latencies.lock();
        let max_latency = latencies
            .values()
            .map(|l| l.effective())
            .max()
            .unwrap_or(0);

        let compensation = latencies
            .iter()
            .map(|(&track_id, latency)| {
                let comp = max_latency
                    .saturating_sub(latency.effective())
                    .min(MAX_COMPENSATION_SAMPLES);
                (track_id, comp)
            })
            .collect();

        let table = Arc::new(CompensationTable {
            compensation,
            max_latency,
        });

        log::debug!(
            "PDC: recalculated, {} tracks, max_latency={} samples",
            table.len(),
            max_latency
        );

        ctx.publish_compensation(Arc::clone(&table));
        table
    }
}

impl Default for PdcCalculator {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
