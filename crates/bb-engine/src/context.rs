//! Engine context: explicit shared state
//!
//! One `EngineContext` is created per engine instance and handed to every
//! scheduler. There are no process-wide singletons; everything the
//! schedulers share goes through this object.
//!
//! Published state (timing reference, compensation table) is immutable and
//! swapped wholesale behind a lock. The control side blocks briefly on
//! publish/read; render-invoked readers use the `try_*` variants and skip
//! on contention.

use std::sync::Arc;

use parking_lot::RwLock;

use bb_core::TimingReference;

use crate::diag::Diagnostics;
use crate::pdc::CompensationTable;

/// Shared engine state, passed explicitly to every scheduler
pub struct EngineContext {
    sample_rate: f64,
    /// Current timing reference; None between stop and the next (re)start
    timing: RwLock<Option<Arc<TimingReference>>>,
    /// Current compensation table; always present (empty table at startup)
    compensation: RwLock<Arc<CompensationTable>>,
    /// Shared diagnostic counters
    pub diagnostics: Arc<Diagnostics>,
}

impl EngineContext {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            timing: RwLock::new(None),
            compensation: RwLock::new(Arc::new(CompensationTable::default())),
            diagnostics: Arc::new(Diagnostics::new()),
        }
    }

    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    // ─────────────────────────────────────────────────────────────────────
    // Timing reference
    // ─────────────────────────────────────────────────────────────────────

    /// Control-side: publish a fresh timing reference
    pub fn publish_timing(&self, reference: Arc<TimingReference>) {
        *self.timing.write() = Some(reference);
    }

    /// Control-side: invalidate the reference (stop path)
    pub fn invalidate_timing(&self) {
        *self.timing.write() = None;
    }

    /// Control-side: current reference, if any
    pub fn timing(&self) -> Option<Arc<TimingReference>> {
        self.timing.read().clone()
    }

    /// Render-side: current reference without blocking.
    /// Returns None both when no reference is published and on contention;
    /// callers treat both as "dispatch immediately".
    pub fn try_timing(&self) -> Option<Arc<TimingReference>> {
        match self.timing.try_read() {
            Some(guard) => guard.clone(),
            None => {
                self.diagnostics.note_trylock_miss();
                None
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Compensation table
    // ─────────────────────────────────────────────────────────────────────

    /// Control-side: publish a recomputed compensation table
    pub fn publish_compensation(&self, table: Arc<CompensationTable>) {
        *self.compensation.write() = table;
    }

    /// One consistent table for a whole scheduling pass
    pub fn compensation(&self) -> Arc<CompensationTable> {
        self.compensation.read().clone()
    }
}
