//! Trylock wrappers for render ↔ control state sharing
//!
//! Each wrapper has two faces:
//! - Render side: `try_*` methods that fail immediately on contention and
//!   drop the update. Bounded execution, no blocking.
//! - Control side: blocking methods that may wait for the (very short)
//!   render-side hold.
//!
//! The trylock approach stands in for true lock-free structures; the
//! bounded-skip semantics make that substitution safe.

use parking_lot::Mutex;

// ═══════════════════════════════════════════════════════════════════════════
// COUNTER
// ═══════════════════════════════════════════════════════════════════════════

/// Diagnostic counter incremented from the render thread
///
/// Render side increments via trylock and silently skips on contention.
/// Control side reads-and-clears atomically.
#[derive(Debug, Default)]
pub struct RtCounter {
    inner: Mutex<u64>,
}

impl RtCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render-side: add 1. Returns false if the update was dropped.
    #[inline]
    pub fn try_increment(&self) -> bool {
        self.try_add(1)
    }

    /// Render-side: add `n`. Returns false if the update was dropped.
    #[inline]
    pub fn try_add(&self, n: u64) -> bool {
        match self.inner.try_lock() {
            Some(mut guard) => {
                *guard = guard.saturating_add(n);
                true
            }
            None => false,
        }
    }

    /// Control-side: atomically return the count and reset it to zero
    pub fn read_and_reset(&self) -> u64 {
        let mut guard = self.inner.lock();
        std::mem::take(&mut *guard)
    }

    /// Control-side: read without clearing
    pub fn read(&self) -> u64 {
        *self.inner.lock()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// MAX TRACKER
// ═══════════════════════════════════════════════════════════════════════════

/// Running-maximum tracker updated from the render thread
///
/// Used for peak render-load / peak-level style diagnostics where a missed
/// sample only softens the observed maximum.
#[derive(Debug, Default)]
pub struct RtMaxTracker {
    inner: Mutex<u64>,
}

impl RtMaxTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render-side: raise the maximum to at least `value`.
    /// Returns false if the update was dropped on contention.
    #[inline]
    pub fn try_update_max(&self, value: u64) -> bool {
        match self.inner.try_lock() {
            Some(mut guard) => {
                if value > *guard {
                    *guard = value;
                }
                true
            }
            None => false,
        }
    }

    /// Control-side: atomically return the maximum and reset it to zero
    pub fn read_and_reset(&self) -> u64 {
        let mut guard = self.inner.lock();
        std::mem::take(&mut *guard)
    }

    /// Control-side: read without clearing
    pub fn read(&self) -> u64 {
        *self.inner.lock()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// VALUE CELL
// ═══════════════════════════════════════════════════════════════════════════

/// Single `Copy` value behind a trylock
///
/// Render side publishes or reads without blocking; control side blocks
/// briefly. A failed render-side read returns the caller's fallback.
#[derive(Debug, Default)]
pub struct RtCell<T: Copy> {
    inner: Mutex<T>,
}

impl<T: Copy> RtCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Render-side: store `value`. Returns false if dropped on contention.
    #[inline]
    pub fn try_store(&self, value: T) -> bool {
        match self.inner.try_lock() {
            Some(mut guard) => {
                *guard = value;
                true
            }
            None => false,
        }
    }

    /// Render-side: read the value, or None on contention
    #[inline]
    pub fn try_load(&self) -> Option<T> {
        self.inner.try_lock().map(|guard| *guard)
    }

    /// Control-side: store (blocking)
    pub fn store(&self, value: T) {
        *self.inner.lock() = value;
    }

    /// Control-side: read (blocking)
    pub fn load(&self) -> T {
        *self.inner.lock()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counter_increment_and_reset() {
        let c = RtCounter::new();
        assert!(c.try_increment());
        assert!(c.try_add(4));
        assert_eq!(c.read(), 5);
        assert_eq!(c.read_and_reset(), 5);
        assert_eq!(c.read(), 0);
    }

    #[test]
    fn test_counter_drops_on_contention() {
        let c = RtCounter::new();
        let guard = c.inner.lock();
        // Simulated contention: the render-side update must not block
        assert!(!c.try_increment());
        drop(guard);
        assert_eq!(c.read(), 0);
        assert!(c.try_increment());
        assert_eq!(c.read(), 1);
    }

    #[test]
    fn test_max_tracker() {
        let m = RtMaxTracker::new();
        assert!(m.try_update_max(10));
        assert!(m.try_update_max(3));
        assert_eq!(m.read(), 10);
        assert_eq!(m.read_and_reset(), 10);
        assert_eq!(m.read(), 0);
    }

    #[test]
    fn test_cell_store_load() {
        let cell = RtCell::new(0.0f64);
        assert!(cell.try_store(1.5));
        assert_eq!(cell.try_load(), Some(1.5));
        cell.store(2.5);
        assert_eq!(cell.load(), 2.5);
    }

    #[test]
    fn test_counter_cross_thread() {
        let c = Arc::new(RtCounter::new());
        let writer = {
            let c = Arc::clone(&c);
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    let _ = c.try_increment();
                }
            })
        };
        writer.join().unwrap();
        // All increments land once the writer is done (no contention left)
        assert!(c.read() <= 1000);
        assert!(c.read() > 0);
    }
}
