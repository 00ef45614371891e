//! Non-blocking pending flags
//!
//! One atomic word holds up to 64 "work pending" bits, one per hashed
//! track. The render side marks a bit with a single fetch_or (wait-free,
//! no allocation, no lock); a background thread drains the set and does
//! the slow retry/diagnostic work the render path is not allowed to do.
//!
//! Track ids hash to `id % 64`, so two tracks may share a bit. A shared
//! bit only merges their retry work, which is idempotent.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-track pending-work bitset
#[derive(Debug, Default)]
pub struct PendingFlags {
    bits: AtomicU64,
}

impl PendingFlags {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn bit_for(track_id: u32) -> u64 {
        1u64 << (track_id % 64)
    }

    /// Render-side: mark work pending for a track. Wait-free.
    #[inline]
    pub fn mark(&self, track_id: u32) {
        self.bits.fetch_or(Self::bit_for(track_id), Ordering::Release);
    }

    /// Is any work pending?
    #[inline]
    pub fn any(&self) -> bool {
        self.bits.load(Ordering::Acquire) != 0
    }

    /// Is the bit for this track set?
    #[inline]
    pub fn is_marked(&self, track_id: u32) -> bool {
        self.bits.load(Ordering::Acquire) & Self::bit_for(track_id) != 0
    }

    /// Control-side: atomically take and clear all set bits
    pub fn drain(&self) -> u64 {
        self.bits.swap(0, Ordering::AcqRel)
    }

    /// Iterate the bit indices set in a drained word
    pub fn iter_bits(word: u64) -> impl Iterator<Item = u32> {
        (0..64u32).filter(move |i| word & (1u64 << i) != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_drain() {
        let flags = PendingFlags::new();
        assert!(!flags.any());

        flags.mark(3);
        flags.mark(65); // hashes to bit 1
        assert!(flags.any());
        assert!(flags.is_marked(3));
        assert!(flags.is_marked(65));

        let word = flags.drain();
        assert_eq!(word, (1 << 3) | (1 << 1));
        assert!(!flags.any());

        let bits: Vec<u32> = PendingFlags::iter_bits(word).collect();
        assert_eq!(bits, vec![1, 3]);
    }

    #[test]
    fn test_drain_idempotent() {
        let flags = PendingFlags::new();
        flags.mark(0);
        assert_ne!(flags.drain(), 0);
        assert_eq!(flags.drain(), 0);
    }

    #[test]
    fn test_collision_merges() {
        let flags = PendingFlags::new();
        flags.mark(2);
        flags.mark(66); // same bit as 2
        assert_eq!(flags.drain().count_ones(), 1);
    }
}
