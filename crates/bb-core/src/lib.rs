//! bb-core: Shared types for the Backbeat playback core
//!
//! Foundational types used across all Backbeat crates: sample/beat time,
//! tempo and time signature, the immutable timing reference snapshot,
//! MIDI constants, and the error taxonomy.

pub mod error;
pub mod midi;
pub mod tempo;
pub mod time;
pub mod timing;

pub use error::*;
pub use midi::*;
pub use tempo::*;
pub use time::*;
pub use timing::*;

/// Standard sample rate options
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum SampleRate {
    Hz44100 = 44100,
    Hz48000 = 48000,
    Hz88200 = 88200,
    Hz96000 = 96000,
    Hz176400 = 176400,
    Hz192000 = 192000,
}

impl SampleRate {
    #[inline]
    pub fn as_f64(self) -> f64 {
        self as u32 as f64
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl Default for SampleRate {
    fn default() -> Self {
        Self::Hz48000
    }
}

/// Render buffer size options
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum BufferSize {
    Samples64 = 64,
    Samples128 = 128,
    Samples256 = 256,
    Samples512 = 512,
    Samples1024 = 1024,
    Samples2048 = 2048,
}

impl BufferSize {
    #[inline]
    pub fn as_usize(self) -> usize {
        self as u32 as usize
    }
}

impl Default for BufferSize {
    fn default() -> Self {
        Self::Samples1024
    }
}
