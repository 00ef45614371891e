//! Error types for Backbeat

use thiserror::Error;

/// Core error type
///
/// Only control-domain operations return these. Render-invoked paths are
/// infallible by contract: anomalies degrade to silence, a held value, or
/// a skipped update, and are reported through the diagnostic counters.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Scheduling error: {0}")]
    Scheduling(String),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("Invalid tempo: {0} BPM")]
    InvalidTempo(f64),

    #[error("Invalid beat range: {start}..{end}")]
    InvalidBeatRange { start: f64, end: f64 },

    #[error("Unknown track: {0}")]
    UnknownTrack(u32),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Shutdown error: {0}")]
    Shutdown(String),
}

/// Result type alias
pub type EngineResult<T> = Result<T, EngineError>;
