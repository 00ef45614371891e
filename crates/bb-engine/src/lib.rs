//! bb-engine: The Backbeat playback core
//!
//! Sample-accurate scheduling for a DAW transport:
//! - MIDI event scheduler with an active-note registry and atomic stop
//! - Per-track audio region scheduler with cycle-aware pre-scheduling
//! - Automation value provider with curve interpolation and smoothing
//! - Plugin delay compensation keeping tracks phase-aligned
//! - Transport orchestration driving all of it from immutable timing
//!   references published on every discontinuity
//!
//! Two execution domains share this engine: a hard-real-time render
//! callback that never allocates, blocks, or logs, and a control domain
//! that owns project state and scheduling decisions. State crosses the
//! boundary only as published immutable snapshots or through the `bb-rt`
//! primitives.

pub mod automation;
pub mod context;
pub mod diag;
pub mod midi_sched;
pub mod pdc;
pub mod region_sched;
pub mod smoother;
pub mod transport;

pub use automation::{
    AutomationLane, AutomationProvider, AutomationSnapshot, CurveKind, CurvePoint, ParamId,
    CONTROL_RATE_HZ,
};
pub use context::EngineContext;
pub use diag::{Diagnostics, DiagnosticsSnapshot};
pub use midi_sched::{
    BeatEvent, MidiScheduler, MidiSink, ScheduledEvent, DEFAULT_LOOKAHEAD_SAMPLES,
};
pub use pdc::{CompensationTable, PdcCalculator, MAX_COMPENSATION_SAMPLES};
pub use region_sched::{
    AudioRegion, CycleRange, RegionPlayer, SchedulerState, Segment, TrackScheduler,
    DEFAULT_ITERATIONS_AHEAD,
};
pub use smoother::{Smoother, DEFAULT_SMOOTH_TAU_MS};
pub use transport::{Transport, CONTROL_TICK_PERIOD};
