//! bb-rt: RT-safe cross-thread primitives
//!
//! State crosses between the control domain and the hard-real-time render
//! domain only through the types in this crate:
//! - Trylock counters/cells: render side never blocks, a contended update
//!   is silently dropped (a lost diagnostic sample is acceptable, a stalled
//!   render callback is not)
//! - Pending flags: wait-free per-track bit marking for deferred work
//! - Cancellation registry: deterministic, idempotent teardown of the
//!   background tickers that drive control-rate work

mod cancel;
mod flags;
mod trylock;

pub use cancel::*;
pub use flags::*;
pub use trylock::*;
