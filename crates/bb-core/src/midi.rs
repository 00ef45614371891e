//! MIDI types for the event scheduler
//!
//! Trimmed to what the playback core dispatches: note on/off and control
//! change, as raw status/data bytes at sample-accurate times.

use serde::{Deserialize, Serialize};

/// MIDI 1.0 status bytes
pub mod status {
    pub const NOTE_OFF: u8 = 0x80;
    pub const NOTE_ON: u8 = 0x90;
    pub const CONTROL_CHANGE: u8 = 0xB0;
}

/// MIDI channel (0-15)
pub type MidiChannel = u8;

/// MIDI note number (0-127)
pub type NoteNumber = u8;

/// MIDI velocity (0-127)
pub type Velocity = u8;

/// Kind of event the scheduler dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MidiEventKind {
    NoteOn,
    NoteOff,
    ControlChange,
}

impl MidiEventKind {
    /// Status byte for this kind on a channel
    #[inline]
    pub fn status_byte(self, channel: MidiChannel) -> u8 {
        let base = match self {
            Self::NoteOn => status::NOTE_ON,
            Self::NoteOff => status::NOTE_OFF,
            Self::ControlChange => status::CONTROL_CHANGE,
        };
        base | (channel & 0x0F)
    }

    /// Dispatch rank at equal sample times: NoteOff sorts before NoteOn so
    /// a release and a retrigger of the same pitch never overlap.
    #[inline]
    pub fn tie_rank(self) -> u8 {
        match self {
            Self::NoteOff => 0,
            Self::ControlChange => 1,
            Self::NoteOn => 2,
        }
    }
}
