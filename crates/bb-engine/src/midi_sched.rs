//! MIDI event scheduler
//!
//! Sample-accurate note dispatch:
//! - `schedule` converts beat-relative events to absolute sample times
//!   against a timing reference and builds a sorted index
//! - `tick` advances a monotonic cursor and dispatches every event that
//!   falls inside the lookahead window, reusing one pre-allocated buffer
//! - `stop` atomically invalidates the reference, snapshots and clears the
//!   active-note registry and cancels the cursor, then force-releases the
//!   snapshot outside the critical section
//!
//! Nothing on the render-invoked path throws, blocks indefinitely, or
//! allocates per call; anomalies (stale reference, malformed event order,
//! missing sink) degrade defensively and are reported through the
//! non-blocking diagnostics.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use bb_core::{midi::status, Beat, MidiEventKind, SampleTime, TimingReference, TrackId};
use bb_rt::PendingFlags;

use crate::context::EngineContext;

/// Default dispatch lookahead: one render buffer.
///
/// An event landing exactly on a buffer boundary belongs to the window
/// that starts at that sample (`[cursor, cursor + lookahead)`), so it is
/// dispatched in the buffer containing it, never split across two.
pub const DEFAULT_LOOKAHEAD_SAMPLES: SampleTime = 1024;

// ═══════════════════════════════════════════════════════════════════════════
// EVENTS
// ═══════════════════════════════════════════════════════════════════════════

/// Beat-relative input event from the project's note lists
#[derive(Debug, Clone, Copy)]
pub struct BeatEvent {
    pub beat: Beat,
    pub kind: MidiEventKind,
    /// Note number, or controller number for `ControlChange`
    pub pitch: u8,
    /// Velocity, or controller value for `ControlChange`
    pub velocity: u8,
    pub track_id: TrackId,
}

impl BeatEvent {
    pub fn note_on(beat: Beat, pitch: u8, velocity: u8, track_id: TrackId) -> Self {
        Self {
            beat,
            kind: MidiEventKind::NoteOn,
            pitch,
            velocity,
            track_id,
        }
    }

    pub fn note_off(beat: Beat, pitch: u8, track_id: TrackId) -> Self {
        Self {
            beat,
            kind: MidiEventKind::NoteOff,
            pitch,
            velocity: 0,
            track_id,
        }
    }

    pub fn control_change(beat: Beat, controller: u8, value: u8, track_id: TrackId) -> Self {
        Self {
            beat,
            kind: MidiEventKind::ControlChange,
            pitch: controller,
            velocity: value,
            track_id,
        }
    }
}

/// Event with resolved absolute sample time
#[derive(Debug, Clone, Copy)]
pub struct ScheduledEvent {
    pub sample_time: SampleTime,
    pub kind: MidiEventKind,
    pub pitch: u8,
    pub velocity: u8,
    pub track_id: TrackId,
    /// Insertion order, the tie-breaker after sample time and kind rank
    seq: u32,
}

/// Render-domain dispatch target
///
/// Implementations must be allocation-free and non-blocking; they are
/// invoked with pre-resolved raw bytes.
pub trait MidiSink: Send + Sync {
    fn send_midi(&self, sample_time: SampleTime, status: u8, data1: u8, data2: u8);
}

// ═══════════════════════════════════════════════════════════════════════════
// SCHEDULER
// ═══════════════════════════════════════════════════════════════════════════

/// State guarded by the scheduler's single critical section.
///
/// `stop()` mutates all of it atomically: a concurrently-running `tick`
/// either completes its registry updates before the stop snapshot or
/// observes the cancelled cursor, so no event is both naturally dispatched
/// and force-dispatched.
struct SchedulerInner {
    playing: bool,
    /// Reference the current index was built against; None when stopped
    timing: Option<Arc<TimingReference>>,
    /// Sorted pending events
    events: Vec<ScheduledEvent>,
    /// Index of the next undispatched event; monotonic per schedule pass
    cursor: usize,
    /// Sample time of the most recent tick, used for forced releases
    last_tick_time: SampleTime,
    /// Currently-sounding notes: pitch -> track
    active: HashMap<u8, TrackId>,
}

/// Sample-accurate MIDI event scheduler
pub struct MidiScheduler {
    ctx: Arc<EngineContext>,
    inner: Mutex<SchedulerInner>,
    sink: RwLock<Option<Arc<dyn MidiSink>>>,
    /// Tracks whose events were dropped because no sink was attached;
    /// drained by a background thread, never logged synchronously
    missing_sink: Arc<PendingFlags>,
    lookahead: SampleTime,
    /// Reused dispatch buffer; grows once to steady-state size, then no
    /// per-tick allocation
    scratch: Mutex<SmallVec<[ScheduledEvent; 64]>>,
}

impl MidiScheduler {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self::with_lookahead(ctx, DEFAULT_LOOKAHEAD_SAMPLES)
    }

    pub fn with_lookahead(ctx: Arc<EngineContext>, lookahead: SampleTime) -> Self {
        Self {
            ctx,
            inner: Mutex::new(SchedulerInner {
                playing: false,
                timing: None,
                events: Vec::new(),
                cursor: 0,
                last_tick_time: 0,
                active: HashMap::new(),
            }),
            sink: RwLock::new(None),
            missing_sink: Arc::new(PendingFlags::new()),
            lookahead: lookahead.max(1),
            scratch: Mutex::new(SmallVec::new()),
        }
    }

    /// Attach the dispatch target
    pub fn set_sink(&self, sink: Arc<dyn MidiSink>) {
        *self.sink.write() = Some(sink);
    }

    pub fn clear_sink(&self) {
        *self.sink.write() = None;
    }

    /// Flags for tracks whose dispatch target was missing
    pub fn missing_sink_flags(&self) -> &Arc<PendingFlags> {
        &self.missing_sink
    }

    // ─────────────────────────────────────────────────────────────────────
    // Scheduling (control domain)
    // ─────────────────────────────────────────────────────────────────────

    /// Convert beat events to absolute sample times against `reference`
    /// and build the sorted index. O(n log n). Called on (re)start, seek
    /// and tempo change.
    ///
    /// One compensation table is read for the whole pass. A stale
    /// reference disables predictive placement: events near the reference
    /// origin convert to the origin sample (and `tick` clamps them to
    /// "now", which is immediate dispatch); events beyond the lookahead
    /// window are dropped and counted, not burst out at once.
    pub fn schedule(&self, events: &[BeatEvent], reference: &Arc<TimingReference>) -> usize {
        let table = self.ctx.compensation();
        let stale = reference.is_stale(TimingReference::DEFAULT_MAX_AGE);
        if stale {
            log::debug!(
                "MIDI schedule: reference is {}ms old, falling back to immediate dispatch",
                reference.age().as_millis()
            );
        }

        let samples_per_beat = reference.samples_per_beat();
        let mut dropped: u64 = 0;
        let mut scheduled: Vec<ScheduledEvent> = Vec::with_capacity(events.len());
        for (i, ev) in events.iter().enumerate() {
            let base = if stale {
                let ahead = (ev.beat - reference.origin_beat) * samples_per_beat;
                if ahead >= self.lookahead as f64 {
                    dropped += 1;
                    continue;
                }
                reference.origin_sample_time
            } else {
                reference.beat_to_sample_time(ev.beat)
            };
            scheduled.push(ScheduledEvent {
                sample_time: base + table.compensation(ev.track_id) as SampleTime,
                kind: ev.kind,
                pitch: ev.pitch,
                velocity: ev.velocity,
                track_id: ev.track_id,
                seq: i as u32,
            });
        }
        if dropped > 0 {
            let _ = self.ctx.diagnostics.dropped_events.try_add(dropped);
            log::debug!(
                "MIDI schedule: dropped {} events beyond the stale-dispatch window",
                dropped
            );
        }

        // Defensive re-sort: ascending sample time, NoteOff before NoteOn
        // at equal times, then insertion order. Malformed input normalizes
        // instead of producing overlap artifacts.
        scheduled.sort_by_key(|ev| (ev.sample_time, ev.kind.tie_rank(), ev.seq));

        let count = scheduled.len();
        let mut inner = self.inner.lock();
        inner.events = scheduled;
        inner.cursor = 0;
        inner.playing = true;
        inner.timing = Some(Arc::clone(reference));
        count
    }

    /// Seek: terminate everything sounding, then rebuild against the new
    /// reference. No previously active note is left unterminated.
    pub fn seek(&self, events: &[BeatEvent], reference: &Arc<TimingReference>) -> usize {
        self.stop();
        self.schedule(events, reference)
    }

    /// Tempo change: identical shape to a seek
    pub fn tempo_changed(&self, events: &[BeatEvent], reference: &Arc<TimingReference>) -> usize {
        self.stop();
        self.schedule(events, reference)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Dispatch (driven by the control tick)
    // ─────────────────────────────────────────────────────────────────────

    /// Dispatch every pending event with sample time in
    /// `[now, now + lookahead)`. Overdue events (scheduled in the past,
    /// e.g. after a stale-reference fallback) are clamped to `now`.
    /// Returns the dispatch count.
    pub fn tick(&self, now: SampleTime) -> usize {
        let mut scratch = self.scratch.lock();
        scratch.clear();

        let mut inner = self.inner.lock();
        if !inner.playing {
            return 0;
        }
        inner.last_tick_time = now;
        let window_end = now.saturating_add(self.lookahead);

        while inner.cursor < inner.events.len() {
            let ev = inner.events[inner.cursor];
            if ev.sample_time >= window_end {
                break;
            }

            match ev.kind {
                MidiEventKind::NoteOn => {
                    // Malformed source data can retrigger a pitch that
                    // never released; the earlier note's release must
                    // still precede the new attack.
                    if let Some(&prev_track) = inner.active.get(&ev.pitch) {
                        scratch.push(ScheduledEvent {
                            sample_time: ev.sample_time,
                            kind: MidiEventKind::NoteOff,
                            pitch: ev.pitch,
                            velocity: 0,
                            track_id: prev_track,
                            seq: ev.seq,
                        });
                    }
                    inner.active.insert(ev.pitch, ev.track_id);
                }
                MidiEventKind::NoteOff => {
                    inner.active.remove(&ev.pitch);
                }
                MidiEventKind::ControlChange => {}
            }

            scratch.push(ev);
            inner.cursor += 1;
        }

        if scratch.is_empty() {
            return 0;
        }

        // Dispatch before releasing the critical section. A concurrent
        // stop() blocks until these events have reached the sink, so its
        // forced releases always land after the attacks they terminate.
        // The sink is non-blocking by contract, so the hold stays short.
        let sink = self.sink.read().clone();
        match sink {
            Some(sink) => {
                for ev in scratch.iter() {
                    sink.send_midi(
                        ev.sample_time.max(now),
                        ev.kind.status_byte(0),
                        ev.pitch,
                        ev.velocity,
                    );
                }
            }
            None => {
                for ev in scratch.iter() {
                    self.missing_sink.mark(ev.track_id);
                }
                let _ = self.ctx.diagnostics.dropped_events.try_add(scratch.len() as u64);
            }
        }

        scratch.len()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Stop
    // ─────────────────────────────────────────────────────────────────────

    /// Stop playback.
    ///
    /// Under one critical section: flips the playing flag, invalidates the
    /// timing reference, cancels the pending cursor, and snapshots and
    /// clears the active-note registry. Outside the section, dispatches an
    /// immediate NoteOff for every snapshotted note. A repeated call sees
    /// an empty snapshot and is a no-op. Returns the number of forced
    /// releases.
    pub fn stop(&self) -> usize {
        let (mut snapshot, flush_time) = {
            let mut inner = self.inner.lock();
            inner.playing = false;
            inner.timing = None;
            inner.events.clear();
            inner.cursor = 0;
            let snapshot: Vec<(u8, TrackId)> = inner.active.drain().collect();
            (snapshot, inner.last_tick_time)
        };

        if snapshot.is_empty() {
            return 0;
        }
        snapshot.sort_by_key(|&(pitch, _)| pitch);

        let sink = self.sink.read().clone();
        match sink {
            Some(sink) => {
                for &(pitch, _) in &snapshot {
                    sink.send_midi(flush_time, status::NOTE_OFF, pitch, 0);
                }
            }
            None => {
                for &(_, track_id) in &snapshot {
                    self.missing_sink.mark(track_id);
                }
                let _ = self
                    .ctx
                    .diagnostics
                    .dropped_events
                    .try_add(snapshot.len() as u64);
            }
        }

        snapshot.len()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Introspection
    // ─────────────────────────────────────────────────────────────────────

    pub fn is_playing(&self) -> bool {
        self.inner.lock().playing
    }

    pub fn active_note_count(&self) -> usize {
        self.inner.lock().active.len()
    }

    pub fn pending_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.events.len() - inner.cursor
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
