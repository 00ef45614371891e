//! Per-track audio region scheduler
//!
//! Converts beat-positioned audio regions into sample-positioned segments
//! and enqueues them into the track's playback primitive. The primitive has
//! no native seamless-loop mode, so gapless cycling works by pre-scheduling
//! the next N loop iterations before the playhead reaches the boundary and
//! never issuing a stop/reset at that boundary: a stop discards everything
//! already queued and produces an audible gap of tens of milliseconds.
//!
//! Per-track schedulers own disjoint state and need no cross-track locking.

use std::sync::Arc;

use parking_lot::Mutex;

use bb_core::{Beat, SampleTime, TimingReference, TrackId};

use crate::context::EngineContext;

/// Loop repetitions kept enqueued beyond the playhead's current iteration
pub const DEFAULT_ITERATIONS_AHEAD: u32 = 2;

// ═══════════════════════════════════════════════════════════════════════════
// TYPES
// ═══════════════════════════════════════════════════════════════════════════

/// Beat range over which playback repeats
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleRange {
    pub start_beat: Beat,
    pub end_beat: Beat,
}

impl CycleRange {
    pub fn new(start_beat: Beat, end_beat: Beat) -> Self {
        Self {
            start_beat,
            end_beat,
        }
    }

    #[inline]
    pub fn length_beats(&self) -> f64 {
        (self.end_beat - self.start_beat).max(0.0)
    }

    #[inline]
    pub fn contains(&self, beat: Beat) -> bool {
        beat >= self.start_beat && beat < self.end_beat
    }
}

/// Beat-positioned audio region referencing source material on disk
#[derive(Debug, Clone, Copy)]
pub struct AudioRegion {
    pub id: u32,
    pub start_beat: Beat,
    pub length_beats: f64,
    /// Total frames available in the source file
    pub file_frames: u64,
    /// Frame in the file where this region's read starts
    pub file_offset: u64,
    /// Region repeats its source material over its beat length
    pub looped: bool,
}

impl AudioRegion {
    #[inline]
    pub fn end_beat(&self) -> Beat {
        self.start_beat + self.length_beats
    }
}

/// Sample-positioned playback segment handed to the player
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub region_id: u32,
    /// Absolute sample time this segment starts, compensation included
    pub start_sample: SampleTime,
    /// Frame in the source file to read from
    pub read_offset: u64,
    /// Frames to play
    pub frames: u64,
}

/// Underlying per-track playback primitive
///
/// `enqueue` appends a segment behind whatever is already queued; `stop`
/// discards the queue; `reset` rewinds the player clock. Implementations
/// must tolerate stop/reset while idle.
pub trait RegionPlayer: Send + Sync {
    fn enqueue(&self, segment: Segment);
    fn stop(&self);
    fn reset(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Scheduled,
    Playing,
}

// ═══════════════════════════════════════════════════════════════════════════
// TRACK SCHEDULER
// ═══════════════════════════════════════════════════════════════════════════

struct TrackState {
    state: SchedulerState,
    /// PDC offset added to every subsequent segment start
    compensation: SampleTime,
    /// Loop iteration the playhead is currently in (cycle mode)
    current_iteration: u64,
    /// Highest loop iteration already enqueued (cycle mode)
    queued_iteration: u64,
}

/// Per-track sample-accurate region scheduler
pub struct TrackScheduler {
    track_id: TrackId,
    ctx: Arc<EngineContext>,
    player: Arc<dyn RegionPlayer>,
    state: Mutex<TrackState>,
}

impl TrackScheduler {
    pub fn new(track_id: TrackId, ctx: Arc<EngineContext>, player: Arc<dyn RegionPlayer>) -> Self {
        Self {
            track_id,
            ctx,
            player,
            state: Mutex::new(TrackState {
                state: SchedulerState::Stopped,
                compensation: 0,
                current_iteration: 0,
                queued_iteration: 0,
            }),
        }
    }

    pub fn track_id(&self) -> TrackId {
        self.track_id
    }

    pub fn state(&self) -> SchedulerState {
        self.state.lock().state
    }

    /// Store the PDC offset applied to all subsequent scheduling calls.
    /// Callable at any time; storing an unchanged value is a no-op.
    pub fn apply_compensation_delay(&self, samples: SampleTime) {
        let mut state = self.state.lock();
        let samples = samples.max(0);
        if state.compensation != samples {
            log::debug!(
                "track {}: compensation delay {} -> {} samples",
                self.track_id,
                state.compensation,
                samples
            );
            state.compensation = samples;
        }
    }

    /// Refresh the stored offset from the context's published table
    pub fn sync_compensation(&self) {
        let comp = self.ctx.compensation().compensation(self.track_id);
        self.apply_compensation_delay(comp as SampleTime);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Linear scheduling
    // ─────────────────────────────────────────────────────────────────────

    /// Schedule every region overlapping the play window starting at
    /// `at_beat`. Regions already in progress start immediately with their
    /// read offset advanced; looped regions clamp the intra-loop offset to
    /// the source length so a loop start past end-of-file never reads
    /// beyond the material. Returns the number of segments enqueued.
    pub fn schedule_from_beat(
        &self,
        regions: &[AudioRegion],
        at_beat: Beat,
        reference: &TimingReference,
    ) -> usize {
        let mut state = self.state.lock();
        let count = self.enqueue_window(
            regions,
            at_beat,
            0.0,
            f64::INFINITY,
            reference,
            state.compensation,
        );
        if count > 0 {
            state.state = SchedulerState::Scheduled;
        }
        count
    }

    /// Mark queued material as playing (render sink picked it up)
    pub fn begin_playback(&self) {
        let mut state = self.state.lock();
        if state.state == SchedulerState::Scheduled {
            state.state = SchedulerState::Playing;
        }
    }

    /// Discard queued material and rewind the player
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            state.state = SchedulerState::Stopped;
            state.current_iteration = 0;
            state.queued_iteration = 0;
        }
        self.player.stop();
        self.player.reset();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Cycle-aware scheduling
    // ─────────────────────────────────────────────────────────────────────

    /// Pre-schedule loop repetitions of the cycle range. Every segment is
    /// clipped at the cycle end, so consecutive iterations never overlap.
    ///
    /// With `preserve_playback = true` (the playhead jumped back to the
    /// cycle start) the player is not stopped or reset: logical iteration
    /// bookkeeping advances and enough future iterations are enqueued to
    /// keep `iterations_ahead` repetitions queued past the playhead.
    /// Buffers already queued for those iterations keep playing through
    /// the boundary uninterrupted. `reference` must be anchored at the
    /// current iteration's cycle start (the transport republishes exactly
    /// that on every wrap); `from_beat` is ignored.
    ///
    /// With `preserve_playback = false` (an arbitrary seek into the cycle)
    /// the player is stopped, reset, and rescheduled from `from_beat`:
    /// iteration zero runs from the playhead to the cycle end, then
    /// `iterations_ahead` full repetitions queue behind it.
    pub fn schedule_cycle_aware(
        &self,
        regions: &[AudioRegion],
        cycle: CycleRange,
        from_beat: Beat,
        iterations_ahead: u32,
        preserve_playback: bool,
        reference: &TimingReference,
    ) -> usize {
        let cycle_len = cycle.length_beats();
        if cycle_len <= 0.0 {
            return 0;
        }

        let mut state = self.state.lock();
        let mut enqueued = 0;

        if preserve_playback {
            // Playing -> Playing: bookkeeping only, then top up the queue.
            state.current_iteration += 1;
            let target = state.current_iteration + iterations_ahead as u64;
            while state.queued_iteration < target {
                let next = state.queued_iteration + 1;
                let shift = (next - state.current_iteration) as f64 * cycle_len;
                enqueued += self.enqueue_window(
                    regions,
                    cycle.start_beat,
                    shift,
                    cycle.end_beat,
                    reference,
                    state.compensation,
                );
                state.queued_iteration = next;
            }
        } else {
            // Full restart: discard the queue, rewind, rebuild from the
            // playhead plus the lookahead iterations.
            if state.state != SchedulerState::Stopped {
                self.player.stop();
                self.player.reset();
            }
            state.state = SchedulerState::Stopped;
            state.current_iteration = 0;
            state.queued_iteration = iterations_ahead as u64;

            let from_beat = if cycle.contains(from_beat) {
                from_beat
            } else {
                cycle.start_beat
            };

            // Iteration zero: from the playhead to the cycle end
            enqueued += self.enqueue_window(
                regions,
                from_beat,
                0.0,
                cycle.end_beat,
                reference,
                state.compensation,
            );
            for iteration in 1..=iterations_ahead as u64 {
                enqueued += self.enqueue_window(
                    regions,
                    cycle.start_beat,
                    iteration as f64 * cycle_len,
                    cycle.end_beat,
                    reference,
                    state.compensation,
                );
            }
            if enqueued > 0 {
                state.state = SchedulerState::Scheduled;
            }
        }

        enqueued
    }

    /// Enqueue the regions overlapping `[at_beat, clip_end)`, shifted
    /// forward by `beat_shift` (loop iteration displacement). Returns
    /// segments added.
    fn enqueue_window(
        &self,
        regions: &[AudioRegion],
        at_beat: Beat,
        beat_shift: f64,
        clip_end: Beat,
        reference: &TimingReference,
        compensation: SampleTime,
    ) -> usize {
        let sample_rate = reference.sample_rate;
        let mut count = 0;

        for region in regions {
            let effective_start = region.start_beat.max(at_beat);
            let effective_end = region.end_beat().min(clip_end);
            if effective_end <= effective_start {
                continue;
            }

            let mut read_offset = region.file_offset;
            if region.start_beat < at_beat {
                // Playhead inside the region: advance the read position
                // by the elapsed span.
                let elapsed_secs = reference.seconds_from_beat_delta(at_beat - region.start_beat);
                read_offset += (elapsed_secs * sample_rate).round() as u64;
            }

            if region.looped {
                // A loop start landing beyond the source material must not
                // read past end-of-file.
                read_offset = read_offset.min(region.file_frames);
            } else if read_offset >= region.file_frames {
                continue; // nothing left to read
            }

            let span_secs = reference.seconds_from_beat_delta(effective_end - effective_start);
            let mut frames = (span_secs * sample_rate).round() as u64;
            if !region.looped {
                frames = frames.min(region.file_frames.saturating_sub(read_offset));
            }
            if frames == 0 {
                continue;
            }

            let offset_secs =
                reference.seconds_from_beat_delta(effective_start - at_beat + beat_shift);
            let start_sample = reference.beat_to_sample_time(at_beat)
                + (offset_secs * sample_rate).round() as SampleTime
                + compensation;

            self.player.enqueue(Segment {
                region_id: region.id,
                start_sample,
                read_offset,
                frames,
            });
            count += 1;
        }

        count
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
