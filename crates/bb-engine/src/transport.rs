//! Transport orchestration
//!
//! The transport owns the discontinuity decisions: play, stop, seek and
//! tempo changes publish a fresh timing reference and drive every scheduler
//! from it consistently. A position jump back to the cycle start while
//! playing is the one case that preserves the audio players' queues;
//! every other jump stops, resets and reschedules.
//!
//! Periodic work (the control tick, deferred flag draining) runs on weakly
//! captured background tickers registered with a cancellation registry;
//! `shutdown()` tears all of it down synchronously and exactly once.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use bb_core::{Beat, EngineError, EngineResult, SampleTime, Tempo, TimingReference, TrackId};
use bb_core::tempo::{MAX_TEMPO, MIN_TEMPO};
use bb_rt::{CancellationRegistry, ControlTicker, PendingFlags};

use crate::automation::AutomationProvider;
use crate::context::EngineContext;
use crate::midi_sched::{BeatEvent, MidiScheduler};
use crate::pdc::PdcCalculator;
use crate::region_sched::{
    AudioRegion, CycleRange, RegionPlayer, TrackScheduler, DEFAULT_ITERATIONS_AHEAD,
};

/// Control tick period (~120 Hz)
pub const CONTROL_TICK_PERIOD: Duration = Duration::from_millis(8);

/// Period of the deferred retry/diagnostic drain
pub const FLAG_DRAIN_PERIOD: Duration = Duration::from_millis(250);

// ═══════════════════════════════════════════════════════════════════════════
// TRANSPORT
// ═══════════════════════════════════════════════════════════════════════════

/// Project material the schedulers are driven from
#[derive(Default)]
struct ProjectData {
    midi_events: Vec<BeatEvent>,
    regions: HashMap<TrackId, Vec<AudioRegion>>,
}

struct TransportState {
    playing: bool,
    tempo: Tempo,
    /// Playhead beat while stopped; while playing the live position comes
    /// from the published reference and the sample clock
    position_beat: Beat,
    cycle: Option<CycleRange>,
}

/// Playback transport driving all schedulers
pub struct Transport {
    ctx: Arc<EngineContext>,
    midi: Arc<MidiScheduler>,
    automation: Arc<AutomationProvider>,
    pdc: Arc<PdcCalculator>,
    tracks: RwLock<HashMap<TrackId, Arc<TrackScheduler>>>,
    project: Mutex<ProjectData>,
    state: Mutex<TransportState>,
    /// Engine sample clock, advanced by the render callback
    clock: AtomicI64,
    registry: CancellationRegistry,
    shut_down: AtomicBool,
}

impl Transport {
    pub fn new(sample_rate: f64) -> Self {
        let ctx = Arc::new(EngineContext::new(sample_rate));
        Self {
            midi: Arc::new(MidiScheduler::new(Arc::clone(&ctx))),
            automation: Arc::new(AutomationProvider::new(Arc::clone(&ctx))),
            pdc: Arc::new(PdcCalculator::new()),
            ctx,
            tracks: RwLock::new(HashMap::new()),
            project: Mutex::new(ProjectData::default()),
            state: Mutex::new(TransportState {
                playing: false,
                tempo: Tempo::DEFAULT,
                position_beat: 0.0,
                cycle: None,
            }),
            clock: AtomicI64::new(0),
            registry: CancellationRegistry::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn midi(&self) -> &Arc<MidiScheduler> {
        &self.midi
    }

    pub fn automation(&self) -> &Arc<AutomationProvider> {
        &self.automation
    }

    pub fn pdc(&self) -> &Arc<PdcCalculator> {
        &self.pdc
    }

    // ─────────────────────────────────────────────────────────────────────
    // Clock
    // ─────────────────────────────────────────────────────────────────────

    /// Render-side: advance the engine clock by one buffer. Wait-free.
    #[inline]
    pub fn advance_clock(&self, frames: u32) {
        self.clock.fetch_add(frames as i64, Ordering::Release);
    }

    #[inline]
    pub fn now_samples(&self) -> SampleTime {
        self.clock.load(Ordering::Acquire)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Project material
    // ─────────────────────────────────────────────────────────────────────

    /// Register a track with its playback primitive
    pub fn add_track(&self, track_id: TrackId, player: Arc<dyn RegionPlayer>) {
        let scheduler = Arc::new(TrackScheduler::new(track_id, Arc::clone(&self.ctx), player));
        self.tracks.write().insert(track_id, scheduler);
    }

    pub fn remove_track(&self, track_id: TrackId) {
        self.tracks.write().remove(&track_id);
        self.pdc.remove_track(track_id);
        self.project.lock().regions.remove(&track_id);
    }

    pub fn set_midi_events(&self, events: Vec<BeatEvent>) {
        self.project.lock().midi_events = events;
    }

    pub fn set_regions(&self, track_id: TrackId, regions: Vec<AudioRegion>) {
        self.project.lock().regions.insert(track_id, regions);
    }

    /// Set or clear the cycle range
    pub fn set_cycle(&self, cycle: Option<CycleRange>) -> EngineResult<()> {
        if let Some(c) = cycle {
            if c.length_beats() <= 0.0 {
                return Err(EngineError::InvalidBeatRange {
                    start: c.start_beat,
                    end: c.end_beat,
                });
            }
        }
        self.state.lock().cycle = cycle;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Transport operations
    // ─────────────────────────────────────────────────────────────────────

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    /// Live playhead beat
    pub fn current_beat(&self) -> Beat {
        match self.ctx.timing() {
            Some(r) => r.sample_time_to_beat(self.now_samples()),
            None => self.state.lock().position_beat,
        }
    }

    /// Start playback from a beat position
    pub fn play(&self, from_beat: Beat) -> EngineResult<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(EngineError::Shutdown("transport is shut down".into()));
        }
        if !from_beat.is_finite() {
            return Err(EngineError::InvalidParam(format!(
                "non-finite play position: {from_beat}"
            )));
        }

        let (tempo, cycle) = {
            let mut state = self.state.lock();
            state.position_beat = from_beat;
            state.playing = true;
            (state.tempo, state.cycle)
        };

        if self.pdc.is_dirty() {
            self.pdc.recalculate(&self.ctx);
        }

        let reference = Arc::new(TimingReference::new(
            self.now_samples(),
            from_beat,
            tempo,
            self.ctx.sample_rate(),
        ));
        self.ctx.publish_timing(Arc::clone(&reference));

        self.schedule_all(from_beat, cycle, &reference);
        self.automation.reset_at_beat(from_beat);

        log::info!(
            "Transport: play from beat {:.3} at {} BPM",
            from_beat,
            tempo.bpm()
        );
        Ok(())
    }

    /// Stop playback. Idempotent; no further scheduling occurs after this
    /// returns.
    pub fn stop(&self) {
        let was_playing = {
            let mut state = self.state.lock();
            let was = state.playing;
            state.playing = false;
            was
        };
        if !was_playing {
            return;
        }

        // Capture the resting position before the reference goes away
        let resting = self.current_beat();
        self.state.lock().position_beat = resting;

        self.ctx.invalidate_timing();
        let forced = self.midi.stop();
        for scheduler in self.tracks.read().values() {
            scheduler.stop();
        }
        log::info!(
            "Transport: stopped at beat {:.3} ({} forced note releases)",
            resting,
            forced
        );
    }

    /// Jump to an arbitrary beat position.
    ///
    /// While playing this is always the full stop-reset-reschedule path,
    /// never the preserve path; preserve is reserved for the cycle
    /// boundary jump.
    pub fn seek(&self, to_beat: Beat) -> EngineResult<()> {
        if !to_beat.is_finite() {
            return Err(EngineError::InvalidParam(format!(
                "non-finite seek position: {to_beat}"
            )));
        }

        let playing = self.is_playing();
        if playing {
            self.stop();
            self.play(to_beat)
        } else {
            self.state.lock().position_beat = to_beat;
            Ok(())
        }
    }

    /// Change the tempo. While playing, rebuilds everything against a
    /// reference anchored at the current playhead so the musical position
    /// is continuous across the change.
    pub fn set_tempo(&self, bpm: f64) -> EngineResult<()> {
        if !bpm.is_finite() || !(MIN_TEMPO..=MAX_TEMPO).contains(&bpm) {
            return Err(EngineError::InvalidTempo(bpm));
        }

        let playing = self.is_playing();
        let at_beat = self.current_beat();
        self.state.lock().tempo = Tempo::new(bpm);
        log::info!("Transport: tempo -> {} BPM", bpm);

        if playing {
            self.stop();
            self.play(at_beat)?;
        }
        Ok(())
    }

    /// Handle the playhead reaching the cycle end: jump back to the cycle
    /// start, preserving the audio players' queued iterations. This is the
    /// only preserve-playback transition.
    pub fn handle_cycle_boundary(&self) {
        let (cycle, tempo) = {
            let state = self.state.lock();
            if !state.playing {
                return;
            }
            let Some(cycle) = state.cycle else { return };
            (cycle, state.tempo)
        };
        let Some(old_reference) = self.ctx.timing() else {
            return;
        };

        // Anchor the new reference exactly where the old one places the
        // cycle end, so the wrapped beat grid is phase-continuous.
        let boundary_sample = old_reference.beat_to_sample_time(cycle.end_beat);
        let reference = Arc::new(TimingReference::new(
            boundary_sample,
            cycle.start_beat,
            tempo,
            self.ctx.sample_rate(),
        ));
        self.ctx.publish_timing(Arc::clone(&reference));

        // MIDI rebuilds wholesale; audio preserves its queue.
        let project = self.project.lock();
        self.midi.seek(&project.midi_events, &reference);
        for scheduler in self.tracks.read().values() {
            let regions = project
                .regions
                .get(&scheduler.track_id())
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            scheduler.schedule_cycle_aware(
                regions,
                cycle,
                cycle.start_beat,
                DEFAULT_ITERATIONS_AHEAD,
                true,
                &reference,
            );
        }
        drop(project);

        self.automation.reset_at_beat(cycle.start_beat);
        log::debug!(
            "Transport: cycle wrap to beat {:.3} at sample {}",
            cycle.start_beat,
            boundary_sample
        );
    }

    // ─────────────────────────────────────────────────────────────────────
    // Control tick
    // ─────────────────────────────────────────────────────────────────────

    /// One control tick: recompute PDC if the topology changed, dispatch
    /// due MIDI, publish automation, and wrap at the cycle boundary.
    pub fn control_tick(&self) {
        if !self.is_playing() {
            return;
        }

        if self.pdc.is_dirty() {
            self.pdc.recalculate(&self.ctx);
            for scheduler in self.tracks.read().values() {
                scheduler.sync_compensation();
            }
        }

        let now = self.now_samples();
        self.midi.tick(now);
        self.automation.control_tick(now);

        let cycle = self.state.lock().cycle;
        if let Some(cycle) = cycle {
            if let Some(reference) = self.ctx.timing() {
                if reference.sample_time_to_beat(now) >= cycle.end_beat {
                    self.handle_cycle_boundary();
                }
            }
        }
    }

    /// Drain the render-side pending flags and do the logging the render
    /// path is not allowed to do.
    pub fn drain_pending_flags(&self) {
        let word = self.midi.missing_sink_flags().drain();
        if word != 0 {
            let bits: Vec<u32> = PendingFlags::iter_bits(word).collect();
            log::warn!(
                "MIDI events dropped with no sink attached (track bits {:?})",
                bits
            );
        }
    }

    /// Spawn the background tickers. The callbacks hold the transport
    /// weakly, so a dropped transport stops them on its own; orderly
    /// teardown goes through `shutdown()`.
    pub fn start_workers(self: &Arc<Self>) {
        self.registry.register(ControlTicker::spawn_weak(
            "bb-control-tick",
            CONTROL_TICK_PERIOD,
            self,
            |t| t.control_tick(),
        ));
        self.registry.register(ControlTicker::spawn_weak(
            "bb-flag-drain",
            FLAG_DRAIN_PERIOD,
            self,
            |t| t.drain_pending_flags(),
        ));
    }

    /// Tear down: cancel every background ticker synchronously, then stop
    /// playback. Exactly-once; later calls are no-ops.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.registry.cancel_all();
        self.stop();
        log::info!("Transport: shut down");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internal
    // ─────────────────────────────────────────────────────────────────────

    /// Drive every scheduler from one reference. Cycle mode pre-schedules
    /// loop iterations; linear mode schedules the open-ended window.
    fn schedule_all(&self, from_beat: Beat, cycle: Option<CycleRange>, reference: &Arc<TimingReference>) {
        let project = self.project.lock();
        self.midi.schedule(&project.midi_events, reference);

        let in_cycle = cycle.filter(|c| c.contains(from_beat));
        for scheduler in self.tracks.read().values() {
            let regions = project
                .regions
                .get(&scheduler.track_id())
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            scheduler.sync_compensation();
            match in_cycle {
                Some(cycle) => {
                    scheduler.schedule_cycle_aware(
                        regions,
                        cycle,
                        from_beat,
                        DEFAULT_ITERATIONS_AHEAD,
                        false,
                        reference,
                    );
                }
                None => {
                    scheduler.schedule_from_beat(regions, from_beat, reference);
                }
            }
            scheduler.begin_playback();
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi_sched::MidiSink;
    use crate::region_sched::Segment;
    use std::sync::atomic::AtomicUsize;

    struct NullSink;
    impl MidiSink for NullSink {
        fn send_midi(&self, _sample_time: SampleTime, _status: u8, _data1: u8, _data2: u8) {}
    }

    #[derive(Default)]
    struct CountingPlayer {
        enqueued: AtomicUsize,
        segments: Mutex<Vec<Segment>>,
        stop_calls: AtomicUsize,
        reset_calls: AtomicUsize,
    }

    impl RegionPlayer for CountingPlayer {
        fn enqueue(&self, segment: Segment) {
            self.enqueued.fetch_add(1, Ordering::SeqCst);
            self.segments.lock().push(segment);
        }
        fn stop(&self) {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
        }
        fn reset(&self) {
            self.reset_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn region(start_beat: Beat, length_beats: f64) -> AudioRegion {
        AudioRegion {
            id: 1,
            start_beat,
            length_beats,
            file_frames: 10_000_000,
            file_offset: 0,
            looped: false,
        }
    }

    fn setup() -> (Arc<Transport>, Arc<CountingPlayer>) {
        let transport = Arc::new(Transport::new(48000.0));
        transport.midi.set_sink(Arc::new(NullSink));
        let player = Arc::new(CountingPlayer::default());
        transport.add_track(1, Arc::clone(&player) as Arc<dyn RegionPlayer>);
        transport.set_regions(1, vec![region(0.0, 8.0)]);
        (transport, player)
    }

    #[test]
    fn test_play_publishes_reference() {
        let (transport, player) = setup();
        assert!(transport.context().timing().is_none());

        transport.play(0.0).unwrap();
        assert!(transport.is_playing());
        let r = transport.context().timing().unwrap();
        assert_eq!(r.origin_beat, 0.0);
        assert_eq!(r.origin_sample_time, 0);
        assert!(player.enqueued.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn test_stop_invalidates_and_is_idempotent() {
        let (transport, player) = setup();
        transport.play(0.0).unwrap();
        transport.stop();

        assert!(!transport.is_playing());
        assert!(transport.context().timing().is_none());
        let stops = player.stop_calls.load(Ordering::SeqCst);
        assert!(stops > 0);

        transport.stop();
        assert_eq!(player.stop_calls.load(Ordering::SeqCst), stops);
    }

    #[test]
    fn test_seek_while_stopped_moves_position() {
        let (transport, player) = setup();
        transport.seek(16.0).unwrap();
        assert_eq!(transport.current_beat(), 16.0);
        assert_eq!(player.enqueued.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_tempo_validation() {
        let (transport, _player) = setup();
        assert!(transport.set_tempo(10.0).is_err());
        assert!(transport.set_tempo(f64::NAN).is_err());
        assert!(transport.set_tempo(140.0).is_ok());
    }

    #[test]
    fn test_cycle_boundary_preserves_players() {
        let (transport, player) = setup();
        transport.set_cycle(Some(CycleRange::new(0.0, 4.0))).unwrap();
        transport.play(0.0).unwrap();

        let stops = player.stop_calls.load(Ordering::SeqCst);
        let resets = player.reset_calls.load(Ordering::SeqCst);

        // Advance past the cycle end (4 beats = 96000 samples @120 BPM)
        transport.advance_clock(96_500);
        transport.control_tick();

        // Wrapped: same stop/reset counts, reference re-anchored
        assert_eq!(player.stop_calls.load(Ordering::SeqCst), stops);
        assert_eq!(player.reset_calls.load(Ordering::SeqCst), resets);
        let r = transport.context().timing().unwrap();
        assert_eq!(r.origin_beat, 0.0);
        assert_eq!(r.origin_sample_time, 96_000);
        assert!(transport.is_playing());
    }

    #[test]
    fn test_play_mid_cycle_starts_at_playhead() {
        let (transport, player) = setup();
        transport.set_cycle(Some(CycleRange::new(0.0, 4.0))).unwrap();

        // Playing from beat 2 inside the cycle: nothing may be scheduled
        // before the current sample clock (0)
        transport.play(2.0).unwrap();

        let segs = player.segments.lock().clone();
        assert!(!segs.is_empty());
        assert!(segs.iter().all(|s| s.start_sample >= 0));
        // Iteration zero picks the region up mid-file at the playhead
        assert_eq!(segs[0].start_sample, 0);
        assert_eq!(segs[0].read_offset, 2 * 24000);
    }

    #[test]
    fn test_invalid_cycle_rejected() {
        let (transport, _player) = setup();
        assert!(transport.set_cycle(Some(CycleRange::new(4.0, 4.0))).is_err());
        assert!(transport.set_cycle(Some(CycleRange::new(8.0, 4.0))).is_err());
        assert!(transport.set_cycle(None).is_ok());
    }

    #[test]
    fn test_shutdown_idempotent_and_final() {
        let (transport, _player) = setup();
        transport.start_workers();
        assert_eq!(transport.registry.len(), 2);

        transport.play(0.0).unwrap();
        transport.shutdown();
        assert!(transport.registry.is_empty());
        assert!(!transport.is_playing());

        transport.shutdown();
        assert!(matches!(
            transport.play(0.0),
            Err(EngineError::Shutdown(_))
        ));
    }

    #[test]
    fn test_tempo_change_while_playing_rebuilds() {
        let (transport, player) = setup();
        transport.play(0.0).unwrap();
        transport.advance_clock(48_000); // 2 beats at 120 BPM

        transport.set_tempo(60.0).unwrap();
        let r = transport.context().timing().unwrap();
        assert_eq!(r.tempo.bpm(), 60.0);
        assert!((r.origin_beat - 2.0).abs() < 1e-6);
        assert!(player.stop_calls.load(Ordering::SeqCst) > 0);
        assert!(transport.is_playing());
    }
}
