//! Integration tests for the playback core
//!
//! Drives the full transport path: play/stop/seek/tempo, cycle wrapping,
//! PDC alignment, and automation determinism, observing only the outward
//! surfaces (the MIDI sink and the region players).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use bb_core::midi::status;
use bb_core::SampleTime;
use bb_engine::{
    AudioRegion, BeatEvent, CurvePoint, CycleRange, MidiSink, ParamId, RegionPlayer, Segment,
    Transport,
};

// ═══════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<(SampleTime, u8, u8, u8)>>,
}

impl MidiSink for RecordingSink {
    fn send_midi(&self, sample_time: SampleTime, status: u8, data1: u8, data2: u8) {
        self.sent.lock().push((sample_time, status, data1, data2));
    }
}

impl RecordingSink {
    fn events(&self) -> Vec<(SampleTime, u8, u8, u8)> {
        self.sent.lock().clone()
    }
}

#[derive(Default)]
struct CountingPlayer {
    segments: Mutex<Vec<Segment>>,
    stop_calls: AtomicUsize,
    reset_calls: AtomicUsize,
}

impl RegionPlayer for CountingPlayer {
    fn enqueue(&self, segment: Segment) {
        self.segments.lock().push(segment);
    }
    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
    }
    fn reset(&self) {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn region(id: u32, start_beat: f64, length_beats: f64) -> AudioRegion {
    AudioRegion {
        id,
        start_beat,
        length_beats,
        file_frames: 10_000_000,
        file_offset: 0,
        looped: false,
    }
}

/// Transport at 48kHz/120 BPM (24000 samples per beat) with one track
fn setup() -> (Arc<Transport>, Arc<RecordingSink>, Arc<CountingPlayer>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let transport = Arc::new(Transport::new(48000.0));
    let sink = Arc::new(RecordingSink::default());
    transport.midi().set_sink(Arc::clone(&sink) as Arc<dyn MidiSink>);

    let player = Arc::new(CountingPlayer::default());
    transport.add_track(1, Arc::clone(&player) as Arc<dyn RegionPlayer>);
    transport.set_regions(1, vec![region(1, 0.0, 8.0)]);

    (transport, sink, player)
}

/// Advance the engine clock in buffer-sized steps, ticking after each
fn run_buffers(transport: &Transport, buffers: usize, buffer_frames: u32) {
    for _ in 0..buffers {
        transport.control_tick();
        transport.advance_clock(buffer_frames);
    }
    transport.control_tick();
}

// ═══════════════════════════════════════════════════════════════════════════
// STOP / REGISTRY
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn stop_leaves_no_active_notes() {
    let (transport, sink, _player) = setup();
    transport.set_midi_events(vec![
        BeatEvent::note_on(0.0, 60, 100, 1),
        BeatEvent::note_on(0.0, 64, 100, 1),
        BeatEvent::note_off(8.0, 60, 1),
        BeatEvent::note_off(8.0, 64, 1),
    ]);

    transport.play(0.0).unwrap();
    transport.control_tick();
    assert_eq!(transport.midi().active_note_count(), 2);

    transport.stop();
    assert_eq!(transport.midi().active_note_count(), 0);

    // Both sounding notes were force-released
    let offs: Vec<u8> = sink
        .events()
        .iter()
        .filter(|e| e.1 == status::NOTE_OFF)
        .map(|e| e.2)
        .collect();
    assert_eq!(offs, vec![60, 64]);

    // Second stop is a no-op: no duplicate releases
    let count = sink.events().len();
    transport.stop();
    assert_eq!(sink.events().len(), count);
}

#[test]
fn no_dispatch_after_stop_returns() {
    let (transport, sink, _player) = setup();
    transport.set_midi_events(vec![
        BeatEvent::note_on(0.0, 60, 100, 1),
        BeatEvent::note_on(2.0, 62, 100, 1),
    ]);

    transport.play(0.0).unwrap();
    transport.control_tick();
    transport.stop();
    let count = sink.events().len();

    // Ticks past the stop dispatch nothing
    transport.advance_clock(96_000);
    transport.control_tick();
    assert_eq!(sink.events().len(), count);
}

// ═══════════════════════════════════════════════════════════════════════════
// CYCLE WRAPPING
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn cycle_wraps_never_stop_the_players() {
    let (transport, _sink, player) = setup();
    transport
        .set_cycle(Some(CycleRange::new(0.0, 4.0)))
        .unwrap();
    transport.play(0.0).unwrap();

    let stops = player.stop_calls.load(Ordering::SeqCst);
    let resets = player.reset_calls.load(Ordering::SeqCst);
    let queued = player.segments.lock().len();

    // Three full cycles (4 beats = 96000 samples each) in 1024-frame buffers
    run_buffers(&transport, 283, 1024);

    assert!(transport.is_playing());
    assert_eq!(
        player.stop_calls.load(Ordering::SeqCst),
        stops,
        "preserve path must never invoke the player's stop"
    );
    assert_eq!(player.reset_calls.load(Ordering::SeqCst), resets);
    assert!(
        player.segments.lock().len() > queued,
        "each wrap tops up the pre-scheduled iterations"
    );
}

#[test]
fn seek_into_cycle_restarts_the_players() {
    let (transport, _sink, player) = setup();
    transport
        .set_cycle(Some(CycleRange::new(0.0, 4.0)))
        .unwrap();
    transport.play(0.0).unwrap();

    transport.advance_clock(24_000);
    transport.seek(1.0).unwrap();

    // An arbitrary seek is the full stop/reset path, never preserve
    assert!(player.stop_calls.load(Ordering::SeqCst) > 0);
    assert!(player.reset_calls.load(Ordering::SeqCst) > 0);
    assert!(transport.is_playing());
}

#[test]
fn cycle_wrap_reanchors_the_beat_grid() {
    let (transport, _sink, _player) = setup();
    transport
        .set_cycle(Some(CycleRange::new(0.0, 4.0)))
        .unwrap();
    transport.play(0.0).unwrap();

    transport.advance_clock(96_512);
    transport.control_tick();

    // Playhead wrapped back inside the cycle, phase-continuous
    let beat = transport.current_beat();
    assert!(beat >= 0.0 && beat < 1.0, "wrapped beat was {beat}");
    let r = transport.context().timing().unwrap();
    assert_eq!(r.origin_sample_time, 96_000);
}

// ═══════════════════════════════════════════════════════════════════════════
// PDC ALIGNMENT
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn compensation_shifts_both_domains_consistently() {
    let (transport, sink, player) = setup();
    let fast_player = Arc::new(CountingPlayer::default());
    transport.add_track(2, Arc::clone(&fast_player) as Arc<dyn RegionPlayer>);
    transport.set_regions(2, vec![region(2, 0.0, 8.0)]);

    // Track 1 has the slow chain; track 2 must be delayed to match
    transport.pdc().report_chain_latency(1, 1024);
    transport.pdc().report_chain_latency(2, 64);

    transport.set_midi_events(vec![
        BeatEvent::note_on(0.0, 60, 100, 1),
        BeatEvent::note_on(0.0, 62, 100, 2),
    ]);
    transport.play(0.0).unwrap();

    // Audio: same region start, compensated starts differ by 960 samples
    let slow_start = player.segments.lock()[0].start_sample;
    let fast_start = fast_player.segments.lock()[0].start_sample;
    assert_eq!(slow_start, 0);
    assert_eq!(fast_start, 960);

    // MIDI: same offsets
    run_buffers(&transport, 1, 1024);
    let sent = sink.events();
    let on_60 = sent.iter().find(|e| e.2 == 60).unwrap();
    let on_62 = sent.iter().find(|e| e.2 == 62).unwrap();
    assert_eq!(on_62.0 - on_60.0, 960);
}

#[test]
fn topology_change_during_playback_is_picked_up() {
    let (transport, _sink, player) = setup();
    transport.pdc().report_chain_latency(1, 0);
    transport.play(0.0).unwrap();
    player.segments.lock().clear();

    // A second track's plugin chain appears mid-playback
    transport.add_track(2, Arc::new(CountingPlayer::default()) as Arc<dyn RegionPlayer>);
    transport.pdc().report_chain_latency(2, 480);
    assert!(transport.pdc().is_dirty());

    transport.control_tick();
    assert!(!transport.pdc().is_dirty());
    assert_eq!(transport.context().compensation().compensation(1), 480);
}

// ═══════════════════════════════════════════════════════════════════════════
// AUTOMATION DETERMINISM
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn replay_from_same_beat_yields_same_values() {
    let (transport, _sink, _player) = setup();
    let volume = ParamId::volume(1);
    transport.automation().create_lane(volume.clone(), 1.0);
    transport
        .automation()
        .add_point(&volume, CurvePoint::new(0.0, 1.0));
    transport
        .automation()
        .add_point(&volume, CurvePoint::new(4.0, 0.0));

    transport.play(0.0).unwrap();
    transport.control_tick();
    let first_run = transport.automation().snapshot().value(&volume).unwrap();

    // Run ahead, values diverge from the start value
    run_buffers(&transport, 48, 1024);
    let later = transport.automation().snapshot().value(&volume).unwrap();
    assert!(later < first_run);

    // Replay from beat 0: the smoother reseeds from the lane, not from
    // whatever value the previous session left behind
    transport.stop();
    transport.play(0.0).unwrap();
    transport.control_tick();
    let second_run = transport.automation().snapshot().value(&volume).unwrap();
    assert!((second_run - first_run).abs() < 1e-6);
}

// ═══════════════════════════════════════════════════════════════════════════
// TEARDOWN
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn shutdown_with_live_workers_is_clean() {
    let (transport, _sink, _player) = setup();
    transport.set_midi_events(vec![BeatEvent::note_on(0.0, 60, 100, 1)]);
    transport.start_workers();
    transport.play(0.0).unwrap();

    std::thread::sleep(std::time::Duration::from_millis(30));

    transport.shutdown();
    assert!(!transport.is_playing());
    assert_eq!(transport.midi().active_note_count(), 0);

    // Shutdown again: no effect, no panic
    transport.shutdown();
}
