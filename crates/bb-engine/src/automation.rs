//! Automation value provider
//!
//! Per-parameter automation lanes in the beat domain, an interpolation law
//! over six curve kinds, and a fixed-rate control tick that publishes one
//! immutable value snapshot per tick for non-blocking consumption.
//!
//! The deterministic-playback rule: a query before a lane's first point
//! returns the `initial_value` captured once at lane creation, never a
//! live mixer value. Replaying the same project from the same position
//! must produce the same parameter trajectory every time.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use bb_core::{Beat, SampleTime, TimingReference, TrackId};

use crate::context::EngineContext;
use crate::smoother::Smoother;

/// Fixed control tick rate
pub const CONTROL_RATE_HZ: f64 = 120.0;

// ═══════════════════════════════════════════════════════════════════════════
// CURVES
// ═══════════════════════════════════════════════════════════════════════════

/// Interpolation curve between a point and its successor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum CurveKind {
    /// Linear interpolation
    #[default]
    Linear,
    /// Hold until the next point
    Step,
    /// Exponential (slow start)
    Exponential,
    /// Logarithmic (fast start)
    Logarithmic,
    /// Smooth sigmoid
    SCurve,
    /// Tension-weighted: -1.0 bends logarithmic, +1.0 exponential
    Tension(f32),
}

impl CurveKind {
    /// Shape the normalized position `t` in [0, 1]
    #[inline]
    fn shape(self, t: f64) -> f64 {
        match self {
            Self::Linear => t,
            Self::Step => 0.0,
            Self::Exponential => t * t,
            Self::Logarithmic => t.sqrt(),
            Self::SCurve => t * t * (3.0 - 2.0 * t),
            Self::Tension(k) => {
                let k = k.clamp(-1.0, 1.0) as f64;
                if k >= 0.0 {
                    t.powf(1.0 + 3.0 * k)
                } else {
                    1.0 - (1.0 - t).powf(1.0 - 3.0 * k)
                }
            }
        }
    }

    /// Interpolate between two values at normalized position `t`
    #[inline]
    pub fn interpolate(self, v0: f32, v1: f32, t: f64) -> f32 {
        let s = self.shape(t.clamp(0.0, 1.0));
        (v0 as f64 + (v1 as f64 - v0 as f64) * s) as f32
    }
}

/// Single automation point
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CurvePoint {
    /// Position in beats
    pub beat: Beat,
    /// Parameter value at this point
    pub value: f32,
    /// Curve toward the next point
    pub curve: CurveKind,
}

impl CurvePoint {
    pub fn new(beat: Beat, value: f32) -> Self {
        Self {
            beat,
            value,
            curve: CurveKind::Linear,
        }
    }

    pub fn with_curve(mut self, curve: CurveKind) -> Self {
        self.curve = curve;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LANE
// ═══════════════════════════════════════════════════════════════════════════

/// Automation lane for one parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationLane {
    /// Points sorted ascending by beat; equal beats keep insertion order
    points: Vec<CurvePoint>,
    /// Value before the first point, captured once at lane creation.
    /// Immutable for deterministic playback; there is deliberately no
    /// setter. Recreating the lane is the only refresh path.
    initial_value: f32,
    /// A disabled lane reads as if it had no points
    pub enabled: bool,
}

impl AutomationLane {
    pub fn new(initial_value: f32) -> Self {
        Self {
            points: Vec::new(),
            initial_value,
            enabled: true,
        }
    }

    #[inline]
    pub fn initial_value(&self) -> f32 {
        self.initial_value
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    /// Insert a point, keeping beats ascending. A point at an existing
    /// beat lands after its duplicates, preserving list order.
    pub fn add_point(&mut self, point: CurvePoint) {
        let idx = self.points.partition_point(|p| p.beat <= point.beat);
        self.points.insert(idx, point);
    }

    /// Remove the first point within `tolerance` beats of `beat`
    pub fn remove_point_at(&mut self, beat: Beat, tolerance: f64) -> bool {
        if let Some(idx) = self
            .points
            .iter()
            .position(|p| (p.beat - beat).abs() <= tolerance)
        {
            self.points.remove(idx);
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Interpolation law.
    ///
    /// Before the first point: `initial_value`. Past the last: hold.
    /// Otherwise the bracketing pair's curve, a pure function of
    /// `(p0, p1, beat)`. NaN beats clamp to the initial value.
    pub fn value_at(&self, beat: Beat) -> f32 {
        if !self.enabled || self.points.is_empty() {
            return self.initial_value;
        }

        let beat = if beat.is_nan() { f64::NEG_INFINITY } else { beat };

        let first = &self.points[0];
        if beat < first.beat {
            return self.initial_value;
        }

        if let Some(last) = self.points.last() {
            if beat >= last.beat {
                return last.value;
            }
        }

        // First index with beat strictly greater than the query; with
        // duplicate beats this brackets against the last duplicate.
        let idx = self.points.partition_point(|p| p.beat <= beat);
        let p0 = &self.points[idx - 1];
        let p1 = &self.points[idx];

        let span = p1.beat - p0.beat;
        if span <= 0.0 {
            return p0.value;
        }

        let t = (beat - p0.beat) / span;
        p0.curve.interpolate(p0.value, p1.value, t)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PARAMETER IDENTITY
// ═══════════════════════════════════════════════════════════════════════════

/// Identifies one automatable parameter
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamId {
    pub track_id: TrackId,
    pub name: String,
}

impl ParamId {
    pub fn new(track_id: TrackId, name: &str) -> Self {
        Self {
            track_id,
            name: name.to_string(),
        }
    }

    pub fn volume(track_id: TrackId) -> Self {
        Self::new(track_id, "volume")
    }

    pub fn pan(track_id: TrackId) -> Self {
        Self::new(track_id, "pan")
    }

    pub fn plugin_param(track_id: TrackId, slot: u32, name: &str) -> Self {
        Self::new(track_id, &format!("plugin{}.{}", slot, name))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SNAPSHOT
// ═══════════════════════════════════════════════════════════════════════════

/// Immutable per-tick value snapshot
#[derive(Debug, Clone, Default)]
pub struct AutomationSnapshot {
    /// Control tick this snapshot was computed on
    pub tick: u64,
    /// Playhead beat the values were evaluated at
    pub beat: Beat,
    /// Smoothed value per parameter
    values: HashMap<ParamId, f32>,
}

impl AutomationSnapshot {
    pub fn value(&self, param: &ParamId) -> Option<f32> {
        self.values.get(param).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PROVIDER
// ═══════════════════════════════════════════════════════════════════════════

/// Computes and publishes interpolated parameter values at control rate
pub struct AutomationProvider {
    ctx: Arc<EngineContext>,
    lanes: RwLock<HashMap<ParamId, AutomationLane>>,
    smoothers: Mutex<HashMap<ParamId, Smoother>>,
    snapshot: RwLock<Arc<AutomationSnapshot>>,
    tick_count: AtomicU64,
}

impl AutomationProvider {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            lanes: RwLock::new(HashMap::new()),
            smoothers: Mutex::new(HashMap::new()),
            snapshot: RwLock::new(Arc::new(AutomationSnapshot::default())),
            tick_count: AtomicU64::new(0),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lane management (control domain, fed by the editor)
    // ─────────────────────────────────────────────────────────────────────

    /// Create a lane, capturing its immutable initial value now.
    /// An existing lane keeps its original capture.
    pub fn create_lane(&self, param: ParamId, initial_value: f32) {
        self.lanes
            .write()
            .entry(param)
            .or_insert_with(|| AutomationLane::new(initial_value));
    }

    pub fn add_point(&self, param: &ParamId, point: CurvePoint) {
        if let Some(lane) = self.lanes.write().get_mut(param) {
            lane.add_point(point);
        }
    }

    pub fn set_lane_enabled(&self, param: &ParamId, enabled: bool) {
        if let Some(lane) = self.lanes.write().get_mut(param) {
            lane.enabled = enabled;
        }
    }

    pub fn remove_lane(&self, param: &ParamId) {
        self.lanes.write().remove(param);
        self.smoothers.lock().remove(param);
    }

    pub fn lane(&self, param: &ParamId) -> Option<AutomationLane> {
        self.lanes.read().get(param).cloned()
    }

    pub fn lane_ids(&self) -> Vec<ParamId> {
        self.lanes.read().keys().cloned().collect()
    }

    /// Raw (unsmoothed) lane value at a beat
    pub fn value_at(&self, param: &ParamId, beat: Beat) -> Option<f32> {
        self.lanes.read().get(param).map(|lane| lane.value_at(beat))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Playback
    // ─────────────────────────────────────────────────────────────────────

    /// Re-seed every smoother from the lane value at the new playhead
    /// beat. Called on every playback (re)start and seek; skipping this
    /// makes the first ~50ms ramp audibly from a stale value.
    pub fn reset_at_beat(&self, beat: Beat) {
        let lanes = self.lanes.read();
        let mut smoothers = self.smoothers.lock();
        for (param, lane) in lanes.iter() {
            let seed = lane.value_at(beat) as f64;
            smoothers
                .entry(param.clone())
                .and_modify(|s| s.reset(seed))
                .or_insert_with(|| Smoother::new(CONTROL_RATE_HZ, seed));
        }
    }

    /// One control tick: evaluate every enabled lane at the playhead,
    /// smooth, and publish one immutable snapshot.
    ///
    /// Returns the published snapshot, or None when no timing reference
    /// is live (transport stopped).
    pub fn control_tick(&self, now: SampleTime) -> Option<Arc<AutomationSnapshot>> {
        let reference: Arc<TimingReference> = self.ctx.timing()?;
        let beat = reference.sample_time_to_beat(now);

        let tick = self.tick_count.fetch_add(1, Ordering::Relaxed) + 1;

        let lanes = self.lanes.read();
        let mut smoothers = self.smoothers.lock();
        let mut values = HashMap::with_capacity(lanes.len());

        for (param, lane) in lanes.iter() {
            if !lane.enabled {
                continue;
            }
            let raw = lane.value_at(beat) as f64;
            let smoother = smoothers
                .entry(param.clone())
                .or_insert_with(|| Smoother::new(CONTROL_RATE_HZ, raw));
            values.insert(param.clone(), smoother.process(raw) as f32);
        }
        drop(smoothers);
        drop(lanes);

        let snapshot = Arc::new(AutomationSnapshot { tick, beat, values });
        *self.snapshot.write() = Arc::clone(&snapshot);
        Some(snapshot)
    }

    /// Control-side: latest published snapshot
    pub fn snapshot(&self) -> Arc<AutomationSnapshot> {
        self.snapshot.read().clone()
    }

    /// Render-side: latest snapshot without blocking; None on contention
    pub fn try_snapshot(&self) -> Option<Arc<AutomationSnapshot>> {
        match self.snapshot.try_read() {
            Some(guard) => Some(guard.clone()),
            None => {
                self.ctx.diagnostics.note_trylock_miss();
                None
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
