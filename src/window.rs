//! Measurement window feeding the snapshot publisher
//!
//! Frame phases (map, UI) and world-size samples accumulate here between
//! publications. The window rolls every `interval_secs` or when a severe
//! anomaly forces it; rolling builds a [`Snapshot`] and restarts the window
//! from the current collection and working-set baselines.

use crate::counters::GENERATIONS;
use crate::snapshot::{ModeTag, Snapshot};
use crate::timing::TimingStat;
use serde::Serialize;
use std::time::Duration;

/// Which part of a frame a cost sample belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FramePhase {
    /// World/map rendering and simulation
    Map,
    Ui,
}

/// Host-supplied world size estimate
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct WorldSample {
    pub actors: f64,
    pub objects: f64,
    pub resources: f64,
}

/// Resource readings at a window boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowBaseline {
    pub collections: [u64; GENERATIONS],
    pub working_set_bytes: u64,
}

#[derive(Debug)]
pub struct WindowSampler {
    interval: Duration,
    started: Duration,
    frames: u64,
    map: TimingStat,
    ui: TimingStat,
    world_sum: WorldSample,
    world_samples: u64,
    baseline: WindowBaseline,
}

impl WindowSampler {
    pub fn new(interval_secs: f64, now: Duration, baseline: WindowBaseline) -> Self {
        Self {
            interval: Duration::from_secs_f64(interval_secs.max(0.0)),
            started: now,
            frames: 0,
            map: TimingStat::new(),
            ui: TimingStat::new(),
            world_sum: WorldSample::default(),
            world_samples: 0,
            baseline,
        }
    }

    /// Count one host frame
    pub fn record_frame(&mut self) {
        self.frames += 1;
    }

    pub fn record_phase(&mut self, phase: FramePhase, elapsed_ms: f64) {
        match phase {
            FramePhase::Map => self.map.record(elapsed_ms),
            FramePhase::Ui => self.ui.record(elapsed_ms),
        };
    }

    pub fn record_world(&mut self, sample: WorldSample) {
        let finite = [sample.actors, sample.objects, sample.resources]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0);
        if !finite {
            return;
        }
        self.world_sum.actors += sample.actors;
        self.world_sum.objects += sample.objects;
        self.world_sum.resources += sample.resources;
        self.world_samples += 1;
    }

    pub fn is_due(&self, now: Duration) -> bool {
        now.saturating_sub(self.started) >= self.interval
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Close the window: build its snapshot and start a new one at `now`
    pub fn roll(&mut self, now: Duration, current: WindowBaseline, mode: ModeTag) -> Snapshot {
        let map = self.map.snapshot_and_reset();
        let ui = self.ui.snapshot_and_reset();
        let n = self.world_samples.max(1) as f64;

        let mut collection_deltas = [0u64; GENERATIONS];
        for (g, delta) in collection_deltas.iter_mut().enumerate() {
            *delta = current.collections[g].saturating_sub(self.baseline.collections[g]);
        }

        let snapshot = Snapshot {
            sequence: 0,
            published_at_secs: now.as_secs_f64(),
            window_secs: now.saturating_sub(self.started).as_secs_f64(),
            frame_count: self.frames,
            map_avg_ms: map.avg_ms,
            map_max_ms: map.max_ms,
            ui_samples: ui.count,
            ui_avg_ms: ui.avg_ms,
            ui_max_ms: ui.max_ms,
            world_samples: self.world_samples,
            avg_actors: self.world_sum.actors / n,
            avg_objects: self.world_sum.objects / n,
            avg_resources: self.world_sum.resources / n,
            collection_deltas,
            working_set_bytes: current.working_set_bytes,
            working_set_delta: current.working_set_bytes as i64
                - self.baseline.working_set_bytes as i64,
            mode,
        };

        self.started = now;
        self.frames = 0;
        self.world_sum = WorldSample::default();
        self.world_samples = 0;
        self.baseline = current;
        snapshot
    }
}
