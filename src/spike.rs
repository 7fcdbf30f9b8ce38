//! Frame, allocation and working-set spike detection
//!
//! Runs once per host tick. Unlike a z-score detector this one works on
//! absolute thresholds: a 60ms frame is a problem whatever the baseline is.
//! Each event family is gated by its own cooldown so a sustained problem
//! produces one warning per cooldown period instead of one per frame, and
//! the severe cases bypass the cooldown to force a summary flush.

use crate::config::SpikeConfig;
use crate::counters::GENERATIONS;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Recent events kept for inspection
const RECENT_EVENTS: usize = 64;

/// Cooldown counted down by tick `dt`, fired with an atomic exchange
///
/// `try_fire` succeeds at most once per period even when several threads
/// race on it.
#[derive(Debug)]
pub struct CooldownTimer {
    period_secs: f64,
    remaining_bits: AtomicU64,
}

impl CooldownTimer {
    pub fn new(period_secs: f64) -> Self {
        Self {
            period_secs: period_secs.max(0.0),
            remaining_bits: AtomicU64::new(0.0f64.to_bits()),
        }
    }

    /// Count down by `dt` seconds
    pub fn tick(&self, dt: f64) {
        if dt.is_nan() || dt <= 0.0 {
            return;
        }
        let _ = self
            .remaining_bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let remaining = f64::from_bits(bits);
                (remaining > 0.0).then(|| (remaining - dt).max(0.0).to_bits())
            });
    }

    /// Fire if the cooldown has elapsed, re-arming it
    pub fn try_fire(&self) -> bool {
        let mut current = self.remaining_bits.load(Ordering::Acquire);
        loop {
            if f64::from_bits(current) > 0.0 {
                return false;
            }
            match self.remaining_bits.compare_exchange_weak(
                current,
                self.period_secs.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn remaining_secs(&self) -> f64 {
        f64::from_bits(self.remaining_bits.load(Ordering::Acquire))
    }
}

/// Counter readings taken at one tick
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpikeSample {
    pub now: Duration,
    pub allocated_bytes: u64,
    pub working_set_bytes: u64,
    pub collections: [u64; GENERATIONS],
    /// Host is on its primary (map) view
    pub on_primary_view: bool,
}

/// Named anomaly raised by the detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpikeEvent {
    FrameSpike {
        elapsed_ms: f64,
        collections: [u64; GENERATIONS],
    },
    AllocationSpike {
        bytes: u64,
    },
    WorkingSetSpike {
        bytes: u64,
    },
    ForcedFlush {
        allocation_bytes: u64,
        working_set_bytes: i64,
    },
}

impl SpikeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SpikeEvent::FrameSpike { .. } => "frame_spike",
            SpikeEvent::AllocationSpike { .. } => "allocation_spike",
            SpikeEvent::WorkingSetSpike { .. } => "working_set_spike",
            SpikeEvent::ForcedFlush { .. } => "forced_flush",
        }
    }
}

impl fmt::Display for SpikeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpikeEvent::FrameSpike {
                elapsed_ms,
                collections,
            } => write!(
                f,
                "frame spike: {:.1}ms (collections gen0={} gen1={} gen2={})",
                elapsed_ms, collections[0], collections[1], collections[2]
            ),
            SpikeEvent::AllocationSpike { bytes } => {
                write!(f, "allocation spike: {:.1}MB since last tick", mb(*bytes as f64))
            }
            SpikeEvent::WorkingSetSpike { bytes } => {
                write!(f, "working set spike: +{:.1}MB since last tick", mb(*bytes as f64))
            }
            SpikeEvent::ForcedFlush {
                allocation_bytes,
                working_set_bytes,
            } => write!(
                f,
                "severe memory spike: allocated {:.1}MB, working set {:+.1}MB; forcing flush",
                mb(*allocation_bytes as f64),
                mb(*working_set_bytes as f64)
            ),
        }
    }
}

fn mb(bytes: f64) -> f64 {
    bytes / 1_000_000.0
}

/// Everything one tick produced
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TickReport {
    pub events: Vec<SpikeEvent>,
    /// Frame-to-frame elapsed time; `None` on the first tick
    pub frame_ms: Option<f64>,
    pub allocation_delta: u64,
    pub working_set_delta: i64,
    pub collection_deltas: [u64; GENERATIONS],
    /// The summary emitter should run now (cadence or forced)
    pub summary_due: bool,
    /// A severe anomaly asks for the measurement window to restart
    pub reset_window: bool,
}

/// Fixed-cadence spike detector
#[derive(Debug)]
pub struct SpikeDetector {
    config: SpikeConfig,
    frame_cooldown: CooldownTimer,
    memory_cooldown: CooldownTimer,
    previous: Option<SpikeSample>,
    since_summary_secs: f64,
    recent: VecDeque<SpikeEvent>,
    event_count: u64,
}

impl SpikeDetector {
    pub fn new(config: SpikeConfig) -> Self {
        Self {
            frame_cooldown: CooldownTimer::new(config.frame_cooldown_secs),
            memory_cooldown: CooldownTimer::new(config.memory_cooldown_secs),
            config,
            previous: None,
            since_summary_secs: 0.0,
            recent: VecDeque::with_capacity(RECENT_EVENTS),
            event_count: 0,
        }
    }

    /// Process one host tick of `dt` seconds
    pub fn on_tick(&mut self, dt: f64, sample: SpikeSample) -> TickReport {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        self.frame_cooldown.tick(dt);
        self.memory_cooldown.tick(dt);

        let mut report = TickReport::default();
        if let Some(prev) = self.previous {
            report.frame_ms = Some(sample.now.saturating_sub(prev.now).as_secs_f64() * 1000.0);
            report.allocation_delta = sample.allocated_bytes.saturating_sub(prev.allocated_bytes);
            report.working_set_delta =
                sample.working_set_bytes as i64 - prev.working_set_bytes as i64;
            for g in 0..GENERATIONS {
                report.collection_deltas[g] = sample.collections[g].saturating_sub(prev.collections[g]);
            }
        }
        self.previous = Some(sample);

        if self.config.enabled && report.frame_ms.is_some() {
            self.check_frame(&sample, &mut report);
            self.check_memory(&mut report);
        }

        self.since_summary_secs += dt;
        if self.since_summary_secs >= self.config.summary_interval_secs {
            report.summary_due = true;
        }
        if report.summary_due {
            self.since_summary_secs = 0.0;
        }

        for event in &report.events {
            if self.recent.len() == RECENT_EVENTS {
                self.recent.pop_front();
            }
            self.recent.push_back(*event);
            self.event_count += 1;
        }
        report
    }

    fn check_frame(&self, sample: &SpikeSample, report: &mut TickReport) {
        let Some(elapsed_ms) = report.frame_ms else {
            return;
        };
        if !sample.on_primary_view || elapsed_ms < self.config.frame_spike_ms {
            return;
        }
        if self.frame_cooldown.try_fire() {
            report.events.push(SpikeEvent::FrameSpike {
                elapsed_ms,
                collections: report.collection_deltas,
            });
            if elapsed_ms > self.config.frame_flush_ms {
                report.summary_due = true;
            }
        }
    }

    fn check_memory(&self, report: &mut TickReport) {
        let alloc = report.allocation_delta;
        let ws = report.working_set_delta;

        if alloc >= self.config.allocation_flush_bytes
            || ws >= self.config.working_set_flush_bytes as i64
        {
            report.events.push(SpikeEvent::ForcedFlush {
                allocation_bytes: alloc,
                working_set_bytes: ws,
            });
            report.summary_due = true;
            report.reset_window = true;
            return;
        }

        if alloc >= self.config.allocation_spike_bytes && self.memory_cooldown.try_fire() {
            report
                .events
                .push(SpikeEvent::AllocationSpike { bytes: alloc });
        } else if ws >= self.config.working_set_spike_bytes as i64
            && self.memory_cooldown.try_fire()
        {
            report.events.push(SpikeEvent::WorkingSetSpike { bytes: ws as u64 });
        }
    }

    /// Most recent events, oldest first
    pub fn recent_events(&self) -> impl Iterator<Item = &SpikeEvent> {
        self.recent.iter()
    }

    /// Events raised since construction
    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn config(&self) -> &SpikeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1_000_000;

    fn sample(now_ms: u64, allocated: u64, ws: u64) -> SpikeSample {
        SpikeSample {
            now: Duration::from_millis(now_ms),
            allocated_bytes: allocated,
            working_set_bytes: ws,
            collections: [0; GENERATIONS],
            on_primary_view: true,
        }
    }

    fn detector() -> SpikeDetector {
        SpikeDetector::new(SpikeConfig::default())
    }

    #[test]
    fn test_cooldown_timer() {
        let timer = CooldownTimer::new(1.0);
        assert!(timer.try_fire());
        assert!(!timer.try_fire());
        timer.tick(0.6);
        assert!(!timer.try_fire());
        timer.tick(0.4);
        assert!(timer.try_fire());
        timer.tick(f64::NAN);
        assert!((timer.remaining_secs() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_first_tick_is_baseline_only() {
        let mut d = detector();
        let report = d.on_tick(0.016, sample(0, 500 * MB, 900 * MB));
        assert!(report.events.is_empty());
        assert_eq!(report.frame_ms, None);
        assert_eq!(report.allocation_delta, 0);
    }

    #[test]
    fn test_two_allocation_spikes_in_cooldown_yield_one_event() {
        let mut d = detector();
        d.on_tick(0.016, sample(0, 0, 0));
        let r1 = d.on_tick(0.016, sample(16, 30 * MB, 0));
        let r2 = d.on_tick(0.016, sample(32, 60 * MB, 0));

        assert_eq!(r1.events, vec![SpikeEvent::AllocationSpike { bytes: 30 * MB }]);
        assert!(r2.events.is_empty());
        assert_eq!(d.event_count(), 1);
        assert_eq!(d.recent_events().count(), 1);
    }

    #[test]
    fn test_allocation_spike_fires_again_after_cooldown() {
        let mut d = detector();
        d.on_tick(0.0, sample(0, 0, 0));
        d.on_tick(0.016, sample(16, 30 * MB, 0));
        // 5 seconds of quiet ticks
        d.on_tick(5.0, sample(5016, 30 * MB, 0));
        let report = d.on_tick(0.016, sample(5032, 60 * MB, 0));
        assert_eq!(report.events.len(), 1);
    }

    #[test]
    fn test_working_set_shares_memory_cooldown() {
        let mut d = detector();
        d.on_tick(0.0, sample(0, 0, 100 * MB));
        let r1 = d.on_tick(0.016, sample(16, 30 * MB, 100 * MB));
        let r2 = d.on_tick(0.016, sample(32, 30 * MB, 180 * MB));
        assert_eq!(r1.events.len(), 1);
        assert!(r2.events.is_empty(), "working set spike must wait for the shared cooldown");
    }

    #[test]
    fn test_working_set_spike() {
        let mut d = detector();
        d.on_tick(0.0, sample(0, 0, 100 * MB));
        let report = d.on_tick(0.016, sample(16, 0, 180 * MB));
        assert_eq!(report.events, vec![SpikeEvent::WorkingSetSpike { bytes: 80 * MB }]);
        assert_eq!(report.working_set_delta, 80 * MB as i64);
    }

    #[test]
    fn test_forced_flush_bypasses_cooldown() {
        let mut d = detector();
        d.on_tick(0.0, sample(0, 0, 0));
        d.on_tick(0.016, sample(16, 30 * MB, 0));
        let report = d.on_tick(0.016, sample(32, 190 * MB, 0));

        assert!(matches!(report.events[0], SpikeEvent::ForcedFlush { .. }));
        assert!(report.summary_due);
        assert!(report.reset_window);
    }

    #[test]
    fn test_frame_spike_only_on_primary_view() {
        let mut d = detector();
        d.on_tick(0.0, sample(0, 0, 0));

        let mut off_map = sample(80, 0, 0);
        off_map.on_primary_view = false;
        assert!(d.on_tick(0.08, off_map).events.is_empty());

        let report = d.on_tick(0.06, sample(140, 0, 0));
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].name(), "frame_spike");
        assert!(!report.summary_due);

        // Within the 1s cooldown
        assert!(d.on_tick(0.06, sample(200, 0, 0)).events.is_empty());
    }

    #[test]
    fn test_huge_frame_forces_summary() {
        let mut d = detector();
        d.on_tick(0.0, sample(0, 0, 0));
        let report = d.on_tick(0.25, sample(250, 0, 0));
        assert_eq!(report.events.len(), 1);
        assert!(report.summary_due);
        assert!(!report.reset_window);
    }

    #[test]
    fn test_summary_cadence() {
        let mut d = detector();
        let mut due = 0;
        // 16 ticks of 250ms = 4s -> two summaries at the 2s cadence
        for i in 0..16u64 {
            let mut s = sample(i * 250, 0, 0);
            s.on_primary_view = false;
            if d.on_tick(0.25, s).summary_due {
                due += 1;
            }
        }
        assert_eq!(due, 2);
    }

    #[test]
    fn test_disabled_detector_raises_nothing() {
        let config = SpikeConfig {
            enabled: false,
            ..SpikeConfig::default()
        };
        let mut d = SpikeDetector::new(config);
        d.on_tick(0.0, sample(0, 0, 0));
        let report = d.on_tick(0.5, sample(500, 400 * MB, 0));
        assert!(report.events.is_empty());
        assert_eq!(report.allocation_delta, 400 * MB);
    }

    #[test]
    fn test_event_display() {
        let text = SpikeEvent::AllocationSpike { bytes: 30 * MB }.to_string();
        assert_eq!(text, "allocation spike: 30.0MB since last tick");
    }
}
