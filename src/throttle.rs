//! Adaptive throttling of expensive operation families
//!
//! Each family (UI redraw, world-view redraw, ...) carries a sticky decision:
//! whether it is throttled and the skip-cadence N. The decision is computed
//! from the latest published snapshot at most once per re-evaluation period
//! and held fixed in between, so a noisy cost signal cannot make the
//! cadence flap from frame to frame.
//!
//! # Mapping
//!
//! | Average cost        | Skip-N                                 |
//! |---------------------|----------------------------------------|
//! | below `low_ms`      | 0 (never skip)                         |
//! | `low_ms`..`high_ms` | linear `min_skip`..`max_skip`, rounded |
//! | `high_ms` and above | `max_skip`                             |
//!
//! Every call bumps the family counter (wrapping at 1e9 back to 1) and is
//! skipped unless `counter % N == 0`.

use crate::config::{CostMetric, ThrottleFamilyConfig};
use crate::error::OracleError;
use crate::snapshot::Snapshot;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// The per-family call counter wraps back to 1 here
pub const COUNTER_WRAP: u64 = 1_000_000_000;

const ACTIVE_BIT: u64 = 1 << 32;

/// Sticky throttle decision of one family
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ThrottleDecision {
    pub active: bool,
    /// 0 means never skip
    pub skip_every_n: u32,
    /// Clock time of the next re-evaluation (seconds)
    pub next_evaluation_secs: f64,
}

impl ThrottleDecision {
    fn pack(active: bool, skip_every_n: u32) -> u64 {
        if active {
            ACTIVE_BIT | u64::from(skip_every_n)
        } else {
            u64::from(skip_every_n)
        }
    }

    fn unpack(bits: u64, next_evaluation_secs: f64) -> Self {
        Self {
            active: bits & ACTIVE_BIT != 0,
            skip_every_n: (bits & u64::from(u32::MAX)) as u32,
            next_evaluation_secs,
        }
    }
}

/// Map an average cost onto a skip-cadence
///
/// # Arguments
///
/// * `avg_ms` - Observed average cost
/// * `low_ms` / `high_ms` - Cost range mapped onto `min_skip..=max_skip`
///
/// # Returns
///
/// 0 below `low_ms` (and for NaN), `max_skip` at or above `high_ms`,
/// otherwise the linear interpolation rounded to nearest. Monotonic
/// non-decreasing in `avg_ms`.
pub fn linear_skip(avg_ms: f64, low_ms: f64, high_ms: f64, min_skip: u32, max_skip: u32) -> u32 {
    if avg_ms.is_nan() || avg_ms < low_ms {
        return 0;
    }
    if avg_ms >= high_ms || high_ms <= low_ms {
        return max_skip;
    }
    let fraction = (avg_ms - low_ms) / (high_ms - low_ms);
    let span = f64::from(max_skip.saturating_sub(min_skip));
    let n = (f64::from(min_skip) + fraction * span).round() as u32;
    n.clamp(min_skip, max_skip.max(min_skip))
}

/// Cost figure of `snapshot` watched by `metric`
pub fn metric_value(metric: CostMetric, snapshot: &Snapshot) -> f64 {
    match metric {
        CostMetric::MapCost => snapshot.map_avg_ms,
        CostMetric::UiCost => snapshot.ui_avg_ms,
    }
}

/// Throttle state of one operation family
#[derive(Debug)]
pub struct ThrottleController {
    config: ThrottleFamilyConfig,
    reevaluate_secs: f64,
    snapshot_max_age_secs: f64,
    enabled: AtomicBool,
    decision: AtomicU64,
    next_evaluation_bits: AtomicU64,
    counter: AtomicU64,
    skipped: AtomicU64,
    cap_armed: AtomicBool,
}

impl ThrottleController {
    pub fn new(config: ThrottleFamilyConfig, reevaluate_secs: f64, snapshot_max_age_secs: f64) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            config,
            reevaluate_secs,
            snapshot_max_age_secs,
            decision: AtomicU64::new(0),
            next_evaluation_bits: AtomicU64::new(f64::NEG_INFINITY.to_bits()),
            counter: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            cap_armed: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ThrottleFamilyConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Disabling also clears the held decision
    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::Relaxed);
        if !on {
            self.decision.store(0, Ordering::Release);
        }
    }

    pub fn decision(&self) -> ThrottleDecision {
        ThrottleDecision::unpack(
            self.decision.load(Ordering::Acquire),
            f64::from_bits(self.next_evaluation_bits.load(Ordering::Acquire)),
        )
    }

    /// Invocations skipped so far
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Decide from one snapshot, ignoring the cadence
    ///
    /// A missing or stale snapshot, or an oracle that cannot answer, gives an
    /// inactive decision.
    pub fn evaluate(
        &self,
        now_secs: f64,
        snapshot: Option<&Snapshot>,
        interacting: Result<bool, OracleError>,
    ) -> (bool, u32) {
        let Some(snapshot) = snapshot else {
            return (false, 0);
        };
        if snapshot.age_secs(now_secs) > self.snapshot_max_age_secs {
            return (false, 0);
        }
        let Ok(interacting) = interacting else {
            return (false, 0);
        };

        let cost = metric_value(self.config.metric, snapshot);
        if interacting || !(cost > self.config.threshold_ms) {
            return (false, 0);
        }
        let n = linear_skip(
            cost,
            self.config.low_ms,
            self.config.high_ms,
            self.config.min_skip,
            self.config.max_skip,
        );
        (n > 0, n)
    }

    /// Re-evaluate if the cadence boundary has passed
    ///
    /// Only the thread that advances the boundary computes the new decision;
    /// `snapshot` and `interacting` are not called otherwise.
    pub fn maybe_reevaluate(
        &self,
        now_secs: f64,
        snapshot: impl FnOnce() -> Option<Snapshot>,
        interacting: impl FnOnce() -> Result<bool, OracleError>,
    ) -> bool {
        let current = self.next_evaluation_bits.load(Ordering::Acquire);
        if now_secs < f64::from_bits(current) {
            return false;
        }
        let next = (now_secs + self.reevaluate_secs).to_bits();
        if self
            .next_evaluation_bits
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let snapshot = snapshot();
        let (active, n) = self.evaluate(now_secs, snapshot.as_ref(), interacting());
        let previous_bits = self
            .decision
            .swap(ThrottleDecision::pack(active, n), Ordering::AcqRel);
        let previous = ThrottleDecision::unpack(previous_bits, 0.0);
        if previous.active != active || previous.skip_every_n != n {
            tracing::debug!(
                family = %self.config.name,
                active,
                skip_every_n = n,
                "throttle decision changed"
            );
        }
        true
    }

    /// Count one invocation and report whether it should be skipped
    ///
    /// # Algorithm
    ///
    /// 1. Disabled family: never skip
    /// 2. Re-evaluate the sticky decision if the boundary passed
    /// 3. Bump the wrapping counter; skip unless `counter % N == 0`
    pub fn should_skip(
        &self,
        now_secs: f64,
        snapshot: impl FnOnce() -> Option<Snapshot>,
        interacting: impl FnOnce() -> Result<bool, OracleError>,
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.maybe_reevaluate(now_secs, snapshot, interacting);

        let counter = self.bump_counter();
        let decision = ThrottleDecision::unpack(self.decision.load(Ordering::Acquire), 0.0);
        if !decision.active || decision.skip_every_n == 0 {
            return false;
        }
        let skip = counter % u64::from(decision.skip_every_n) != 0;
        if skip {
            self.skipped.fetch_add(1, Ordering::Relaxed);
        }
        skip
    }

    fn bump_counter(&self) -> u64 {
        let step = |c: u64| if c >= COUNTER_WRAP { 1 } else { c + 1 };
        match self
            .counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| Some(step(c)))
        {
            Ok(previous) | Err(previous) => step(previous),
        }
    }

    /// Feed a resource-count estimate; `true` exactly once per crossing
    ///
    /// The safety action re-arms when the estimate drops back below the cap.
    pub fn observe_resource(&self, estimate: f64) -> bool {
        let Some(cap) = self.config.resource_hard_cap else {
            return false;
        };
        if estimate >= cap {
            self.cap_armed.swap(false, Ordering::AcqRel)
        } else {
            self.cap_armed.store(true, Ordering::Release);
            false
        }
    }

    #[cfg(test)]
    fn set_counter(&self, value: u64) {
        self.counter.store(value, Ordering::Relaxed);
    }
}
