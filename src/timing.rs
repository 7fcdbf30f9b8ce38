//! Per-call-site timing statistics
//!
//! Every instrumented call lands here through [`TimingCollector::record`].
//! Each site keeps a running sum/max/count plus a fixed ring of the last
//! [`RING_CAPACITY`] samples, so memory per site is bounded no matter how hot
//! the site is. The ring is what p95 is computed from: an approximation over
//! the most recent samples of the window, not over the whole window.

use crate::call_site::CallSiteId;
use dashmap::DashMap;
use fnv::FnvBuildHasher;
use serde::Serialize;

/// Samples retained per call site for percentile estimation
pub const RING_CAPACITY: usize = 128;

/// Samples above this are clock anomalies, not measurements (one hour)
const MAX_PLAUSIBLE_MS: f64 = 3_600_000.0;

/// Windowed timing aggregate for one call site
#[derive(Debug, Clone)]
pub struct TimingStat {
    sum_ms: f64,
    max_ms: f64,
    count: u64,
    ring: Box<[f64; RING_CAPACITY]>,
    cursor: usize,
}

/// Point-in-time view of a [`TimingStat`]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TimingSnapshot {
    pub avg_ms: f64,
    pub max_ms: f64,
    pub p95_ms: f64,
    pub count: u64,
}

impl TimingStat {
    pub fn new() -> Self {
        Self {
            sum_ms: 0.0,
            max_ms: 0.0,
            count: 0,
            ring: Box::new([0.0; RING_CAPACITY]),
            cursor: 0,
        }
    }

    /// Fold one sample in; returns `false` if the sample was rejected
    #[inline]
    pub fn record(&mut self, elapsed_ms: f64) -> bool {
        if !is_plausible(elapsed_ms) {
            return false;
        }

        self.sum_ms += elapsed_ms;
        if elapsed_ms > self.max_ms {
            self.max_ms = elapsed_ms;
        }
        self.count += 1;
        self.ring[self.cursor] = elapsed_ms;
        self.cursor = (self.cursor + 1) % RING_CAPACITY;
        true
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum_ms(&self) -> f64 {
        self.sum_ms
    }

    pub fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_ms / self.count as f64
        }
    }

    pub fn max_ms(&self) -> f64 {
        self.max_ms
    }

    /// Samples of the current window still held by the ring
    fn retained(&self) -> &[f64] {
        let n = (self.count as usize).min(RING_CAPACITY);
        &self.ring[..n]
    }

    /// 95th percentile over the retained samples
    ///
    /// Index rule: `floor(n * 0.95) - 1`, clamped to `[0, n - 1]`.
    pub fn p95_ms(&self) -> f64 {
        let mut sorted = self.retained().to_vec();
        percentile_95(&mut sorted)
    }

    pub fn snapshot(&self) -> TimingSnapshot {
        TimingSnapshot {
            avg_ms: self.avg_ms(),
            max_ms: self.max_ms,
            p95_ms: self.p95_ms(),
            count: self.count,
        }
    }

    /// Take the window's figures and start a new window
    ///
    /// Sum, max and count are zeroed; the ring is left as scratch and is
    /// overwritten from the start by the next window.
    pub fn snapshot_and_reset(&mut self) -> TimingSnapshot {
        let snapshot = self.snapshot();
        self.sum_ms = 0.0;
        self.max_ms = 0.0;
        self.count = 0;
        self.cursor = 0;
        snapshot
    }
}

impl Default for TimingStat {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn is_plausible(elapsed_ms: f64) -> bool {
    elapsed_ms.is_finite() && (0.0..=MAX_PLAUSIBLE_MS).contains(&elapsed_ms)
}

/// p95 of `samples` by the floor-and-clamp rule; sorts in place
pub fn percentile_95(samples: &mut [f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = samples.len();
    let index = ((n as f64 * 0.95).floor() as isize - 1).clamp(0, n as isize - 1);
    samples[index as usize]
}

/// Concurrent call-site → [`TimingStat`] map
///
/// Keys are never removed; window resets only clear values.
#[derive(Debug)]
pub struct TimingCollector {
    stats: DashMap<CallSiteId, TimingStat, FnvBuildHasher>,
}

impl TimingCollector {
    pub fn new() -> Self {
        Self {
            stats: DashMap::with_hasher(FnvBuildHasher::default()),
        }
    }

    /// Record one sample for `id`; malformed samples are dropped silently
    #[inline]
    pub fn record(&self, id: CallSiteId, elapsed_ms: f64) {
        if !is_plausible(elapsed_ms) {
            return;
        }
        if let Some(mut stat) = self.stats.get_mut(&id) {
            stat.record(elapsed_ms);
            return;
        }
        self.stats.entry(id).or_default().record(elapsed_ms);
    }

    /// Current window for `id` without resetting it
    pub fn peek(&self, id: CallSiteId) -> Option<TimingSnapshot> {
        self.stats.get(&id).map(|s| s.snapshot())
    }

    /// Take and reset the window for `id`; unknown ids yield an empty snapshot
    pub fn snapshot_and_reset(&self, id: CallSiteId) -> TimingSnapshot {
        self.stats
            .get_mut(&id)
            .map(|mut s| s.snapshot_and_reset())
            .unwrap_or_default()
    }

    /// Take and reset every site that saw samples this window
    pub fn drain_window(&self) -> Vec<(CallSiteId, TimingSnapshot)> {
        let mut out = Vec::new();
        for mut entry in self.stats.iter_mut() {
            if entry.count() > 0 {
                let id = *entry.key();
                out.push((id, entry.value_mut().snapshot_and_reset()));
            }
        }
        out
    }

    /// Number of call sites ever observed
    pub fn site_count(&self) -> usize {
        self.stats.len()
    }
}

impl Default for TimingCollector {
    fn default() -> Self {
        Self::new()
    }
}
