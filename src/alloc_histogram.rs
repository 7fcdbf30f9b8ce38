//! Per-call-site allocation histogram
//!
//! Answers "where did the big allocations come from" with bounded memory:
//! each call site keeps at most [`MAX_BANDS_PER_SITE`] magnitude bands, and
//! when a new band would exceed that the band holding the fewest bytes is
//! evicted. The whole map is drained at every summary.

use crate::call_site::CallSiteId;
use dashmap::DashMap;
use fnv::FnvBuildHasher;
use serde::Serialize;

/// Ascending upper thresholds (bytes) of the bounded bands
pub const BAND_THRESHOLDS: [u64; 8] = [
    4 * 1024,
    64 * 1024,
    256 * 1024,
    1024 * 1024,
    4 * 1024 * 1024,
    16 * 1024 * 1024,
    64 * 1024 * 1024,
    256 * 1024 * 1024,
];

/// Live bands allowed per call site
pub const MAX_BANDS_PER_SITE: usize = 8;

/// Magnitude band: index into [`BAND_THRESHOLDS`], or the open top band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AllocBand(u8);

impl AllocBand {
    /// Band whose threshold is the smallest one ≥ `bytes`
    pub fn for_bytes(bytes: u64) -> Self {
        let index = BAND_THRESHOLDS
            .iter()
            .position(|&limit| bytes <= limit)
            .unwrap_or(BAND_THRESHOLDS.len());
        AllocBand(index as u8)
    }

    /// Upper bound in bytes, `None` for the open top band
    pub fn upper_bytes(self) -> Option<u64> {
        BAND_THRESHOLDS.get(self.0 as usize).copied()
    }

    pub fn is_open_top(self) -> bool {
        self.upper_bytes().is_none()
    }

    /// Human label, e.g. `<=64KiB` or `>256MiB`
    pub fn label(self) -> String {
        match self.upper_bytes() {
            Some(limit) => format!("<={}", format_bytes(limit)),
            None => format!(">{}", format_bytes(BAND_THRESHOLDS[BAND_THRESHOLDS.len() - 1])),
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{}MiB", bytes / MIB)
    } else if bytes >= KIB && bytes % KIB == 0 {
        format!("{}KiB", bytes / KIB)
    } else {
        format!("{}B", bytes)
    }
}

/// Aggregate for one (call site, band)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct AllocBucketStat {
    pub total_bytes: u64,
    pub count: u64,
    pub total_elapsed_ms: f64,
    pub max_bytes: u64,
}

impl AllocBucketStat {
    fn add(&mut self, bytes: u64, elapsed_ms: f64) {
        self.total_bytes = self.total_bytes.saturating_add(bytes);
        self.count += 1;
        self.total_elapsed_ms += elapsed_ms;
        self.max_bytes = self.max_bytes.max(bytes);
    }
}

/// Bands of one call site, capped at [`MAX_BANDS_PER_SITE`]
#[derive(Debug, Clone, Default)]
pub struct SiteBands {
    bands: Vec<(AllocBand, AllocBucketStat)>,
}

impl SiteBands {
    fn record(&mut self, band: AllocBand, bytes: u64, elapsed_ms: f64) {
        match self.bands.iter_mut().find(|(b, _)| *b == band) {
            Some((_, stat)) => stat.add(bytes, elapsed_ms),
            None => {
                let mut stat = AllocBucketStat::default();
                stat.add(bytes, elapsed_ms);
                self.bands.push((band, stat));
                self.evict_to_cap();
            }
        }
    }

    fn evict_to_cap(&mut self) {
        while self.bands.len() > MAX_BANDS_PER_SITE {
            let smallest = self
                .bands
                .iter()
                .enumerate()
                .min_by_key(|(_, (_, stat))| stat.total_bytes)
                .map(|(i, _)| i);
            match smallest {
                Some(i) => {
                    self.bands.swap_remove(i);
                }
                None => break,
            }
        }
    }

    pub fn bands(&self) -> &[(AllocBand, AllocBucketStat)] {
        &self.bands
    }

    pub fn get(&self, band: AllocBand) -> Option<&AllocBucketStat> {
        self.bands.iter().find(|(b, _)| *b == band).map(|(_, s)| s)
    }
}

/// One drained histogram cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AllocBandEntry {
    pub call_site: CallSiteId,
    pub band: AllocBand,
    pub stat: AllocBucketStat,
}

/// Concurrent call-site → bands map
#[derive(Debug)]
pub struct AllocationHistogram {
    sites: DashMap<CallSiteId, SiteBands, FnvBuildHasher>,
}

impl AllocationHistogram {
    pub fn new() -> Self {
        Self {
            sites: DashMap::with_hasher(FnvBuildHasher::default()),
        }
    }

    /// Attribute `bytes` allocated during a call lasting `elapsed_ms`
    pub fn record(&self, id: CallSiteId, bytes: u64, elapsed_ms: f64) {
        if bytes == 0 || !elapsed_ms.is_finite() || elapsed_ms < 0.0 {
            return;
        }
        let band = AllocBand::for_bytes(bytes);
        self.sites
            .entry(id)
            .or_default()
            .record(band, bytes, elapsed_ms);
    }

    /// Copy of one site's bands
    pub fn site(&self, id: CallSiteId) -> Option<SiteBands> {
        self.sites.get(&id).map(|s| s.clone())
    }

    /// Remove every site's bands and return them flattened
    pub fn drain(&self) -> Vec<AllocBandEntry> {
        let ids: Vec<CallSiteId> = self.sites.iter().map(|e| *e.key()).collect();
        let mut out = Vec::new();
        for id in ids {
            if let Some((call_site, bands)) = self.sites.remove(&id) {
                out.extend(bands.bands.into_iter().map(|(band, stat)| AllocBandEntry {
                    call_site,
                    band,
                    stat,
                }));
            }
        }
        out
    }

    /// Drain and keep the `n` cells with the most bytes
    pub fn drain_top(&self, n: usize) -> Vec<AllocBandEntry> {
        let mut all = self.drain();
        all.sort_by(|a, b| b.stat.total_bytes.cmp(&a.stat.total_bytes));
        all.truncate(n);
        all
    }

    pub fn site_count(&self) -> usize {
        self.sites.len()
    }
}

impl Default for AllocationHistogram {
    fn default() -> Self {
        Self::new()
    }
}
