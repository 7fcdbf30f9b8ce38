//! Periodic summary of the collectors
//!
//! The emitter is the only consumer that drains the timing collector,
//! burst ledger and allocation histogram; each summary covers exactly the
//! calls recorded since the previous one.

use crate::alloc_histogram::AllocationHistogram;
use crate::burst::{BurstLedger, BurstRootStat};
use crate::call_site::{CallSiteId, CallSiteRegistry};
use crate::config::SummaryConfig;
use crate::counters::GENERATIONS;
use crate::timing::{TimingCollector, TimingSnapshot};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallSiteSummary {
    pub call_site: CallSiteId,
    pub name: String,
    #[serde(flatten)]
    pub timing: TimingSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BurstRootSummary {
    pub root: CallSiteId,
    pub name: String,
    #[serde(flatten)]
    pub stat: BurstRootStat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocBandSummary {
    pub call_site: CallSiteId,
    pub name: String,
    pub band: String,
    pub total_bytes: u64,
    pub count: u64,
    pub total_elapsed_ms: f64,
    pub max_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryReport {
    /// Clock time of emission (seconds)
    pub emitted_at_secs: f64,
    /// Call sites with at least one sample this window
    pub active_call_sites: usize,
    /// Ranked by p95
    pub top_call_sites: Vec<CallSiteSummary>,
    /// Ranked by inclusive total
    pub top_burst_roots: Vec<BurstRootSummary>,
    pub collection_deltas: [u64; GENERATIONS],
    /// Ranked by total bytes
    pub top_alloc_bands: Vec<AllocBandSummary>,
    pub spike_events: u64,
}

impl SummaryReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "summary @{:.1}s: {} active call sites, collections {:?}, {} spike events",
            self.emitted_at_secs, self.active_call_sites, self.collection_deltas, self.spike_events
        );
        if !self.top_call_sites.is_empty() {
            let _ = writeln!(out, "  top call sites by p95:");
            for site in &self.top_call_sites {
                let _ = writeln!(
                    out,
                    "    {:<44} p95 {:>8.2}ms avg {:>8.2}ms max {:>8.2}ms n={}",
                    site.name, site.timing.p95_ms, site.timing.avg_ms, site.timing.max_ms, site.timing.count
                );
            }
        }
        if !self.top_burst_roots.is_empty() {
            let _ = writeln!(out, "  top burst roots:");
            for root in &self.top_burst_roots {
                let _ = writeln!(
                    out,
                    "    {:<44} total {:>9.2}ms self {:>9.2}ms max {:>8.2}ms x{}",
                    root.name, root.stat.total_ms, root.stat.self_ms, root.stat.max_ms, root.stat.bursts
                );
            }
        }
        if !self.top_alloc_bands.is_empty() {
            let _ = writeln!(out, "  top allocation bands:");
            for band in &self.top_alloc_bands {
                let _ = writeln!(
                    out,
                    "    {:<44} {:>10} {:>12} bytes x{}",
                    band.name, band.band, band.total_bytes, band.count
                );
            }
        }
        out
    }
}

/// Builds [`SummaryReport`]s from the collectors
#[derive(Debug, Clone)]
pub struct SummaryEmitter {
    config: SummaryConfig,
}

impl SummaryEmitter {
    pub fn new(config: SummaryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SummaryConfig {
        &self.config
    }

    /// Drain every collector into one report
    #[allow(clippy::too_many_arguments)]
    pub fn emit(
        &self,
        now_secs: f64,
        registry: &CallSiteRegistry,
        timing: &TimingCollector,
        bursts: &BurstLedger,
        allocations: &AllocationHistogram,
        collection_deltas: [u64; GENERATIONS],
        spike_events: u64,
    ) -> SummaryReport {
        let mut sites = timing.drain_window();
        let active_call_sites = sites.len();
        sites.sort_by(|a, b| {
            b.1.p95_ms
                .partial_cmp(&a.1.p95_ms)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        sites.truncate(self.config.top_call_sites);

        let top_call_sites = sites
            .into_iter()
            .map(|(id, timing)| CallSiteSummary {
                call_site: id,
                name: registry.display_name(id),
                timing,
            })
            .collect();

        let top_burst_roots = bursts
            .drain_top(self.config.top_burst_roots)
            .into_iter()
            .map(|(id, stat)| BurstRootSummary {
                root: id,
                name: registry.display_name(id),
                stat,
            })
            .collect();

        let top_alloc_bands = allocations
            .drain_top(self.config.top_alloc_bands)
            .into_iter()
            .map(|entry| AllocBandSummary {
                call_site: entry.call_site,
                name: registry.display_name(entry.call_site),
                band: entry.band.label(),
                total_bytes: entry.stat.total_bytes,
                count: entry.stat.count,
                total_elapsed_ms: entry.stat.total_elapsed_ms,
                max_bytes: entry.stat.max_bytes,
            })
            .collect();

        SummaryReport {
            emitted_at_secs: now_secs,
            active_call_sites,
            top_call_sites,
            top_burst_roots,
            collection_deltas,
            top_alloc_bands,
            spike_events,
        }
    }
}
