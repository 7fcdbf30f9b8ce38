// Ranked burst breakdowns and the per-root ledger
//
// The breakdown keeps the top children by total time plus any child above a
// dynamic cutoff, so a burst with hundreds of cheap children still prints in
// a few lines while nothing expensive is hidden.

use super::tracker::{BurstEnd, ClosedBurst};
use crate::call_site::{CallSiteId, CallSiteRegistry};
use dashmap::DashMap;
use fnv::FnvBuildHasher;
use serde::Serialize;
use std::fmt::Write as _;

/// Ranking knobs for breakdowns
#[derive(Debug, Clone, Copy)]
pub struct BurstRanking {
    /// Children always listed, by descending total time
    pub top_children: usize,
    /// Absolute floor of the dynamic cutoff (ms)
    pub min_child_ms: f64,
    /// Fraction of the burst total forming the dynamic cutoff
    pub min_child_fraction: f64,
}

impl Default for BurstRanking {
    fn default() -> Self {
        Self {
            top_children: 8,
            min_child_ms: 0.5,
            min_child_fraction: 0.02,
        }
    }
}

impl BurstRanking {
    /// `max(min_child_ms, min_child_fraction * total)`
    pub fn cutoff_ms(&self, total_ms: f64) -> f64 {
        self.min_child_ms.max(self.min_child_fraction * total_ms)
    }
}

/// One listed child of a breakdown
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChildCost {
    pub call_site: CallSiteId,
    pub total_ms: f64,
    pub count: u64,
}

/// Ranked cost breakdown of one burst
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BurstBreakdown {
    pub root: CallSiteId,
    pub total_ms: f64,
    pub self_ms: f64,
    pub children: Vec<ChildCost>,
    /// Children that were neither top-ranked nor above the cutoff
    pub omitted_children: usize,
    pub omitted_ms: f64,
    pub end: BurstEnd,
}

impl BurstBreakdown {
    /// Rank a closed burst's children
    pub fn from_closed(closed: &ClosedBurst, ranking: &BurstRanking) -> Self {
        let mut children: Vec<ChildCost> = closed
            .children
            .iter()
            .map(|(id, agg)| ChildCost {
                call_site: *id,
                total_ms: agg.total_ms,
                count: agg.count,
            })
            .collect();
        children.sort_by(|a, b| {
            b.total_ms
                .partial_cmp(&a.total_ms)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.call_site.cmp(&b.call_site))
        });

        let cutoff = ranking.cutoff_ms(closed.total_ms);
        let mut listed = Vec::new();
        let mut omitted_children = 0;
        let mut omitted_ms = 0.0;
        for (rank, child) in children.into_iter().enumerate() {
            if rank < ranking.top_children || child.total_ms >= cutoff {
                listed.push(child);
            } else {
                omitted_children += 1;
                omitted_ms += child.total_ms;
            }
        }

        Self {
            root: closed.root,
            total_ms: closed.total_ms,
            self_ms: closed.self_ms(),
            children: listed,
            omitted_children,
            omitted_ms,
            end: closed.end,
        }
    }

    /// Multi-line human rendering with call-site names
    pub fn render(&self, registry: &CallSiteRegistry) -> String {
        let mut out = String::new();
        let tag = match self.end {
            BurstEnd::Completed => "",
            BurstEnd::Unwound => " [unwound]",
            BurstEnd::Abandoned => " [abandoned]",
        };
        let _ = writeln!(
            out,
            "burst {} total {:.2}ms self {:.2}ms{}",
            registry.display_name(self.root),
            self.total_ms,
            self.self_ms,
            tag
        );
        for child in &self.children {
            let _ = writeln!(
                out,
                "  {:<48} {:>9.2}ms x{}",
                registry.display_name(child.call_site),
                child.total_ms,
                child.count
            );
        }
        if self.omitted_children > 0 {
            let _ = writeln!(
                out,
                "  ... {} more children {:.2}ms",
                self.omitted_children, self.omitted_ms
            );
        }
        out
    }
}

/// Window aggregate for one burst root
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BurstRootStat {
    pub bursts: u64,
    pub total_ms: f64,
    pub max_ms: f64,
    pub self_ms: f64,
    pub unwound: u64,
}

/// Concurrent per-root aggregate, drained by the summary emitter
#[derive(Debug)]
pub struct BurstLedger {
    roots: DashMap<CallSiteId, BurstRootStat, FnvBuildHasher>,
}

impl BurstLedger {
    pub fn new() -> Self {
        Self {
            roots: DashMap::with_hasher(FnvBuildHasher::default()),
        }
    }

    pub fn record(&self, closed: &ClosedBurst) {
        let mut stat = self.roots.entry(closed.root).or_default();
        stat.bursts += 1;
        stat.total_ms += closed.total_ms;
        stat.max_ms = stat.max_ms.max(closed.total_ms);
        stat.self_ms += closed.self_ms();
        if closed.end != BurstEnd::Completed {
            stat.unwound += 1;
        }
    }

    pub fn get(&self, root: CallSiteId) -> Option<BurstRootStat> {
        self.roots.get(&root).map(|s| *s)
    }

    /// Take the `n` roots with the largest inclusive total and clear the window
    pub fn drain_top(&self, n: usize) -> Vec<(CallSiteId, BurstRootStat)> {
        let ids: Vec<CallSiteId> = self.roots.iter().map(|e| *e.key()).collect();
        let mut all: Vec<_> = ids
            .into_iter()
            .filter_map(|id| self.roots.remove(&id))
            .collect();
        all.sort_by(|a, b| {
            b.1.total_ms
                .partial_cmp(&a.1.total_ms)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        all.truncate(n);
        all
    }
}

impl Default for BurstLedger {
    fn default() -> Self {
        Self::new()
    }
}
