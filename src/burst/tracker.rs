// Call-depth tracking and burst lifecycle for one thread
//
// A burst opens when a periodic call site is entered with no burst open,
// collects the cost of calls completing exactly one level below the root,
// and closes when execution comes back to the root's depth.

use crate::call_site::CallSiteId;
use fnv::FnvHashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// How an instrumented call left
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Returned,
    Unwound,
}

/// How a burst ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BurstEnd {
    /// Root returned normally
    Completed,
    /// Root failed or panicked; breakdown emitted before state was cleared
    Unwound,
    /// Depth fell below the root without the root exiting cleanly
    Abandoned,
}

/// Aggregate cost of one direct child
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ChildAggregate {
    pub total_ms: f64,
    pub count: u64,
}

#[derive(Debug)]
struct OpenBurst {
    root: CallSiteId,
    root_depth: u32,
    children: FnvHashMap<CallSiteId, ChildAggregate>,
    child_total_ms: f64,
}

impl OpenBurst {
    fn new(root: CallSiteId, root_depth: u32) -> Self {
        Self {
            root,
            root_depth,
            children: FnvHashMap::default(),
            child_total_ms: 0.0,
        }
    }

    fn add_child(&mut self, id: CallSiteId, elapsed_ms: f64) {
        let child = self.children.entry(id).or_default();
        child.total_ms += elapsed_ms;
        child.count += 1;
        self.child_total_ms += elapsed_ms;
    }

    fn close(self, root_elapsed_ms: f64, end: BurstEnd) -> ClosedBurst {
        let total_ms = match end {
            BurstEnd::Abandoned => self.child_total_ms,
            BurstEnd::Completed | BurstEnd::Unwound => root_elapsed_ms,
        };
        ClosedBurst {
            root: self.root,
            total_ms,
            child_total_ms: self.child_total_ms,
            children: self.children.into_iter().collect(),
            end,
        }
    }
}

/// A burst that has just closed, before ranking
#[derive(Debug, Clone)]
pub struct ClosedBurst {
    pub root: CallSiteId,
    /// Root's inclusive elapsed time
    pub total_ms: f64,
    /// Sum of direct-child elapsed time
    pub child_total_ms: f64,
    pub children: Vec<(CallSiteId, ChildAggregate)>,
    pub end: BurstEnd,
}

impl ClosedBurst {
    /// Root's own cost: inclusive time minus direct children, never negative
    pub fn self_ms(&self) -> f64 {
        (self.total_ms - self.child_total_ms).max(0.0)
    }
}

/// Per-thread depth counter and (at most one) open burst
#[derive(Debug, Default)]
pub struct BurstTracker {
    depth: u32,
    open: Option<OpenBurst>,
}

impl BurstTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn root(&self) -> Option<CallSiteId> {
        self.open.as_ref().map(|b| b.root)
    }

    /// Enter an instrumented call and return its depth
    ///
    /// `may_open` is only consulted when `id` could root a burst, so the
    /// cooldown check stays off the common path.
    pub fn enter(&mut self, id: CallSiteId, may_open: impl FnOnce() -> bool) -> u32 {
        self.depth += 1;
        let depth = self.depth;
        if self.open.is_none() && id.is_periodic() && may_open() {
            self.open = Some(OpenBurst::new(id, depth));
        }
        depth
    }

    /// Leave the call entered at `depth`; returns the burst if this closed it
    pub fn exit(
        &mut self,
        id: CallSiteId,
        depth: u32,
        elapsed_ms: f64,
        kind: ExitKind,
    ) -> Option<ClosedBurst> {
        let open = self.open.as_ref().map(|b| (b.root, b.root_depth));
        let closed = match open {
            Some((_, root_depth)) if depth == root_depth + 1 => {
                if let Some(burst) = self.open.as_mut() {
                    burst.add_child(id, elapsed_ms);
                }
                None
            }
            Some((root, root_depth)) if depth == root_depth => {
                let end = match (root == id, kind) {
                    (false, _) => BurstEnd::Abandoned,
                    (true, ExitKind::Returned) => BurstEnd::Completed,
                    (true, ExitKind::Unwound) => BurstEnd::Unwound,
                };
                self.open.take().map(|b| b.close(elapsed_ms, end))
            }
            Some((_, root_depth)) if depth < root_depth => {
                self.open.take().map(|b| b.close(0.0, BurstEnd::Abandoned))
            }
            _ => None,
        };

        // Re-sync from the caller's depth so one lost exit cannot skew
        // every later call on this thread
        self.depth = depth.saturating_sub(1);
        closed
    }

    /// Close any open burst as abandoned and reset depth
    ///
    /// Only valid between instrumented calls, when nothing on this thread
    /// can still be inside the root.
    pub fn abandon(&mut self) -> Option<ClosedBurst> {
        self.depth = 0;
        self.open.take().map(|b| b.close(0.0, BurstEnd::Abandoned))
    }
}

/// Process-wide cooldown between burst openings
#[derive(Debug)]
pub struct BurstGate {
    cooldown_nanos: u64,
    next_open_nanos: AtomicU64,
}

impl BurstGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown_nanos: cooldown.as_nanos() as u64,
            next_open_nanos: AtomicU64::new(0),
        }
    }

    /// Claim the right to open a burst at `now`
    ///
    /// Only one caller wins per cooldown period, even when several threads
    /// race on the same boundary.
    pub fn try_acquire(&self, now: Duration) -> bool {
        let now = now.as_nanos() as u64;
        let mut next = self.next_open_nanos.load(Ordering::Acquire);
        loop {
            if now < next {
                return false;
            }
            match self.next_open_nanos.compare_exchange_weak(
                next,
                now.saturating_add(self.cooldown_nanos),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => next = observed,
            }
        }
    }
}
