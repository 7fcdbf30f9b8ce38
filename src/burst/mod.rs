// Burst attribution: separating a periodic operation's own cost from the
// cost of what it called.
//
// Wall-clock nesting does the heavy lifting: a direct child's elapsed time
// already includes its own descendants, so only calls completing exactly one
// level below the root are aggregated, and self-cost is the root's elapsed
// time minus that sum. Nothing is ever subtracted twice.
//
// Depth and burst state are per thread and per governor. They live in a
// thread-local list keyed by the owning governor's id, so two governors in
// one process (tests, embedded hosts) never see each other's state.

mod report;
mod tracker;

pub use report::{BurstBreakdown, BurstLedger, BurstRanking, BurstRootStat, ChildCost};
pub use tracker::{BurstEnd, BurstGate, BurstTracker, ChildAggregate, ClosedBurst, ExitKind};

use std::cell::RefCell;

thread_local! {
    static THREAD_TRACKERS: RefCell<Vec<(u64, BurstTracker)>> =
        const { RefCell::new(Vec::new()) };
}

/// Run `f` against this thread's tracker for governor `owner`
///
/// Returns `None` if the thread-local is being torn down or is already
/// borrowed further up this thread's stack.
pub(crate) fn with_thread_tracker<R>(owner: u64, f: impl FnOnce(&mut BurstTracker) -> R) -> Option<R> {
    THREAD_TRACKERS
        .try_with(|cell| {
            let mut trackers = cell.try_borrow_mut().ok()?;
            let index = match trackers.iter().position(|(id, _)| *id == owner) {
                Some(index) => index,
                None => {
                    trackers.push((owner, BurstTracker::new()));
                    trackers.len() - 1
                }
            };
            Some(f(&mut trackers[index].1))
        })
        .ok()
        .flatten()
}

/// Close a burst left open on this thread for `owner`
///
/// Touches an existing tracker only; a thread that never entered an
/// instrumented call gets no entry.
pub(crate) fn abandon_thread_burst(owner: u64) -> Option<ClosedBurst> {
    THREAD_TRACKERS
        .try_with(|cell| {
            let mut trackers = cell.try_borrow_mut().ok()?;
            let (_, tracker) = trackers.iter_mut().find(|(id, _)| *id == owner)?;
            tracker.abandon()
        })
        .ok()
        .flatten()
}

#[cfg(test)]
pub(crate) fn has_thread_tracker(owner: u64) -> bool {
    THREAD_TRACKERS
        .try_with(|cell| cell.borrow().iter().any(|(id, _)| *id == owner))
        .unwrap_or(false)
}

/// Forget this thread's tracker for `owner`
pub(crate) fn release_thread_tracker(owner: u64) {
    let _ = THREAD_TRACKERS.try_with(|cell| {
        if let Ok(mut trackers) = cell.try_borrow_mut() {
            trackers.retain(|(id, _)| *id != owner);
        }
    });
}
