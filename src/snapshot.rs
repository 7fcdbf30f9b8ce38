//! Single-writer, multi-reader publication of the latest measurement window
//!
//! The writer swaps a freshly boxed [`Snapshot`] into an epoch-managed slot
//! and only then release-stores the `valid` flag. Readers acquire-load the
//! flag before touching the slot, so a reader that sees `valid` also sees
//! every field of the value written before it. Readers get a copy and never
//! hold a reference into the slot past their epoch guard.
//!
//! ```text
//! writer:  slot.swap(new, Release) ──► defer_destroy(old) ──► valid.store(true, Release)
//! reader:  valid.load(Acquire) ──► pin ──► slot.load(Acquire) ──► *copy*
//! ```

use crate::counters::GENERATIONS;
use crossbeam::epoch::{self, Atomic, Owned};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// What the host was doing when the window closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeTag {
    /// Primary (map) view, running
    Primary,
    /// Any other view, running
    Secondary,
    Paused,
    FastForward,
    /// The mode oracle could not answer
    #[default]
    Unknown,
}

/// Immutable summary of one measurement window
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Snapshot {
    /// Publication sequence number, starting at 1
    pub sequence: u64,
    /// Clock time of publication (seconds)
    pub published_at_secs: f64,
    /// Length of the window this snapshot covers (seconds)
    pub window_secs: f64,
    pub frame_count: u64,
    pub map_avg_ms: f64,
    pub map_max_ms: f64,
    pub ui_samples: u64,
    pub ui_avg_ms: f64,
    pub ui_max_ms: f64,
    pub world_samples: u64,
    pub avg_actors: f64,
    pub avg_objects: f64,
    pub avg_resources: f64,
    pub collection_deltas: [u64; GENERATIONS],
    pub working_set_bytes: u64,
    pub working_set_delta: i64,
    pub mode: ModeTag,
}

impl Snapshot {
    /// Age of this snapshot at `now_secs`
    pub fn age_secs(&self, now_secs: f64) -> f64 {
        (now_secs - self.published_at_secs).max(0.0)
    }
}

/// Lock-free cell holding the current snapshot
pub struct SnapshotPublisher {
    slot: Atomic<Snapshot>,
    valid: AtomicBool,
    sequence: AtomicU64,
}

impl SnapshotPublisher {
    pub fn new() -> Self {
        Self {
            slot: Atomic::null(),
            valid: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
        }
    }

    /// Store `value` as the current snapshot and return its sequence number
    ///
    /// The `sequence` field of `value` is overwritten.
    pub fn publish(&self, mut value: Snapshot) -> u64 {
        value.sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let guard = epoch::pin();
        let old = self.slot.swap(Owned::new(value), Ordering::AcqRel, &guard);
        if !old.is_null() {
            // SAFETY: `old` is unlinked from the slot; readers still pinned
            // in an earlier epoch keep it alive until they unpin.
            unsafe { guard.defer_destroy(old) };
        }
        self.valid.store(true, Ordering::Release);
        value.sequence
    }

    /// Copy of the current snapshot, or `None` if nothing is published yet
    pub fn try_read(&self) -> Option<Snapshot> {
        if !self.valid.load(Ordering::Acquire) {
            return None;
        }
        let guard = epoch::pin();
        let current = self.slot.load(Ordering::Acquire, &guard);
        // SAFETY: the pointer was loaded under `guard`, so it is not reclaimed
        // before the copy below completes.
        unsafe { current.as_ref() }.copied()
    }

    /// Mark the cell empty; readers see "no data yet" until the next publish
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    /// Snapshots published so far
    pub fn published(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

impl Default for SnapshotPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SnapshotPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotPublisher")
            .field("valid", &self.valid.load(Ordering::Relaxed))
            .field("published", &self.published())
            .finish()
    }
}

impl Drop for SnapshotPublisher {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no reader can hold a guard on the slot.
        unsafe {
            let guard = epoch::unprotected();
            let current = self.slot.swap(epoch::Shared::null(), Ordering::Relaxed, guard);
            if !current.is_null() {
                drop(current.into_owned());
            }
        }
    }
}
