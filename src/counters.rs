//! Allocation, collection and working-set counters
//!
//! The spike detector and the interception hooks only see these numbers
//! through [`ResourceCounters`]. [`ProcessCounters`] is the production
//! implementation: allocation totals come from [`CountingAllocator`] (which
//! the host opts into with `#[global_allocator]`), the working set from
//! `/proc/self/statm`, and collection counts from whatever the host reports
//! through [`ProcessCounters::record_collection`].
//!
//! ```ignore
//! #[global_allocator]
//! static ALLOC: regulador::counters::CountingAllocator = regulador::counters::CountingAllocator::new();
//! ```

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Number of collection generations tracked
pub const GENERATIONS: usize = 3;

static TOTAL_ALLOCATED: AtomicU64 = AtomicU64::new(0);
static ALLOCATOR_INSTALLED: AtomicBool = AtomicBool::new(false);

thread_local! {
    static THREAD_ALLOCATED: Cell<u64> = const { Cell::new(0) };
}

/// Global allocator wrapper that counts allocated bytes
///
/// Keeps a process-wide total and a per-thread total. The per-thread total
/// is the baseline the `before` hook captures so that `after` can compute
/// the bytes allocated by one call.
pub struct CountingAllocator;

impl CountingAllocator {
    pub const fn new() -> Self {
        Self
    }

    #[inline]
    fn count(size: usize) {
        TOTAL_ALLOCATED.fetch_add(size as u64, Ordering::Relaxed);
        // try_with: the slot may already be gone during thread teardown
        let _ = THREAD_ALLOCATED.try_with(|c| c.set(c.get().wrapping_add(size as u64)));
        if !ALLOCATOR_INSTALLED.load(Ordering::Relaxed) {
            ALLOCATOR_INSTALLED.store(true, Ordering::Relaxed);
        }
    }
}

impl Default for CountingAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: delegates every operation to `System`; the counters are plain
// atomics and a const-initialized thread-local `Cell` that never allocates.
unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        Self::count(layout.size());
        // SAFETY: same layout contract as our caller
        unsafe { System.alloc(layout) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        Self::count(layout.size());
        // SAFETY: same layout contract as our caller
        unsafe { System.alloc_zeroed(layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if new_size > layout.size() {
            Self::count(new_size - layout.size());
        }
        // SAFETY: ptr was allocated by System with `layout`
        unsafe { System.realloc(ptr, layout, new_size) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: ptr was allocated by System with `layout`
        unsafe { System.dealloc(ptr, layout) }
    }
}

/// Process-wide bytes allocated through [`CountingAllocator`]
pub fn total_allocated_bytes() -> u64 {
    TOTAL_ALLOCATED.load(Ordering::Relaxed)
}

/// Bytes allocated by the calling thread through [`CountingAllocator`]
pub fn thread_allocated_bytes() -> u64 {
    THREAD_ALLOCATED.try_with(Cell::get).unwrap_or(0)
}

/// Whether [`CountingAllocator`] has served at least one allocation
pub fn allocator_installed() -> bool {
    ALLOCATOR_INSTALLED.load(Ordering::Relaxed)
}

/// Resource counters sampled by the governor
pub trait ResourceCounters: Send + Sync {
    /// Cumulative bytes allocated by the process
    fn allocated_bytes(&self) -> u64;

    /// Cumulative bytes allocated by the calling thread, if tracked
    fn thread_allocated_bytes(&self) -> Option<u64>;

    /// Cumulative collection counts per generation
    fn collection_counts(&self) -> [u64; GENERATIONS];

    /// Current resident working set in bytes
    fn working_set_bytes(&self) -> u64;
}

/// Production counters for the current process
#[derive(Debug, Default)]
pub struct ProcessCounters {
    collections: [AtomicU64; GENERATIONS],
}

impl ProcessCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host reports that a collection (arena reset, pool sweep, ...) ran
    pub fn record_collection(&self, generation: usize) {
        if let Some(counter) = self.collections.get(generation) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl ResourceCounters for ProcessCounters {
    fn allocated_bytes(&self) -> u64 {
        total_allocated_bytes()
    }

    fn thread_allocated_bytes(&self) -> Option<u64> {
        allocator_installed().then(thread_allocated_bytes)
    }

    fn collection_counts(&self) -> [u64; GENERATIONS] {
        [
            self.collections[0].load(Ordering::Relaxed),
            self.collections[1].load(Ordering::Relaxed),
            self.collections[2].load(Ordering::Relaxed),
        ]
    }

    fn working_set_bytes(&self) -> u64 {
        read_resident_bytes().unwrap_or(0)
    }
}

/// Resident set size from `/proc/self/statm` (Linux only, `None` elsewhere)
fn read_resident_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    // SAFETY: sysconf has no preconditions
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return None;
    }
    Some(resident_pages * page_size as u64)
}

/// Counters whose values are set by hand (simulator and tests)
#[derive(Debug, Default)]
pub struct ManualCounters {
    allocated: AtomicU64,
    working_set: AtomicU64,
    collections: [AtomicU64; GENERATIONS],
}

impl ManualCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_allocated(&self, bytes: u64) {
        self.allocated.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn set_working_set(&self, bytes: u64) {
        self.working_set.store(bytes, Ordering::Relaxed);
    }

    pub fn add_collection(&self, generation: usize) {
        if let Some(counter) = self.collections.get(generation) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl ResourceCounters for ManualCounters {
    fn allocated_bytes(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    fn thread_allocated_bytes(&self) -> Option<u64> {
        Some(self.allocated.load(Ordering::Relaxed))
    }

    fn collection_counts(&self) -> [u64; GENERATIONS] {
        [
            self.collections[0].load(Ordering::Relaxed),
            self.collections[1].load(Ordering::Relaxed),
            self.collections[2].load(Ordering::Relaxed),
        ]
    }

    fn working_set_bytes(&self) -> u64 {
        self.working_set.load(Ordering::Relaxed)
    }
}
