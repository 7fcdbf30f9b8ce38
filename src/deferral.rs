//! Deferral of heavy periodic work into a time-sliced queue
//!
//! The governor never owns the host's scheduling. It hands jobs to a
//! [`WorkQueue`] when the queue says it may, and otherwise tells the caller
//! to run the work inline. Admission is best-effort: a full, gated or
//! blacklisted path always falls back to inline execution.
//!
//! A deferred job that fails (error or panic) is logged with its full error
//! chain and its call site is blacklisted: it is never deferred again.

use crate::call_site::CallSiteId;
use crate::clock::{elapsed_ms, Clock};
use crate::diagnostics::DiagnosticsSink;
use dashmap::DashMap;
use fnv::FnvBuildHasher;
use serde::Serialize;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Unit of deferred work
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Queue occupancy
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct QueueStats {
    pub len: usize,
    /// Age of the oldest queued job (ms)
    pub head_age_ms: Option<f64>,
    /// Age of the newest queued job (ms)
    pub tail_age_ms: Option<f64>,
}

/// Host-side work-slicing queue
pub trait WorkQueue: Send + Sync {
    /// Queue `job`, or hand it back if the queue is full or gated
    fn enqueue(&self, job: Job) -> Result<(), Job>;

    /// Run queued jobs until `budget_ms` is spent; returns jobs run
    fn pump(&self, budget_ms: f64) -> usize;

    fn may_enqueue_now(&self) -> bool;

    fn queue_stats(&self) -> QueueStats;
}

/// Bounded FIFO queue pumped against a time budget
///
/// At least one job runs per non-empty pump, so a job longer than the
/// budget cannot stall the queue.
pub struct SlicedWorkQueue {
    jobs: Mutex<VecDeque<(Duration, Job)>>,
    capacity: usize,
    clock: Arc<dyn Clock>,
    admission: AtomicBool,
    rejected: AtomicU64,
}

impl SlicedWorkQueue {
    /// # Panics
    ///
    /// Panics if capacity is 0
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        assert!(capacity > 0, "Capacity must be > 0");
        Self {
            jobs: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            clock,
            admission: AtomicBool::new(true),
            rejected: AtomicU64::new(0),
        }
    }

    /// Open or close admission (e.g. while the host is saving)
    pub fn set_admission(&self, open: bool) {
        self.admission.store(open, Ordering::Relaxed);
    }

    /// Jobs handed back since construction
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl std::fmt::Debug for SlicedWorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlicedWorkQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("rejected", &self.rejected())
            .finish()
    }
}

impl WorkQueue for SlicedWorkQueue {
    fn enqueue(&self, job: Job) -> Result<(), Job> {
        if !self.admission.load(Ordering::Relaxed) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(job);
        }
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        if jobs.len() >= self.capacity {
            drop(jobs);
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(job);
        }
        jobs.push_back((self.clock.now(), job));
        Ok(())
    }

    fn pump(&self, budget_ms: f64) -> usize {
        let start = self.clock.now();
        let mut ran = 0;
        loop {
            // Lock released before the job runs; jobs may enqueue
            let next = self
                .jobs
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some((_, job)) = next else {
                break;
            };
            job();
            ran += 1;
            if elapsed_ms(start, self.clock.now()) >= budget_ms {
                break;
            }
        }
        ran
    }

    fn may_enqueue_now(&self) -> bool {
        self.admission.load(Ordering::Relaxed) && self.len() < self.capacity
    }

    fn queue_stats(&self) -> QueueStats {
        let now = self.clock.now();
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        QueueStats {
            len: jobs.len(),
            head_age_ms: jobs.front().map(|(at, _)| elapsed_ms(*at, now)),
            tail_age_ms: jobs.back().map(|(at, _)| elapsed_ms(*at, now)),
        }
    }
}

/// Outcome of [`DeferralGate::run_or_defer`]
#[derive(Debug)]
pub enum Deferral {
    Queued,
    /// Ran on the caller's thread; carries the action's own result
    Inline(anyhow::Result<()>),
}

impl Deferral {
    pub fn is_queued(&self) -> bool {
        matches!(self, Deferral::Queued)
    }
}

/// Admission policy in front of a [`WorkQueue`]
pub struct DeferralGate {
    queue: Arc<dyn WorkQueue>,
    sink: Arc<dyn DiagnosticsSink>,
    blacklist: Arc<DashMap<CallSiteId, (), FnvBuildHasher>>,
    deferred: AtomicU64,
}

impl DeferralGate {
    pub fn new(queue: Arc<dyn WorkQueue>, sink: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            queue,
            sink,
            blacklist: Arc::new(DashMap::with_hasher(FnvBuildHasher::default())),
            deferred: AtomicU64::new(0),
        }
    }

    pub fn is_blacklisted(&self, id: CallSiteId) -> bool {
        self.blacklist.contains_key(&id)
    }

    pub fn blacklisted_count(&self) -> usize {
        self.blacklist.len()
    }

    /// Jobs queued since construction
    pub fn deferred(&self) -> u64 {
        self.deferred.load(Ordering::Relaxed)
    }

    pub fn queue(&self) -> &Arc<dyn WorkQueue> {
        &self.queue
    }

    /// Queue `action` for later, or run it now
    ///
    /// Blacklisted call sites and a queue refusing admission run inline, and
    /// the action's error is returned to the caller unchanged. If the queue
    /// rejects the job after admitting it, the job runs inline under the
    /// deferred failure policy.
    pub fn run_or_defer<F>(&self, id: CallSiteId, label: &str, action: F) -> Deferral
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        if self.is_blacklisted(id) || !self.queue.may_enqueue_now() {
            return Deferral::Inline(action());
        }

        let blacklist = Arc::clone(&self.blacklist);
        let sink = Arc::clone(&self.sink);
        let label = label.to_string();
        let job: Job = Box::new(move || {
            let failure = match panic::catch_unwind(AssertUnwindSafe(action)) {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err),
                Err(payload) => Some(anyhow::anyhow!("panicked: {}", panic_message(&*payload))),
            };
            if let Some(err) = failure {
                blacklist.insert(id, ());
                let err: &(dyn std::error::Error + 'static) = err.as_ref();
                sink.error(
                    &format!("deferred {label} failed and will no longer be deferred"),
                    err,
                );
            }
        });

        match self.queue.enqueue(job) {
            Ok(()) => {
                self.deferred.fetch_add(1, Ordering::Relaxed);
                Deferral::Queued
            }
            Err(job) => {
                job();
                Deferral::Inline(Ok(()))
            }
        }
    }

    pub fn pump(&self, budget_ms: f64) -> usize {
        self.queue.pump(budget_ms)
    }
}

impl std::fmt::Debug for DeferralGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferralGate")
            .field("stats", &self.queue.queue_stats())
            .field("blacklisted", &self.blacklisted_count())
            .field("deferred", &self.deferred())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
