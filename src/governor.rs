//! The governor context
//!
//! One [`Governor`] is built by the host's bootstrap, shared by reference
//! with every thread that runs instrumented calls, and shut down explicitly
//! (or on drop). It owns the collectors, the spike detector, the snapshot
//! publisher and the throttle families; the host owns the clock, counters,
//! mode oracle, diagnostics sink, latency switch and work queue and lends
//! them in through [`GovernorBuilder`].
//!
//! # Hot path
//!
//! ```text
//! before(id)  ──► clock.now, thread alloc baseline, depth++ (thread-local)
//! host call   ──► runs (or is vetoed by should_skip)
//! after(id)   ──► timing.record, allocations.record, depth-- / burst close
//! ```
//!
//! # Tick path
//!
//! ```text
//! on_tick(dt) ──► spike detector ──► window roll ──► publish snapshot
//!                                └─► summary (every 2s or forced)
//! ```

use crate::alloc_histogram::AllocationHistogram;
use crate::binding::{BindRequest, Binding, BindingResolver, BindingRole};
use crate::burst::{
    self, BurstBreakdown, BurstEnd, BurstGate, BurstLedger, BurstRanking, ClosedBurst, ExitKind,
};
use crate::call_site::{CallSiteId, CallSiteRegistry, PeriodicClassifier};
use crate::clock::{elapsed_ms, Clock, MonotonicClock};
use crate::config::GovernorConfig;
use crate::counters::{ProcessCounters, ResourceCounters, GENERATIONS};
use crate::deferral::{Deferral, DeferralGate, SlicedWorkQueue, WorkQueue};
use crate::diagnostics::{DiagnosticsSink, TracingSink};
use crate::error::{BindError, GovernorError, OracleError, Result};
use crate::oracle::{mode_tag, LatencyMode, ManualOracle, ModeOracle};
use crate::snapshot::{Snapshot, SnapshotPublisher};
use crate::spike::{SpikeDetector, SpikeSample, TickReport};
use crate::summary::{SummaryEmitter, SummaryReport};
use crate::throttle::{ThrottleController, ThrottleDecision};
use crate::timing::TimingCollector;
use crate::window::{FramePhase, WindowBaseline, WindowSampler, WorldSample};
use dashmap::DashMap;
use fnv::FnvBuildHasher;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

static NEXT_GOVERNOR_ID: AtomicU64 = AtomicU64::new(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-call state carried from `before` to `after`
///
/// Plain `Copy` data; a disabled governor hands out an inert state that
/// makes `after` a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallState {
    start: Duration,
    alloc_baseline: Option<u64>,
    depth: u32,
    armed: bool,
}

impl CallState {
    const INERT: CallState = CallState {
        start: Duration::ZERO,
        alloc_baseline: None,
        depth: 0,
        armed: false,
    };

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn start(&self) -> Duration {
        self.start
    }
}

/// RAII guard around one instrumented call
///
/// Dropping the guard without [`CallGuard::finish`] records a normal
/// return, or an unwind if the thread is panicking.
#[must_use = "dropping the guard immediately records a zero-length call"]
pub struct CallGuard<'g> {
    governor: &'g Governor,
    id: CallSiteId,
    state: CallState,
    done: bool,
}

impl CallGuard<'_> {
    pub fn finish(mut self) {
        self.done = true;
        self.governor.after(self.id, self.state);
    }

    /// Record a failed call and hand its error back
    pub fn fail<E>(mut self, error: E) -> E {
        self.done = true;
        self.governor.on_exception(self.id, self.state, error)
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            let kind = if std::thread::panicking() {
                ExitKind::Unwound
            } else {
                ExitKind::Returned
            };
            self.governor.exit(self.id, self.state, kind);
        }
    }
}

/// Outcome of [`Governor::bind`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct BindReport {
    pub bound: Vec<(CallSiteId, Binding)>,
    #[serde(skip)]
    pub failed: Vec<BindError>,
    pub disabled_families: Vec<String>,
}

#[derive(Debug, Default)]
struct PendingSummary {
    collections: [u64; GENERATIONS],
    spike_events: u64,
}

/// Assembles a [`Governor`] from host collaborators
pub struct GovernorBuilder {
    config: GovernorConfig,
    clock: Option<Arc<dyn Clock>>,
    counters: Option<Arc<dyn ResourceCounters>>,
    oracle: Option<Arc<dyn ModeOracle>>,
    sink: Option<Arc<dyn DiagnosticsSink>>,
    latency: Option<Arc<dyn LatencyMode>>,
    queue: Option<Arc<dyn WorkQueue>>,
}

impl GovernorBuilder {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            clock: None,
            counters: None,
            oracle: None,
            sink: None,
            latency: None,
            queue: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn counters(mut self, counters: Arc<dyn ResourceCounters>) -> Self {
        self.counters = Some(counters);
        self
    }

    pub fn oracle(mut self, oracle: Arc<dyn ModeOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn latency_mode(mut self, latency: Arc<dyn LatencyMode>) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Replace the bundled [`SlicedWorkQueue`]
    pub fn work_queue(mut self, queue: Arc<dyn WorkQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Validate, build and switch on the governor
    ///
    /// # Errors
    ///
    /// Returns [`GovernorError::InvalidConfig`] for a configuration that
    /// fails validation, or [`GovernorError::LatencyMode`] if low-latency
    /// mode was requested and could not be switched on. In both cases no
    /// global state is left changed.
    pub fn install(self) -> Result<Governor> {
        let config = self.config;
        config.validate().map_err(GovernorError::InvalidConfig)?;
        let classifier = PeriodicClassifier::new(&config.burst.periodic_patterns)
            .map_err(|e| GovernorError::InvalidConfig(format!("{e:#}")))?;

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let counters: Arc<dyn ResourceCounters> =
            self.counters.unwrap_or_else(|| Arc::new(ProcessCounters::new()));
        let oracle: Arc<dyn ModeOracle> = self.oracle.unwrap_or_else(|| Arc::new(ManualOracle::new()));
        let sink: Arc<dyn DiagnosticsSink> = self.sink.unwrap_or_else(|| Arc::new(TracingSink));

        let deferral = config.deferral.enabled.then(|| {
            let queue = self.queue.unwrap_or_else(|| {
                Arc::new(SlicedWorkQueue::new(config.deferral.capacity, Arc::clone(&clock)))
            });
            DeferralGate::new(queue, Arc::clone(&sink))
        });

        let throttles = config
            .throttle
            .families
            .iter()
            .cloned()
            .map(|family| {
                ThrottleController::new(
                    family,
                    config.throttle.reevaluate_secs,
                    config.throttle.snapshot_max_age_secs,
                )
            })
            .collect();

        let now = clock.now();
        let baseline = WindowBaseline {
            collections: counters.collection_counts(),
            working_set_bytes: counters.working_set_bytes(),
        };

        // Last fallible step: nothing after this can fail, so a successful
        // switch never needs undoing here
        let latency_restore = match (self.latency, config.latency.low_latency) {
            (Some(mode), true) => {
                let previous = mode.is_low_latency();
                if let Err(e) = mode.set_low_latency(true) {
                    let _ = mode.set_low_latency(previous);
                    return Err(GovernorError::LatencyMode(format!("{e:#}")));
                }
                Some((mode, previous))
            }
            (None, true) => {
                sink.warn("low-latency mode requested but the host provided no switch");
                None
            }
            _ => None,
        };

        let governor = Governor {
            id: NEXT_GOVERNOR_ID.fetch_add(1, Ordering::Relaxed),
            enabled: AtomicBool::new(config.enabled),
            shut_down: AtomicBool::new(false),
            registry: CallSiteRegistry::new(classifier),
            timing: TimingCollector::new(),
            allocations: AllocationHistogram::new(),
            bursts: BurstLedger::new(),
            burst_gate: BurstGate::new(Duration::from_secs_f64(config.burst.cooldown_secs)),
            ranking: BurstRanking {
                top_children: config.burst.top_children,
                min_child_ms: config.burst.min_child_ms,
                min_child_fraction: config.burst.min_child_fraction,
            },
            spikes: Mutex::new(SpikeDetector::new(config.spike.clone())),
            window: Mutex::new(WindowSampler::new(config.window.interval_secs, now, baseline)),
            publisher: SnapshotPublisher::new(),
            throttles,
            deferral,
            summary: SummaryEmitter::new(config.summary.clone()),
            pending: Mutex::new(PendingSummary::default()),
            last_summary: Mutex::new(None),
            last_burst: Mutex::new(None),
            bindings: DashMap::with_hasher(FnvBuildHasher::default()),
            bind_failures: Mutex::new(HashSet::new()),
            oracle_fault_logged: AtomicBool::new(false),
            latency_restore: Mutex::new(latency_restore),
            clock,
            counters,
            oracle,
            sink,
            config,
        };

        tracing::debug!(
            id = governor.id,
            families = governor.throttles.len(),
            deferral = governor.deferral.is_some(),
            "governor installed"
        );
        Ok(governor)
    }
}

/// In-process performance governor
pub struct Governor {
    id: u64,
    config: GovernorConfig,
    enabled: AtomicBool,
    shut_down: AtomicBool,
    clock: Arc<dyn Clock>,
    counters: Arc<dyn ResourceCounters>,
    oracle: Arc<dyn ModeOracle>,
    sink: Arc<dyn DiagnosticsSink>,
    registry: CallSiteRegistry,
    timing: TimingCollector,
    allocations: AllocationHistogram,
    bursts: BurstLedger,
    burst_gate: BurstGate,
    ranking: BurstRanking,
    spikes: Mutex<SpikeDetector>,
    window: Mutex<WindowSampler>,
    publisher: SnapshotPublisher,
    throttles: Vec<ThrottleController>,
    deferral: Option<DeferralGate>,
    summary: SummaryEmitter,
    pending: Mutex<PendingSummary>,
    last_summary: Mutex<Option<SummaryReport>>,
    last_burst: Mutex<Option<BurstBreakdown>>,
    bindings: DashMap<CallSiteId, BindingRole, FnvBuildHasher>,
    bind_failures: Mutex<HashSet<String>>,
    oracle_fault_logged: AtomicBool,
    latency_restore: Mutex<Option<(Arc<dyn LatencyMode>, bool)>>,
}

impl Governor {
    /// Install with default collaborators
    pub fn install(config: GovernorConfig) -> Result<Self> {
        GovernorBuilder::new(config).install()
    }

    pub fn builder(config: GovernorConfig) -> GovernorBuilder {
        GovernorBuilder::new(config)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn registry(&self) -> &CallSiteRegistry {
        &self.registry
    }

    pub fn timing(&self) -> &TimingCollector {
        &self.timing
    }

    pub fn allocations(&self) -> &AllocationHistogram {
        &self.allocations
    }

    pub fn publisher(&self) -> &SnapshotPublisher {
        &self.publisher
    }

    pub fn deferral(&self) -> Option<&DeferralGate> {
        self.deferral.as_ref()
    }

    /// Intern a call site
    pub fn call_site(&self, scope: &str, name: &str) -> CallSiteId {
        self.registry.intern(scope, name)
    }

    // ---- binding -------------------------------------------------------

    /// Resolve the host's bind requests
    ///
    /// Each failure is logged once per target and disables only what it
    /// belonged to: a failed throttled target disables its family, a failed
    /// timed or deferrable target is simply not instrumented.
    ///
    /// # Errors
    ///
    /// [`GovernorError::NothingBound`] if there were requests and none bound.
    pub fn bind(&self, requests: &[BindRequest], resolver: &dyn BindingResolver) -> Result<BindReport> {
        let mut report = BindReport::default();
        for request in requests {
            match resolver.resolve(request) {
                Ok(binding) => {
                    let id = self.registry.intern(&binding.scope, &binding.name);
                    if let BindingRole::Throttled(family) = &binding.role {
                        if self.throttle(family).is_none() {
                            self.warn_bind_once(
                                &request.target(),
                                &format!("{} names unknown throttle family '{family}'", request.target()),
                            );
                        }
                    }
                    self.bindings.insert(id, binding.role.clone());
                    report.bound.push((id, binding));
                }
                Err(err) => {
                    self.warn_bind_once(err.target(), &format!("{err}; instrumentation skipped"));
                    if let BindingRole::Throttled(family) = &request.role {
                        if let Some(controller) = self.throttle(family) {
                            if controller.is_enabled() {
                                controller.set_enabled(false);
                                self.sink
                                    .warn(&format!("throttle family '{family}' disabled: {err}"));
                                report.disabled_families.push(family.clone());
                            }
                        }
                    }
                    report.failed.push(err);
                }
            }
        }

        if !requests.is_empty() && report.bound.is_empty() {
            return Err(GovernorError::NothingBound {
                failed: report.failed.len(),
            });
        }
        Ok(report)
    }

    fn warn_bind_once(&self, target: &str, message: &str) {
        if lock(&self.bind_failures).insert(target.to_string()) {
            self.sink.warn(message);
        }
    }

    /// Role a call site was bound with
    pub fn binding_role(&self, id: CallSiteId) -> Option<BindingRole> {
        self.bindings.get(&id).map(|r| r.clone())
    }

    // ---- interception --------------------------------------------------

    /// Start an instrumented call
    pub fn before(&self, id: CallSiteId) -> CallState {
        if !self.is_enabled() {
            return CallState::INERT;
        }
        let start = self.clock.now();
        let depth = if self.config.burst.enabled {
            burst::with_thread_tracker(self.id, |tracker| {
                tracker.enter(id, || self.burst_gate.try_acquire(start))
            })
            .unwrap_or(0)
        } else {
            0
        };
        CallState {
            start,
            alloc_baseline: self.counters.thread_allocated_bytes(),
            depth,
            armed: true,
        }
    }

    /// Finish an instrumented call that returned normally
    pub fn after(&self, id: CallSiteId, state: CallState) {
        self.exit(id, state, ExitKind::Returned);
    }

    /// Finish an instrumented call that failed; returns `error` unchanged
    pub fn on_exception<E>(&self, id: CallSiteId, state: CallState, error: E) -> E {
        self.exit(id, state, ExitKind::Unwound);
        error
    }

    fn exit(&self, id: CallSiteId, state: CallState, kind: ExitKind) {
        // Calls armed before shutdown must not re-create released state
        if !state.armed || self.is_shut_down() {
            return;
        }
        let elapsed = elapsed_ms(state.start, self.clock.now());
        self.timing.record(id, elapsed);

        if let (Some(before), Some(after)) = (state.alloc_baseline, self.counters.thread_allocated_bytes()) {
            self.allocations.record(id, after.saturating_sub(before), elapsed);
        }

        if state.depth > 0 {
            let closed = burst::with_thread_tracker(self.id, |tracker| {
                tracker.exit(id, state.depth, elapsed, kind)
            })
            .flatten();
            if let Some(closed) = closed {
                self.close_burst(&closed);
            }
        }
    }

    fn close_burst(&self, closed: &ClosedBurst) {
        self.bursts.record(closed);
        let breakdown = BurstBreakdown::from_closed(closed, &self.ranking);
        match closed.end {
            BurstEnd::Completed => {
                if breakdown.total_ms >= self.config.burst.log_min_total_ms {
                    self.sink.info(breakdown.render(&self.registry).trim_end());
                }
            }
            BurstEnd::Unwound | BurstEnd::Abandoned => {
                self.sink.warn(breakdown.render(&self.registry).trim_end());
            }
        }
        *lock(&self.last_burst) = Some(breakdown);
    }

    /// Start a guarded call
    pub fn enter(&self, id: CallSiteId) -> CallGuard<'_> {
        CallGuard {
            governor: self,
            id,
            state: self.before(id),
            done: false,
        }
    }

    /// Run `f` as an instrumented call
    pub fn instrument<R>(&self, id: CallSiteId, f: impl FnOnce() -> R) -> R {
        let guard = self.enter(id);
        let result = f();
        guard.finish();
        result
    }

    /// Run a fallible `f` as an instrumented call; its error is returned unchanged
    pub fn instrument_fallible<T, E>(
        &self,
        id: CallSiteId,
        f: impl FnOnce() -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E> {
        let guard = self.enter(id);
        match f() {
            Ok(value) => {
                guard.finish();
                Ok(value)
            }
            Err(error) => Err(guard.fail(error)),
        }
    }

    /// Run `f` as its binding says
    ///
    /// A site bound `Throttled` runs unless its family skips this
    /// invocation; any other or absent binding always runs.
    pub fn instrument_bound<R>(&self, id: CallSiteId, f: impl FnOnce() -> R) -> Option<R> {
        let skip = match self.bindings.get(&id).as_deref() {
            Some(BindingRole::Throttled(family)) => self.should_skip(family),
            _ => false,
        };
        if skip {
            return None;
        }
        Some(self.instrument(id, f))
    }

    /// Run `f` unless `family` says this invocation should be skipped
    pub fn instrument_throttled<R>(
        &self,
        id: CallSiteId,
        family: &str,
        f: impl FnOnce() -> R,
    ) -> Option<R> {
        if self.should_skip(family) {
            return None;
        }
        Some(self.instrument(id, f))
    }

    /// Queue heavy work for a later `pump`, or run it now
    ///
    /// A site bound with any role other than `Deferrable` always runs
    /// inline; unbound sites may defer.
    pub fn defer<F>(&self, id: CallSiteId, action: F) -> Deferral
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let deferrable = self
            .bindings
            .get(&id)
            .map_or(true, |role| matches!(*role, BindingRole::Deferrable));
        match &self.deferral {
            Some(gate) if deferrable && self.is_enabled() => {
                gate.run_or_defer(id, &self.registry.display_name(id), action)
            }
            _ => Deferral::Inline(action()),
        }
    }

    /// Run deferred work for up to `budget_ms`
    pub fn pump_deferred(&self, budget_ms: f64) -> usize {
        self.deferral.as_ref().map_or(0, |gate| gate.pump(budget_ms))
    }

    // ---- throttling ----------------------------------------------------

    pub fn throttle(&self, family: &str) -> Option<&ThrottleController> {
        self.throttles.iter().find(|t| t.name() == family)
    }

    /// Should this invocation of `family` be skipped?
    ///
    /// Unknown and disabled families never skip.
    pub fn should_skip(&self, family: &str) -> bool {
        if !self.is_enabled() || !self.config.throttle.enabled {
            return false;
        }
        let Some(controller) = self.throttle(family) else {
            return false;
        };
        controller.should_skip(
            self.clock.now_secs(),
            || self.publisher.try_read(),
            || self.user_interacting(),
        )
    }

    fn user_interacting(&self) -> std::result::Result<bool, OracleError> {
        self.oracle
            .user_is_interacting()
            .inspect_err(|e| self.oracle_fault(e))
    }

    fn oracle_fault(&self, err: &OracleError) {
        if !self.oracle_fault_logged.swap(true, Ordering::Relaxed) {
            self.sink
                .error("mode oracle failed; throttling suspended while it fails", err);
        }
    }

    /// Current decision of every family
    pub fn throttle_decisions(&self) -> Vec<(String, ThrottleDecision)> {
        self.throttles
            .iter()
            .map(|t| (t.name().to_string(), t.decision()))
            .collect()
    }

    /// Feed a resource-count estimate to `family`'s hard cap
    ///
    /// Returns `true` once per crossing; the host then runs its safety
    /// action (e.g. releasing an oversized cache).
    pub fn observe_resource(&self, family: &str, estimate: f64) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let fired = self
            .throttle(family)
            .is_some_and(|t| t.observe_resource(estimate));
        if fired {
            self.sink.warn(&format!(
                "{family}: resource estimate {estimate:.0} crossed the hard cap"
            ));
        }
        fired
    }

    // ---- window and tick -----------------------------------------------

    pub fn record_phase(&self, phase: FramePhase, elapsed_ms: f64) {
        if self.is_enabled() {
            lock(&self.window).record_phase(phase, elapsed_ms);
        }
    }

    pub fn record_world(&self, sample: WorldSample) {
        if self.is_enabled() {
            lock(&self.window).record_world(sample);
        }
    }

    /// Host tick: spike detection, window publication and summaries
    ///
    /// Must be called outside any instrumented call. A burst still open on
    /// the ticking thread lost its root's exit and is closed as abandoned.
    pub fn on_tick(&self, dt: f64) -> TickReport {
        if !self.is_enabled() {
            return TickReport::default();
        }
        if self.config.burst.enabled {
            if let Some(closed) = burst::abandon_thread_burst(self.id) {
                self.close_burst(&closed);
            }
        }
        let now = self.clock.now();
        let collections = self.counters.collection_counts();
        let working_set_bytes = self.counters.working_set_bytes();
        let on_primary_view = match self.oracle.is_on_primary_view() {
            Ok(on) => on,
            Err(e) => {
                self.oracle_fault(&e);
                true
            }
        };
        let sample = SpikeSample {
            now,
            allocated_bytes: self.counters.allocated_bytes(),
            working_set_bytes,
            collections,
            on_primary_view,
        };

        let report = lock(&self.spikes).on_tick(dt, sample);
        for event in &report.events {
            self.sink.warn(&event.to_string());
        }
        {
            let mut pending = lock(&self.pending);
            for (total, delta) in pending.collections.iter_mut().zip(report.collection_deltas) {
                *total += delta;
            }
            pending.spike_events += report.events.len() as u64;
        }

        let rolled = {
            let mut window = lock(&self.window);
            window.record_frame();
            (report.reset_window || window.is_due(now)).then(|| {
                let current = WindowBaseline {
                    collections,
                    working_set_bytes,
                };
                window.roll(now, current, mode_tag(self.oracle.as_ref()))
            })
        };
        if let Some(snapshot) = rolled {
            self.publish(snapshot);
        }

        if report.summary_due {
            self.emit_summary();
        }
        if let Some(gate) = &self.deferral {
            gate.pump(self.config.deferral.pump_budget_ms);
        }
        report
    }

    fn publish(&self, snapshot: Snapshot) {
        let sequence = self.publisher.publish(snapshot);
        tracing::debug!(
            sequence,
            frames = snapshot.frame_count,
            map_avg_ms = snapshot.map_avg_ms,
            ui_avg_ms = snapshot.ui_avg_ms,
            "snapshot published"
        );
    }

    /// Latest published snapshot
    pub fn last_snapshot(&self) -> Option<Snapshot> {
        self.publisher.try_read()
    }

    /// Drain the collectors into a summary now
    pub fn emit_summary(&self) -> SummaryReport {
        let pending = std::mem::take(&mut *lock(&self.pending));
        let report = self.summary.emit(
            self.clock.now_secs(),
            &self.registry,
            &self.timing,
            &self.bursts,
            &self.allocations,
            pending.collections,
            pending.spike_events,
        );
        if self.summary.config().log {
            self.sink.info(report.render().trim_end());
        }
        *lock(&self.last_summary) = Some(report.clone());
        report
    }

    pub fn last_summary(&self) -> Option<SummaryReport> {
        lock(&self.last_summary).clone()
    }

    pub fn last_burst(&self) -> Option<BurstBreakdown> {
        lock(&self.last_burst).clone()
    }

    /// Spike events raised since install
    pub fn spike_event_count(&self) -> u64 {
        lock(&self.spikes).event_count()
    }

    // ---- lifecycle -----------------------------------------------------

    /// Stop instrumenting and restore any global toggle changed at install
    ///
    /// Idempotent; also runs on drop. Only the calling thread's burst state
    /// is released here; other threads' state goes when those threads exit.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.enabled.store(false, Ordering::Relaxed);
        if let Some((mode, previous)) = lock(&self.latency_restore).take() {
            if let Err(e) = mode.set_low_latency(previous) {
                let err: &(dyn std::error::Error + 'static) = e.as_ref();
                self.sink.error("failed to restore latency mode", err);
            }
        }
        burst::release_thread_tracker(self.id);
        tracing::debug!(id = self.id, "governor shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl Drop for Governor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Governor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Governor")
            .field("id", &self.id)
            .field("enabled", &self.is_enabled())
            .field("call_sites", &self.registry.len())
            .field("families", &self.throttles.len())
            .field("snapshots", &self.publisher.published())
            .finish()
    }
}
