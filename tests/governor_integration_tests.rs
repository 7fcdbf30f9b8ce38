//! End-to-end tests of the governor through its public hooks
//!
//! Each test drives a governor the way a host would: manual clock,
//! hand-set counters and oracle, and a recording diagnostics sink.

use regulador::binding::{BindRequest, BindingRole, StaticResolver};
use regulador::burst::BurstEnd;
use regulador::clock::ManualClock;
use regulador::config::GovernorConfig;
use regulador::counters::ManualCounters;
use regulador::deferral::Deferral;
use regulador::diagnostics::{Level, RecordingSink};
use regulador::governor::Governor;
use regulador::oracle::ManualOracle;
use regulador::window::FramePhase;
use regulador::GovernorError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const WORLD: &str = "world_view_redraw";
const UI: &str = "ui_redraw";

struct Host {
    clock: Arc<ManualClock>,
    counters: Arc<ManualCounters>,
    oracle: Arc<ManualOracle>,
    sink: Arc<RecordingSink>,
    governor: Governor,
}

fn host(config: GovernorConfig) -> Host {
    let clock = Arc::new(ManualClock::new());
    let counters = Arc::new(ManualCounters::new());
    let oracle = Arc::new(ManualOracle::new());
    let sink = Arc::new(RecordingSink::new());
    let governor = Governor::builder(config)
        .clock(clock.clone())
        .counters(counters.clone())
        .oracle(oracle.clone())
        .sink(sink.clone())
        .install()
        .unwrap();
    Host {
        clock,
        counters,
        oracle,
        sink,
        governor,
    }
}

/// Run one-second frames with the given map cost until a window rolls
fn run_window(h: &Host, map_ms: f64) {
    for _ in 0..3 {
        h.governor.record_phase(FramePhase::Map, map_ms);
        h.clock.advance_ms(1_000.0);
        h.governor.on_tick(1.0);
    }
}

#[test]
fn test_burst_self_cost_through_before_after() {
    let h = host(GovernorConfig::default());
    let daily = h.governor.call_site("Economy", "daily_tick");
    let market = h.governor.call_site("Market", "update");
    let pops = h.governor.call_site("Pops", "grow");
    h.clock.advance_ms(1_000.0);

    let root = h.governor.before(daily);
    h.clock.advance_ms(2.0);
    let child = h.governor.before(market);
    h.clock.advance_ms(3.0);
    h.governor.after(market, child);
    let child = h.governor.before(pops);
    h.clock.advance_ms(2.0);
    h.governor.after(pops, child);
    h.clock.advance_ms(3.0);
    h.governor.after(daily, root);

    let burst = h.governor.last_burst().unwrap();
    assert_eq!(burst.end, BurstEnd::Completed);
    assert_eq!(burst.total_ms, 10.0);
    assert_eq!(burst.self_ms, 5.0);
    assert_eq!(burst.children.len(), 2);
    assert_eq!(burst.children[0].call_site, market);
    assert_eq!(burst.children[0].total_ms, 3.0);
}

#[test]
fn test_grandchildren_are_not_subtracted_twice() {
    let h = host(GovernorConfig::default());
    let daily = h.governor.call_site("Economy", "daily_tick");
    let market = h.governor.call_site("Market", "update");
    let prices = h.governor.call_site("Market", "reprice");
    h.clock.advance_ms(1_000.0);

    h.governor.instrument(daily, || {
        h.clock.advance_ms(1.0);
        h.governor.instrument(market, || {
            h.clock.advance_ms(2.0);
            h.governor.instrument(prices, || h.clock.advance_ms(4.0));
        });
    });

    let burst = h.governor.last_burst().unwrap();
    assert_eq!(burst.total_ms, 7.0);
    assert_eq!(burst.self_ms, 1.0);
    assert_eq!(burst.children.len(), 1);
    assert_eq!(burst.children[0].total_ms, 6.0);
}

#[test]
fn test_non_periodic_root_never_opens_a_burst() {
    let h = host(GovernorConfig::default());
    let update = h.governor.call_site("Market", "update");
    h.clock.advance_ms(1_000.0);
    h.governor.instrument(update, || h.clock.advance_ms(30.0));
    assert!(h.governor.last_burst().is_none());
    assert_eq!(h.governor.timing().peek(update).unwrap().max_ms, 30.0);
}

#[test]
fn test_instrument_fallible_passes_error_through() {
    let h = host(GovernorConfig::default());
    let id = h.governor.call_site("Save", "write");
    let result: Result<(), String> = h.governor.instrument_fallible(id, || {
        h.clock.advance_ms(2.0);
        Err("disk full".to_string())
    });
    assert_eq!(result, Err("disk full".to_string()));
    assert_eq!(h.governor.timing().peek(id).unwrap().count, 1);
}

#[test]
fn test_throttle_engages_from_published_snapshot() {
    let h = host(GovernorConfig::default());
    run_window(&h, 30.0);

    let snapshot = h.governor.last_snapshot().unwrap();
    assert_eq!(snapshot.sequence, 1);
    assert_eq!(snapshot.map_avg_ms, 30.0);

    // 30ms maps to round(2 + 20/30 * 2) = 3: every third call runs
    let pattern: Vec<bool> = (0..6).map(|_| h.governor.should_skip(WORLD)).collect();
    assert_eq!(pattern, vec![true, true, false, true, true, false]);

    let decision = h.governor.throttle(WORLD).unwrap().decision();
    assert!(decision.active);
    assert_eq!(decision.skip_every_n, 3);
    assert_eq!(decision.next_evaluation_secs, 5.5);

    // UI cost was never recorded
    assert!(!h.governor.should_skip(UI));
}

#[test]
fn test_throttle_decision_holds_until_reevaluation() {
    let h = host(GovernorConfig::default());
    run_window(&h, 30.0);
    assert!(h.governor.should_skip(WORLD));

    // Two cheap frames: no new window yet, and before the 5.5s boundary
    for _ in 0..2 {
        h.governor.record_phase(FramePhase::Map, 1.0);
        h.clock.advance_ms(1_000.0);
        h.governor.on_tick(1.0);
        h.governor.should_skip(WORLD);
    }
    assert!(h.governor.throttle(WORLD).unwrap().decision().active);

    // Third cheap frame rolls a cheap window at 6.0s, past the boundary
    h.governor.record_phase(FramePhase::Map, 1.0);
    h.clock.advance_ms(1_000.0);
    h.governor.on_tick(1.0);
    assert!(!h.governor.should_skip(WORLD));
    assert!(!h.governor.throttle(WORLD).unwrap().decision().active);
}

#[test]
fn test_user_interaction_suppresses_throttling() {
    let h = host(GovernorConfig::default());
    run_window(&h, 35.0);
    h.oracle.set_interacting(true);
    for _ in 0..8 {
        assert!(!h.governor.should_skip(WORLD));
    }
    assert_eq!(h.governor.throttle(WORLD).unwrap().skipped(), 0);
}

#[test]
fn test_stale_snapshot_never_throttles() {
    let h = host(GovernorConfig::default());
    run_window(&h, 35.0);
    // Nothing rolls while the host stops ticking
    h.clock.advance_ms(10_000.0);
    for _ in 0..6 {
        assert!(!h.governor.should_skip(WORLD));
    }
}

#[test]
fn test_bind_failure_disables_only_its_family() {
    let h = host(GovernorConfig::default());
    let resolver = StaticResolver::new()
        .with_target("Ui", "redraw")
        .with_target("Economy", "daily_tick");
    let requests = [
        BindRequest::new("Economy", "daily_tick", BindingRole::Timed),
        BindRequest::new("Ui", "redraw", BindingRole::Throttled(UI.into())),
        BindRequest::new("WorldView", "redraw", BindingRole::Throttled(WORLD.into())),
    ];

    let report = h.governor.bind(&requests, &resolver).unwrap();
    assert_eq!(report.bound.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.disabled_families, vec![WORLD.to_string()]);
    assert!(!h.governor.throttle(WORLD).unwrap().is_enabled());
    assert!(h.governor.throttle(UI).unwrap().is_enabled());

    // Binding again does not repeat the warning
    h.governor.bind(&requests, &resolver).unwrap();
    assert_eq!(h.sink.count_matching(Level::Warn, "instrumentation skipped"), 1);

    run_window(&h, 40.0);
    for _ in 0..6 {
        assert!(!h.governor.should_skip(WORLD));
    }
}

#[test]
fn test_bind_nothing_is_an_error() {
    let h = host(GovernorConfig::default());
    let resolver = StaticResolver::new().with_incompatible("Ui", "redraw");
    let requests = [
        BindRequest::new("Ui", "redraw", BindingRole::Timed),
        BindRequest::new("Nowhere", "tick", BindingRole::Timed),
    ];
    let err = h.governor.bind(&requests, &resolver).unwrap_err();
    assert!(matches!(err, GovernorError::NothingBound { failed: 2 }));
}

#[test]
fn test_ambiguous_bind_is_reported() {
    let h = host(GovernorConfig::default());
    let resolver = StaticResolver::new()
        .with_target("Ui", "redraw")
        .with_target("WorldView", "redraw")
        .with_target("Economy", "daily_tick");
    let requests = [
        BindRequest::new("", "redraw", BindingRole::Timed),
        BindRequest::new("Economy", "daily_tick", BindingRole::Timed),
    ];
    let report = h.governor.bind(&requests, &resolver).unwrap();
    assert_eq!(report.bound.len(), 1);
    assert_eq!(h.sink.count_matching(Level::Warn, "ambiguous"), 1);
}

#[test]
fn test_leaked_root_does_not_block_later_bursts() {
    let h = host(GovernorConfig::default());
    let daily = h.governor.call_site("Economy", "daily_tick");
    let market = h.governor.call_site("Market", "update");
    h.clock.advance_ms(1_000.0);

    // The host lost the root's `after`
    let _lost = h.governor.before(daily);
    h.governor.instrument(market, || h.clock.advance_ms(3.0));
    h.governor.on_tick(0.016);
    assert_eq!(h.governor.last_burst().unwrap().end, BurstEnd::Abandoned);
    assert_eq!(h.sink.count_matching(Level::Warn, "[abandoned]"), 1);

    for _ in 0..5 {
        h.clock.advance_ms(1_000.0);
        h.governor.instrument(daily, || {
            h.clock.advance_ms(2.0);
            h.governor.instrument(market, || h.clock.advance_ms(3.0));
        });
        h.governor.on_tick(0.016);

        let burst = h.governor.last_burst().unwrap();
        assert_eq!(burst.root, daily);
        assert_eq!(burst.end, BurstEnd::Completed);
        assert_eq!(burst.total_ms, 5.0);
        assert_eq!(burst.self_ms, 2.0);
    }
    assert_eq!(h.sink.count_matching(Level::Warn, "[abandoned]"), 1);
}

#[test]
fn test_bound_role_drives_throttling() {
    let h = host(GovernorConfig::default());
    let resolver = StaticResolver::new()
        .with_target("WorldView", "redraw")
        .with_target("Market", "update");
    let requests = [
        BindRequest::new("WorldView", "redraw", BindingRole::Throttled(WORLD.into())),
        BindRequest::new("Market", "update", BindingRole::Timed),
    ];
    h.governor.bind(&requests, &resolver).unwrap();
    let world = h.governor.call_site("WorldView", "redraw");
    let market = h.governor.call_site("Market", "update");

    run_window(&h, 30.0);
    let ran: Vec<bool> = (0..6)
        .map(|_| h.governor.instrument_bound(world, || ()).is_some())
        .collect();
    assert_eq!(ran, vec![false, false, true, false, false, true]);
    assert_eq!(h.governor.timing().peek(world).unwrap().count, 2);

    // Timed sites are never vetoed
    for _ in 0..6 {
        assert!(h.governor.instrument_bound(market, || ()).is_some());
    }
}

#[test]
fn test_site_bound_without_deferral_runs_inline() {
    let h = host(GovernorConfig::default());
    let resolver = StaticResolver::new()
        .with_target("Economy", "daily_tick")
        .with_target("Trade", "rebuild_routes");
    let requests = [
        BindRequest::new("Economy", "daily_tick", BindingRole::Timed),
        BindRequest::new("Trade", "rebuild_routes", BindingRole::Deferrable),
    ];
    h.governor.bind(&requests, &resolver).unwrap();
    let daily = h.governor.call_site("Economy", "daily_tick");
    let routes = h.governor.call_site("Trade", "rebuild_routes");
    let runs = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&runs);
    let outcome = h.governor.defer(daily, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    assert!(matches!(outcome, Deferral::Inline(Ok(()))));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let counter = Arc::clone(&runs);
    assert!(h
        .governor
        .defer(routes, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .is_queued());
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_deferred_work_runs_on_pump() {
    let h = host(GovernorConfig::default());
    let id = h.governor.call_site("Trade", "rebuild_routes");
    let runs = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&runs);
    let outcome = h.governor.defer(id, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    assert!(outcome.is_queued());
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    assert_eq!(h.governor.pump_deferred(5.0), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_failing_deferred_site_runs_inline_afterwards() {
    let h = host(GovernorConfig::default());
    let id = h.governor.call_site("Trade", "rebuild_routes");

    h.governor.defer(id, || anyhow::bail!("route cache stale"));
    h.governor.pump_deferred(5.0);
    assert!(h.governor.deferral().unwrap().is_blacklisted(id));
    assert_eq!(h.sink.count_matching(Level::Error, "route cache stale"), 1);

    match h.governor.defer(id, || anyhow::bail!("still stale")) {
        Deferral::Inline(Err(e)) => assert_eq!(e.to_string(), "still stale"),
        other => panic!("expected inline failure, got {other:?}"),
    }
}

#[test]
fn test_tick_pumps_deferred_work() {
    let h = host(GovernorConfig::default());
    let id = h.governor.call_site("Trade", "rebuild_routes");
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    h.governor.defer(id, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    h.clock.advance_ms(16.0);
    h.governor.on_tick(0.016);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_resource_cap_fires_once_per_crossing() {
    let h = host(GovernorConfig::default());
    assert!(!h.governor.observe_resource(WORLD, 49_999.0));
    assert!(h.governor.observe_resource(WORLD, 50_000.0));
    assert!(!h.governor.observe_resource(WORLD, 60_000.0));
    assert!(!h.governor.observe_resource(WORLD, 10_000.0));
    assert!(h.governor.observe_resource(WORLD, 55_000.0));
    assert_eq!(h.sink.count_matching(Level::Warn, "hard cap"), 2);
    // ui_redraw has no cap
    assert!(!h.governor.observe_resource(UI, 1e12));
}

#[test]
fn test_allocation_spike_reaches_sink_and_summary() {
    let h = host(GovernorConfig::default());
    h.clock.advance_ms(16.0);
    h.governor.on_tick(0.016);

    h.counters.add_allocated(30_000_000);
    h.clock.advance_ms(16.0);
    let report = h.governor.on_tick(0.016);
    assert_eq!(report.events.len(), 1);
    assert_eq!(h.governor.spike_event_count(), 1);

    let summary = h.governor.emit_summary();
    assert_eq!(summary.spike_events, 1);
}

#[test]
fn test_two_allocation_spikes_in_cooldown_warn_once() {
    let h = host(GovernorConfig::default());
    h.clock.advance_ms(16.0);
    h.governor.on_tick(0.016);

    for _ in 0..2 {
        h.counters.add_allocated(30_000_000);
        h.clock.advance_ms(16.0);
        h.governor.on_tick(0.016);
    }
    assert_eq!(h.governor.spike_event_count(), 1);
    assert_eq!(
        h.sink
            .records()
            .iter()
            .filter(|r| r.level == Level::Warn)
            .count(),
        1
    );
}

#[test]
fn test_forced_flush_restarts_window() {
    let h = host(GovernorConfig::default());
    h.clock.advance_ms(16.0);
    h.governor.on_tick(0.016);
    assert!(h.governor.last_snapshot().is_none());

    h.counters.add_allocated(200_000_000);
    h.clock.advance_ms(16.0);
    let report = h.governor.on_tick(0.016);
    assert!(report.reset_window);
    assert!(report.summary_due);
    assert!(h.governor.last_snapshot().is_some());
    assert!(h.governor.last_summary().is_some());
}

#[test]
fn test_summary_covers_calls_since_previous_summary() {
    let h = host(GovernorConfig::default());
    let id = h.governor.call_site("Market", "update");
    for _ in 0..4 {
        h.governor.instrument(id, || h.clock.advance_ms(2.0));
    }

    let first = h.governor.emit_summary();
    assert_eq!(first.active_call_sites, 1);
    assert_eq!(first.top_call_sites[0].timing.count, 4);

    let second = h.governor.emit_summary();
    assert_eq!(second.active_call_sites, 0);
}

#[test]
fn test_multithreaded_hooks_and_readers() {
    let h = host(GovernorConfig::default());
    let ids: Vec<_> = (0..4)
        .map(|i| h.governor.call_site("Worker", &format!("job_{i}")))
        .collect();

    std::thread::scope(|s| {
        for id in &ids {
            let governor = &h.governor;
            s.spawn(move || {
                for _ in 0..500 {
                    governor.instrument(*id, || std::hint::black_box(()));
                    governor.should_skip(WORLD);
                }
            });
        }
        s.spawn(|| {
            for _ in 0..50 {
                h.governor.record_phase(FramePhase::Map, 12.0);
                h.clock.advance_ms(100.0);
                h.governor.on_tick(0.1);
            }
        });
    });

    for id in &ids {
        assert_eq!(h.governor.timing().peek(*id).unwrap().count, 500);
    }
    assert!(h.governor.publisher().published() >= 1);
}

#[test]
fn test_shutdown_stops_instrumentation() {
    let h = host(GovernorConfig::default());
    let id = h.governor.call_site("Market", "update");
    h.governor.shutdown();
    assert!(h.governor.is_shut_down());
    h.governor.instrument(id, || h.clock.advance_ms(1.0));
    assert!(h.governor.timing().peek(id).is_none());
    assert!(!h.governor.should_skip(WORLD));
}
