//! Property-based tests for the statistical core
//!
//! Covers the timing aggregate, the skip-cadence mapping and the throttle
//! counter. Kept small enough to run as a pre-commit gate.

use proptest::prelude::*;
use regulador::config::{CostMetric, ThrottleFamilyConfig};
use regulador::snapshot::Snapshot;
use regulador::throttle::{linear_skip, ThrottleController};
use regulador::timing::{percentile_95, TimingStat};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_avg_and_max_match_samples(samples in prop::collection::vec(0.0f64..1_000.0, 1..300)) {
        let mut stat = TimingStat::new();
        for s in &samples {
            prop_assert!(stat.record(*s));
        }
        let sum: f64 = samples.iter().sum();
        let max = samples.iter().copied().fold(0.0f64, f64::max);

        let snap = stat.snapshot();
        prop_assert_eq!(snap.count, samples.len() as u64);
        prop_assert!((snap.avg_ms - sum / samples.len() as f64).abs() < 1e-9);
        prop_assert_eq!(snap.max_ms, max);
        prop_assert!(snap.p95_ms <= snap.max_ms);
    }

    #[test]
    fn prop_reset_starts_an_empty_window(samples in prop::collection::vec(0.0f64..500.0, 0..200)) {
        let mut stat = TimingStat::new();
        for s in &samples {
            stat.record(*s);
        }
        let first = stat.snapshot_and_reset();
        prop_assert_eq!(first.count, samples.len() as u64);

        let second = stat.snapshot_and_reset();
        prop_assert_eq!(second.count, 0);
        prop_assert_eq!(second.avg_ms, 0.0);
        prop_assert_eq!(second.max_ms, 0.0);
        prop_assert_eq!(second.p95_ms, 0.0);
    }

    #[test]
    fn prop_linear_skip_is_monotonic_and_bounded(
        a in -10.0f64..100.0,
        b in -10.0f64..100.0,
        min_skip in 1u32..4,
        extra in 0u32..6,
    ) {
        let max_skip = min_skip + extra;
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let n_lo = linear_skip(lo, 10.0, 40.0, min_skip, max_skip);
        let n_hi = linear_skip(hi, 10.0, 40.0, min_skip, max_skip);

        prop_assert!(n_lo <= n_hi);
        for n in [n_lo, n_hi] {
            prop_assert!(n == 0 || (min_skip..=max_skip).contains(&n));
        }
    }

    #[test]
    fn prop_throttle_runs_one_call_in_n(cost in 12.0f64..60.0, rounds in 1u64..20) {
        let controller = ThrottleController::new(
            ThrottleFamilyConfig {
                name: "world_view_redraw".to_string(),
                metric: CostMetric::MapCost,
                threshold_ms: 10.0,
                low_ms: 10.0,
                high_ms: 40.0,
                min_skip: 2,
                max_skip: 4,
                ..ThrottleFamilyConfig::default()
            },
            2.5,
            9.0,
        );
        let snapshot = Snapshot {
            map_avg_ms: cost,
            ..Snapshot::default()
        };

        controller.maybe_reevaluate(0.0, || Some(snapshot), || Ok(false));
        let n = u64::from(controller.decision().skip_every_n);
        prop_assert!((2..=4).contains(&n));

        let calls = n * rounds;
        let executed = (0..calls)
            .filter(|_| !controller.should_skip(0.0, || Some(snapshot), || Ok(false)))
            .count() as u64;
        prop_assert_eq!(executed, rounds);
        prop_assert_eq!(controller.skipped(), calls - rounds);
    }
}

#[test]
fn test_p95_of_one_to_hundred() {
    let mut stat = TimingStat::new();
    for v in 1..=100 {
        stat.record(f64::from(v));
    }
    assert_eq!(stat.p95_ms(), 95.0);

    let mut samples: Vec<f64> = (1..=20).map(f64::from).collect();
    assert_eq!(percentile_95(&mut samples), 19.0);
    assert_eq!(percentile_95(&mut []), 0.0);
}

#[test]
fn test_linear_skip_edges() {
    assert_eq!(linear_skip(f64::NAN, 10.0, 40.0, 2, 4), 0);
    assert_eq!(linear_skip(9.99, 10.0, 40.0, 2, 4), 0);
    assert_eq!(linear_skip(10.0, 10.0, 40.0, 2, 4), 2);
    assert_eq!(linear_skip(25.0, 10.0, 40.0, 2, 4), 3);
    assert_eq!(linear_skip(40.0, 10.0, 40.0, 2, 4), 4);
    assert_eq!(linear_skip(400.0, 10.0, 40.0, 2, 4), 4);
    // Degenerate range
    assert_eq!(linear_skip(20.0, 20.0, 20.0, 2, 4), 4);
}
