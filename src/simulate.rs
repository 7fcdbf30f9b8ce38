//! Deterministic synthetic host
//!
//! Drives a [`Governor`] the way a game loop would: periodic daily and
//! hourly ticks with nested children, UI and world-view redraws under
//! throttling, a growing world, allocation bursts and deferred route
//! rebuilds. Time is a [`ManualClock`] advanced by the simulated work
//! itself, so every run with the same options produces the same report.

use crate::binding::{BindRequest, BindingRole, StaticResolver};
use crate::burst::BurstBreakdown;
use crate::call_site::CallSiteId;
use crate::clock::{Clock, ManualClock};
use crate::config::GovernorConfig;
use crate::counters::ManualCounters;
use crate::governor::Governor;
use crate::oracle::ManualOracle;
use crate::snapshot::Snapshot;
use crate::summary::SummaryReport;
use crate::throttle::ThrottleDecision;
use crate::window::{FramePhase, WorldSample};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;

const UI_FAMILY: &str = "ui_redraw";
const WORLD_FAMILY: &str = "world_view_redraw";

/// Frames per simulated day
const FRAMES_PER_DAY: u64 = 60;
const FRAMES_PER_HOUR: u64 = 20;

#[derive(Debug, Clone, Copy)]
pub struct SimulationOptions {
    pub frames: u64,
    pub frame_ms: f64,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            frames: 600,
            frame_ms: 16.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FamilyReport {
    pub name: String,
    pub enabled: bool,
    pub decision: ThrottleDecision,
    pub executed: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub frames: u64,
    pub simulated_secs: f64,
    pub call_sites: usize,
    pub snapshots_published: u64,
    pub spike_events: u64,
    pub safety_actions: u64,
    pub deferred_jobs: u64,
    pub blacklisted_sites: usize,
    pub families: Vec<FamilyReport>,
    pub last_snapshot: Option<Snapshot>,
    pub last_burst: Option<BurstBreakdown>,
    #[serde(skip)]
    pub last_burst_text: Option<String>,
    pub final_summary: SummaryReport,
}

impl SimulationReport {
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "simulated {} frames ({:.1}s), {} call sites",
            self.frames, self.simulated_secs, self.call_sites
        );
        let _ = writeln!(
            out,
            "snapshots {}  spike events {}  safety actions {}  deferred {}  blacklisted {}",
            self.snapshots_published,
            self.spike_events,
            self.safety_actions,
            self.deferred_jobs,
            self.blacklisted_sites
        );
        let _ = writeln!(out, "throttle families:");
        for family in &self.families {
            let _ = writeln!(
                out,
                "  {:<20} {} active={} skip_every_n={} executed={} skipped={}",
                family.name,
                if family.enabled { "enabled " } else { "disabled" },
                family.decision.active,
                family.decision.skip_every_n,
                family.executed,
                family.skipped
            );
        }
        if let Some(snapshot) = &self.last_snapshot {
            let _ = writeln!(
                out,
                "last snapshot #{}: {} frames, map {:.2}/{:.2}ms, ui {:.2}/{:.2}ms, objects {:.0}, mode {:?}",
                snapshot.sequence,
                snapshot.frame_count,
                snapshot.map_avg_ms,
                snapshot.map_max_ms,
                snapshot.ui_avg_ms,
                snapshot.ui_max_ms,
                snapshot.avg_objects,
                snapshot.mode
            );
        }
        if let Some(text) = &self.last_burst_text {
            out.push_str("last ");
            out.push_str(text);
        }
        out.push_str(&self.final_summary.render());
        out
    }
}

struct Sites {
    daily: CallSiteId,
    hourly: CallSiteId,
    market: CallSiteId,
    pops: CallSiteId,
    routes: CallSiteId,
    ui: CallSiteId,
    world: CallSiteId,
}

fn bind_sites(governor: &Governor) -> Result<Sites> {
    let resolver = StaticResolver::new()
        .with_target("Economy", "daily_tick")
        .with_target("Calendar", "hourly_tick")
        .with_target("Market", "update")
        .with_target("Pops", "grow")
        .with_target("Trade", "rebuild_routes")
        .with_target("Ui", "redraw")
        .with_target("WorldView", "redraw");
    let requests = [
        BindRequest::new("Economy", "daily_tick", BindingRole::Timed),
        BindRequest::new("Calendar", "hourly_tick", BindingRole::Timed),
        BindRequest::new("Market", "update", BindingRole::Timed),
        BindRequest::new("Pops", "grow", BindingRole::Timed),
        BindRequest::new("Trade", "rebuild_routes", BindingRole::Deferrable),
        BindRequest::new("Ui", "redraw", BindingRole::Throttled(UI_FAMILY.into())),
        BindRequest::new("WorldView", "redraw", BindingRole::Throttled(WORLD_FAMILY.into())),
    ];
    governor
        .bind(&requests, &resolver)
        .context("Failed to bind simulated call sites")?;

    Ok(Sites {
        daily: governor.call_site("Economy", "daily_tick"),
        hourly: governor.call_site("Calendar", "hourly_tick"),
        market: governor.call_site("Market", "update"),
        pops: governor.call_site("Pops", "grow"),
        routes: governor.call_site("Trade", "rebuild_routes"),
        ui: governor.call_site("Ui", "redraw"),
        world: governor.call_site("WorldView", "redraw"),
    })
}

/// Run the synthetic host for `options.frames` frames
pub fn run(config: GovernorConfig, options: SimulationOptions) -> Result<SimulationReport> {
    let clock = Arc::new(ManualClock::new());
    let counters = Arc::new(ManualCounters::new());
    let oracle = Arc::new(ManualOracle::new());
    let governor = Governor::builder(config)
        .clock(clock.clone())
        .counters(counters.clone())
        .oracle(oracle.clone())
        .install()
        .context("Failed to install governor")?;
    let sites = bind_sites(&governor)?;

    let mut executed = [0u64; 2];
    let mut safety_actions = 0u64;

    for frame in 0..options.frames {
        let frame_start = clock.now();
        let objects = 20_000.0 + frame as f64 * 60.0;

        // The player drags the camera for a while
        oracle.set_interacting((100..130).contains(&frame));

        if frame % FRAMES_PER_DAY == 0 {
            let day = frame / FRAMES_PER_DAY;
            governor.instrument(sites.daily, || {
                clock.advance_ms(1.5);
                counters.add_allocated(2_000_000);
                governor.instrument(sites.market, || {
                    clock.advance_ms(2.0 + (day % 3) as f64);
                    counters.add_allocated(600_000);
                });
                governor.instrument(sites.pops, || clock.advance_ms(1.5));
                governor.instrument(sites.hourly, || clock.advance_ms(0.4));
            });

            if day % 2 == 1 {
                let job_clock = Arc::clone(&clock);
                governor.defer(sites.routes, move || {
                    job_clock.advance_ms(3.0);
                    if day == 7 {
                        anyhow::bail!("route cache stale on day {day}");
                    }
                    Ok(())
                });
            }
        } else if frame % FRAMES_PER_HOUR == 0 {
            governor.instrument(sites.hourly, || clock.advance_ms(0.8));
        }

        let ui_cost = 4.0 + (frame % 200) as f64 / 20.0;
        let ran_ui = governor.instrument_bound(sites.ui, || {
            clock.advance_ms(ui_cost);
        });
        if ran_ui.is_some() {
            executed[0] += 1;
            governor.record_phase(FramePhase::Ui, ui_cost);
        }

        let map_cost = 6.0 + objects / 2_000.0;
        let ran_world = governor.instrument_bound(sites.world, || {
            clock.advance_ms(map_cost);
        });
        if ran_world.is_some() {
            executed[1] += 1;
            governor.record_phase(FramePhase::Map, map_cost);
        }

        counters.add_allocated(40_000);
        if frame > 0 && frame % 250 == 0 {
            counters.add_allocated(30_000_000);
        }
        counters.set_working_set(200_000_000 + objects as u64 * 1_000);
        if frame % 45 == 0 {
            counters.add_collection(0);
        }
        if frame % 300 == 0 {
            counters.add_collection(1);
        }

        governor.record_world(WorldSample {
            actors: objects / 10.0,
            objects,
            resources: objects / 100.0,
        });
        if governor.observe_resource(WORLD_FAMILY, objects) {
            safety_actions += 1;
        }

        let spent_ms = (clock.now() - frame_start).as_secs_f64() * 1_000.0;
        if spent_ms < options.frame_ms {
            clock.advance_ms(options.frame_ms - spent_ms);
        }
        let dt = (clock.now() - frame_start).as_secs_f64();
        governor.on_tick(dt);
    }

    let final_summary = governor.emit_summary();
    let last_burst = governor.last_burst();
    let last_burst_text = last_burst
        .as_ref()
        .map(|b| b.render(governor.registry()));

    let families = [UI_FAMILY, WORLD_FAMILY]
        .iter()
        .zip(executed)
        .filter_map(|(name, executed)| {
            governor.throttle(name).map(|t| FamilyReport {
                name: name.to_string(),
                enabled: t.is_enabled(),
                decision: t.decision(),
                executed,
                skipped: t.skipped(),
            })
        })
        .collect();

    let report = SimulationReport {
        frames: options.frames,
        simulated_secs: clock.now_secs(),
        call_sites: governor.registry().len(),
        snapshots_published: governor.publisher().published(),
        spike_events: governor.spike_event_count(),
        safety_actions,
        deferred_jobs: governor.deferral().map_or(0, |d| d.deferred()),
        blacklisted_sites: governor.deferral().map_or(0, |d| d.blacklisted_count()),
        families,
        last_snapshot: governor.last_snapshot(),
        last_burst,
        last_burst_text,
        final_summary,
    };
    governor.shutdown();
    Ok(report)
}
