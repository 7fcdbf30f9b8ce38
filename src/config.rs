//! Governor configuration
//!
//! Every knob has a fixed fallback default, and every section is
//! `#[serde(default)]`, so a missing file, a missing section or a missing key
//! all degrade to the defaults rather than failing.
//!
//! # Example TOML
//! ```toml
//! enabled = true
//!
//! [spike]
//! frame_spike_ms = 40.0
//!
//! [[throttle.families]]
//! name = "ui_redraw"
//! metric = "ui_cost"
//! threshold_ms = 6.0
//! low_ms = 6.0
//! high_ms = 20.0
//! min_skip = 2
//! max_skip = 6
//! ```

use crate::call_site::{PeriodicClassifier, DEFAULT_PERIODIC_PATTERNS};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Master switch; when off every hook is a no-op and nothing is throttled
    pub enabled: bool,
    pub burst: BurstConfig,
    pub spike: SpikeConfig,
    pub summary: SummaryConfig,
    pub window: WindowConfig,
    pub throttle: ThrottleConfig,
    pub deferral: DeferralConfig,
    pub latency: LatencyConfig,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            burst: BurstConfig::default(),
            spike: SpikeConfig::default(),
            summary: SummaryConfig::default(),
            window: WindowConfig::default(),
            throttle: ThrottleConfig::default(),
            deferral: DeferralConfig::default(),
            latency: LatencyConfig::default(),
        }
    }
}

/// Burst attribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BurstConfig {
    pub enabled: bool,
    /// Minimum time between two bursts opening (seconds)
    pub cooldown_secs: f64,
    /// Regexes over `scope::name` marking periodic call sites
    pub periodic_patterns: Vec<String>,
    pub top_children: usize,
    pub min_child_ms: f64,
    pub min_child_fraction: f64,
    /// Completed bursts cheaper than this are aggregated but not logged
    pub log_min_total_ms: f64,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_secs: 0.25,
            periodic_patterns: DEFAULT_PERIODIC_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            top_children: 8,
            min_child_ms: 0.5,
            min_child_fraction: 0.02,
            log_min_total_ms: 5.0,
        }
    }
}

/// Spike detection thresholds and cooldowns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpikeConfig {
    pub enabled: bool,
    pub frame_spike_ms: f64,
    /// Frames longer than this also force a summary flush
    pub frame_flush_ms: f64,
    pub frame_cooldown_secs: f64,
    pub allocation_spike_bytes: u64,
    pub working_set_spike_bytes: u64,
    /// Shared by allocation and working-set spikes
    pub memory_cooldown_secs: f64,
    pub allocation_flush_bytes: u64,
    pub working_set_flush_bytes: u64,
    /// Cadence of the periodic summary (seconds)
    pub summary_interval_secs: f64,
}

impl Default for SpikeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frame_spike_ms: 50.0,
            frame_flush_ms: 200.0,
            frame_cooldown_secs: 1.0,
            allocation_spike_bytes: 25_000_000,
            working_set_spike_bytes: 75_000_000,
            memory_cooldown_secs: 5.0,
            allocation_flush_bytes: 150_000_000,
            working_set_flush_bytes: 250_000_000,
            summary_interval_secs: 2.0,
        }
    }
}

/// Periodic summary contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Render summaries to the diagnostics sink
    pub log: bool,
    pub top_call_sites: usize,
    pub top_burst_roots: usize,
    pub top_alloc_bands: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            log: true,
            top_call_sites: 8,
            top_burst_roots: 5,
            top_alloc_bands: 6,
        }
    }
}

/// Snapshot window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Snapshot publication cadence (seconds)
    pub interval_secs: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { interval_secs: 3.0 }
    }
}

/// Which snapshot figure a throttle family watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostMetric {
    /// Average world/map frame cost
    MapCost,
    /// Average UI frame cost
    UiCost,
}

/// One throttled operation family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleFamilyConfig {
    pub name: String,
    pub enabled: bool,
    pub metric: CostMetric,
    /// Average cost above which the family becomes active (ms)
    pub threshold_ms: f64,
    /// Cost mapped to `min_skip`
    pub low_ms: f64,
    /// Cost at or above which `max_skip` applies
    pub high_ms: f64,
    pub min_skip: u32,
    pub max_skip: u32,
    /// Resource estimate at which the safety action fires once
    pub resource_hard_cap: Option<f64>,
}

impl Default for ThrottleFamilyConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            metric: CostMetric::MapCost,
            threshold_ms: 10.0,
            low_ms: 10.0,
            high_ms: 40.0,
            min_skip: 2,
            max_skip: 4,
            resource_hard_cap: None,
        }
    }
}

/// Adaptive throttling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub enabled: bool,
    /// Decisions are held fixed for this long (seconds)
    pub reevaluate_secs: f64,
    /// Snapshots older than this do not count as fresh (seconds)
    pub snapshot_max_age_secs: f64,
    pub families: Vec<ThrottleFamilyConfig>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reevaluate_secs: 2.5,
            snapshot_max_age_secs: 9.0,
            families: vec![
                ThrottleFamilyConfig {
                    name: "ui_redraw".to_string(),
                    metric: CostMetric::UiCost,
                    threshold_ms: 6.0,
                    low_ms: 6.0,
                    high_ms: 20.0,
                    min_skip: 2,
                    max_skip: 6,
                    ..ThrottleFamilyConfig::default()
                },
                ThrottleFamilyConfig {
                    name: "world_view_redraw".to_string(),
                    metric: CostMetric::MapCost,
                    threshold_ms: 10.0,
                    low_ms: 10.0,
                    high_ms: 40.0,
                    min_skip: 2,
                    max_skip: 4,
                    resource_hard_cap: Some(50_000.0),
                    ..ThrottleFamilyConfig::default()
                },
            ],
        }
    }
}

/// Deferral of heavy periodic work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeferralConfig {
    pub enabled: bool,
    pub capacity: usize,
    /// Time budget for one `pump` (ms)
    pub pump_budget_ms: f64,
}

impl Default for DeferralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 256,
            pump_budget_ms: 2.0,
        }
    }
}

/// Host low-latency mode
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyConfig {
    /// Switch the host into low-latency mode while installed
    pub low_latency: bool,
}

impl GovernorConfig {
    /// Load and validate a TOML configuration file
    ///
    /// # Errors
    /// Returns error if the file cannot be read, is not valid TOML, or fails
    /// [`GovernorConfig::validate`].
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read governor config: {}", path.as_ref().display())
        })?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid governor config: {}", path.as_ref().display()))
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: GovernorConfig =
            toml::from_str(content).context("Failed to parse governor TOML")?;
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    /// Serialize to pretty TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize governor config")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        fn positive(name: &str, value: f64) -> Result<(), String> {
            if value > 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(format!("{name} must be a positive number, got {value}"))
            }
        }
        fn non_negative(name: &str, value: f64) -> Result<(), String> {
            if value >= 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(format!("{name} must be non-negative, got {value}"))
            }
        }

        non_negative("burst.cooldown_secs", self.burst.cooldown_secs)?;
        non_negative("burst.min_child_ms", self.burst.min_child_ms)?;
        if !(0.0..=1.0).contains(&self.burst.min_child_fraction) {
            return Err(format!(
                "burst.min_child_fraction must be in [0, 1], got {}",
                self.burst.min_child_fraction
            ));
        }
        PeriodicClassifier::new(&self.burst.periodic_patterns)
            .map_err(|e| format!("burst.periodic_patterns: {e:#}"))?;

        positive("spike.frame_spike_ms", self.spike.frame_spike_ms)?;
        if self.spike.frame_flush_ms < self.spike.frame_spike_ms {
            return Err(format!(
                "spike.frame_flush_ms ({}) must be >= spike.frame_spike_ms ({})",
                self.spike.frame_flush_ms, self.spike.frame_spike_ms
            ));
        }
        non_negative("spike.frame_cooldown_secs", self.spike.frame_cooldown_secs)?;
        non_negative("spike.memory_cooldown_secs", self.spike.memory_cooldown_secs)?;
        if self.spike.allocation_flush_bytes < self.spike.allocation_spike_bytes {
            return Err("spike.allocation_flush_bytes must be >= spike.allocation_spike_bytes".into());
        }
        if self.spike.working_set_flush_bytes < self.spike.working_set_spike_bytes {
            return Err(
                "spike.working_set_flush_bytes must be >= spike.working_set_spike_bytes".into(),
            );
        }
        positive("spike.summary_interval_secs", self.spike.summary_interval_secs)?;
        positive("window.interval_secs", self.window.interval_secs)?;

        positive("throttle.reevaluate_secs", self.throttle.reevaluate_secs)?;
        positive("throttle.snapshot_max_age_secs", self.throttle.snapshot_max_age_secs)?;
        let mut names = HashSet::new();
        for family in &self.throttle.families {
            if family.name.is_empty() {
                return Err("throttle family name must not be empty".into());
            }
            if !names.insert(family.name.as_str()) {
                return Err(format!("duplicate throttle family '{}'", family.name));
            }
            non_negative(&format!("{}.threshold_ms", family.name), family.threshold_ms)?;
            non_negative(&format!("{}.low_ms", family.name), family.low_ms)?;
            if family.high_ms < family.low_ms {
                return Err(format!(
                    "{}: high_ms ({}) must be >= low_ms ({})",
                    family.name, family.high_ms, family.low_ms
                ));
            }
            if family.max_skip < family.min_skip {
                return Err(format!(
                    "{}: max_skip ({}) must be >= min_skip ({})",
                    family.name, family.max_skip, family.min_skip
                ));
            }
        }

        if self.deferral.capacity == 0 {
            return Err("deferral.capacity must be > 0".into());
        }
        positive("deferral.pump_budget_ms", self.deferral.pump_budget_ms)?;

        Ok(())
    }
}
