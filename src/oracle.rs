//! Host mode oracle and low-latency toggle
//!
//! Both are owned by the host. The governor only asks questions through
//! them and treats every failure as "not interacting, not throttling".

use crate::error::OracleError;
use crate::snapshot::ModeTag;
use std::sync::atomic::{AtomicBool, Ordering};

/// What the host is currently doing
pub trait ModeOracle: Send + Sync {
    fn is_on_primary_view(&self) -> Result<bool, OracleError>;
    fn is_paused(&self) -> Result<bool, OracleError>;
    fn is_fast_forward(&self) -> Result<bool, OracleError>;
    /// Any primary input currently held
    fn user_is_interacting(&self) -> Result<bool, OracleError>;
}

/// Classify the host's mode for a snapshot
pub fn mode_tag(oracle: &dyn ModeOracle) -> ModeTag {
    let read = || -> Result<ModeTag, OracleError> {
        if oracle.is_paused()? {
            return Ok(ModeTag::Paused);
        }
        if oracle.is_fast_forward()? {
            return Ok(ModeTag::FastForward);
        }
        Ok(if oracle.is_on_primary_view()? {
            ModeTag::Primary
        } else {
            ModeTag::Secondary
        })
    };
    read().unwrap_or(ModeTag::Unknown)
}

/// Oracle backed by atomics the host (or a test) sets directly
#[derive(Debug)]
pub struct ManualOracle {
    primary_view: AtomicBool,
    paused: AtomicBool,
    fast_forward: AtomicBool,
    interacting: AtomicBool,
    failing: AtomicBool,
}

impl ManualOracle {
    /// Running on the primary view, nobody touching the input
    pub fn new() -> Self {
        Self {
            primary_view: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            fast_forward: AtomicBool::new(false),
            interacting: AtomicBool::new(false),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_primary_view(&self, on: bool) {
        self.primary_view.store(on, Ordering::Relaxed);
    }

    pub fn set_paused(&self, on: bool) {
        self.paused.store(on, Ordering::Relaxed);
    }

    pub fn set_fast_forward(&self, on: bool) {
        self.fast_forward.store(on, Ordering::Relaxed);
    }

    pub fn set_interacting(&self, on: bool) {
        self.interacting.store(on, Ordering::Relaxed);
    }

    /// Make every query fail with [`OracleError::Unavailable`]
    pub fn set_failing(&self, on: bool) {
        self.failing.store(on, Ordering::Relaxed);
    }

    fn read(&self, flag: &AtomicBool) -> Result<bool, OracleError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(OracleError::Unavailable);
        }
        Ok(flag.load(Ordering::Relaxed))
    }
}

impl Default for ManualOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeOracle for ManualOracle {
    fn is_on_primary_view(&self) -> Result<bool, OracleError> {
        self.read(&self.primary_view)
    }

    fn is_paused(&self) -> Result<bool, OracleError> {
        self.read(&self.paused)
    }

    fn is_fast_forward(&self) -> Result<bool, OracleError> {
        self.read(&self.fast_forward)
    }

    fn user_is_interacting(&self) -> Result<bool, OracleError> {
        self.read(&self.interacting)
    }
}

/// Process-global low-latency switch owned by the host
pub trait LatencyMode: Send + Sync {
    fn is_low_latency(&self) -> bool;
    fn set_low_latency(&self, on: bool) -> anyhow::Result<()>;
}

/// In-memory latency switch, optionally refusing to change
#[derive(Debug, Default)]
pub struct ManualLatencyMode {
    low_latency: AtomicBool,
    refuse: AtomicBool,
}

impl ManualLatencyMode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_refuse(&self, on: bool) {
        self.refuse.store(on, Ordering::Relaxed);
    }
}

impl LatencyMode for ManualLatencyMode {
    fn is_low_latency(&self) -> bool {
        self.low_latency.load(Ordering::Relaxed)
    }

    fn set_low_latency(&self, on: bool) -> anyhow::Result<()> {
        if self.refuse.load(Ordering::Relaxed) {
            anyhow::bail!("latency mode is locked by the host");
        }
        self.low_latency.store(on, Ordering::Relaxed);
        Ok(())
    }
}
