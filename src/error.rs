//! Error types for the governor
//!
//! Nothing here is ever propagated into an instrumented call path. These
//! errors surface from installation, binding and the mode oracle, where the
//! governor logs them and disables the affected feature.

use thiserror::Error;

/// A call site the host asked us to bind could not be resolved
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    #[error("call site not found: {target}")]
    NotFound { target: String },

    #[error("call site {target} is ambiguous ({candidates} candidates)")]
    Ambiguous { target: String, candidates: usize },

    #[error("call site {target} has an incompatible signature: {reason}")]
    Incompatible { target: String, reason: String },
}

impl BindError {
    /// Name of the target that failed to bind
    pub fn target(&self) -> &str {
        match self {
            BindError::NotFound { target }
            | BindError::Ambiguous { target, .. }
            | BindError::Incompatible { target, .. } => target,
        }
    }
}

/// The host's mode oracle could not answer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("mode oracle unavailable")]
    Unavailable,

    #[error("mode oracle failed: {0}")]
    Failed(String),
}

/// Fatal installation faults
#[derive(Error, Debug)]
pub enum GovernorError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to switch low-latency mode: {0}")]
    LatencyMode(String),

    #[error("no call sites could be bound ({failed} failed)")]
    NothingBound { failed: usize },
}

pub type Result<T> = std::result::Result<T, GovernorError>;
