//! Regulador - in-process adaptive performance governor
//!
//! Measures the cost of dynamically bound call sites inside a live host,
//! attributes nested costs to the periodic operation that triggered them,
//! detects frame and memory spikes, publishes a windowed snapshot across
//! threads, and uses it to decide frame by frame whether expensive work
//! should be skipped or deferred.
//!
//! # Example
//!
//! ```
//! use regulador::config::GovernorConfig;
//! use regulador::governor::Governor;
//!
//! let governor = Governor::install(GovernorConfig::default()).unwrap();
//! let tick = governor.call_site("Economy", "daily_tick");
//! let total = governor.instrument(tick, || (1..=10).sum::<u32>());
//! assert_eq!(total, 55);
//!
//! if !governor.should_skip("ui_redraw") {
//!     // redraw
//! }
//! governor.on_tick(0.016);
//! governor.shutdown();
//! ```

pub mod alloc_histogram;
pub mod binding;
pub mod burst;
pub mod call_site;
pub mod cli;
pub mod clock;
pub mod config;
pub mod counters;
pub mod deferral;
pub mod diagnostics;
pub mod error;
pub mod governor;
pub mod oracle;
pub mod simulate;
pub mod snapshot;
pub mod spike;
pub mod summary;
pub mod throttle;
pub mod timing;
pub mod window;

pub use call_site::CallSiteId;
pub use config::GovernorConfig;
pub use error::{BindError, GovernorError, OracleError};
pub use governor::{CallGuard, CallState, Governor, GovernorBuilder};
pub use snapshot::Snapshot;
