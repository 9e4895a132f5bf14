//! Container directory reconciliation.
//!
//! Keeps the [`Registry`] of vGPU shared regions in step with the containers
//! that are actually alive on this node. Two independent sources are
//! reconciled on every pass:
//! - the per-container directories the hook runtime creates under the
//!   configured base path, and
//! - the pod roster reported by a [`PodLivenessOracle`].
//!
//! The main components are:
//! - [`Reconciler`]: runs one serialized pass (scan, query, evict, adopt)
//! - [`Registry`]: the shared, read-safe map of tracked containers
//! - [`SharedRegionLoader`]: parses a container's accounting cache file

pub(crate) mod clock;
pub(crate) mod locator;
#[cfg(test)]
pub(crate) mod mock;
pub(crate) mod model;
pub(crate) mod oracle;
pub(crate) mod reconciler;
pub(crate) mod registry;
pub(crate) mod scanner;

use core::error::Error;
use std::path::PathBuf;

pub use clock::Clock;
pub use clock::SystemClock;
pub use locator::SharedRegionLoader;
pub use model::PodRecord;
pub use model::TrackedContainer;
pub use oracle::PodLivenessOracle;
pub use reconciler::MonitorConfig;
pub use reconciler::PassSummary;
pub use reconciler::Reconciler;
pub use reconciler::DEFAULT_GRACE_PERIOD;
pub use registry::Registry;

/// Errors raised while reconciling container directories.
#[derive(Debug, derive_more::Display)]
pub enum MonitorError {
    #[display("Failed to list directory {path:?}")]
    ReadDirectory { path: PathBuf },
    #[display("Failed to stat {path:?}")]
    Stat { path: PathBuf },
    #[display("Failed to remove {path:?}")]
    RemoveDirectory { path: PathBuf },
    #[display("Unexpected cache layout in {path:?}: {entries} entries")]
    CacheLayout { path: PathBuf, entries: usize },
    #[display("Failed to parse shared region cache {path:?}")]
    CacheParse { path: PathBuf },
    #[display("Failed to list pods on node {node_name}")]
    PodQuery { node_name: String },
}

impl Error for MonitorError {}
