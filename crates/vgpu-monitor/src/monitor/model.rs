use std::collections::HashSet;

use serde::Serialize;
pub use utils::shared_region::SharedRegionSnapshot;

/// A container directory whose shared region has been parsed.
///
/// Never updated in place; a re-created directory gets a fresh value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedContainer {
    /// Base name of the container directory
    pub id: String,
    pub snapshot: SharedRegionSnapshot,
}

/// A pod scheduled to this node, as reported by the liveness oracle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PodRecord {
    pub uid: String,
}

impl PodRecord {
    pub fn new(uid: impl Into<String>) -> Self {
        Self { uid: uid.into() }
    }
}

/// Pod roster for a single reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PodRoster {
    /// The oracle answered; only these UIDs are alive.
    Known(HashSet<String>),
    /// The oracle failed. Holds the UIDs of the last successful answer, if
    /// any, for adoption only. Nothing may be evicted on this pass.
    Stale(Option<HashSet<String>>),
}

impl PodRoster {
    pub(crate) fn from_records(records: Vec<PodRecord>) -> Self {
        Self::Known(records.into_iter().map(|record| record.uid).collect())
    }

    /// Roster for a pass whose pod query failed.
    pub(crate) fn stale(last_known: Option<&HashSet<String>>) -> Self {
        Self::Stale(last_known.cloned())
    }

    /// The UIDs of a successful query.
    pub(crate) fn known_uids(&self) -> Option<&HashSet<String>> {
        match self {
            Self::Known(uids) => Some(uids),
            Self::Stale(_) => None,
        }
    }

    /// Whether the directory named `dir_name` belongs to a pod the roster
    /// considers alive.
    pub(crate) fn admits(&self, dir_name: &str) -> bool {
        let uid = pod_uid_from_dir_name(dir_name);
        match self {
            Self::Known(uids) | Self::Stale(Some(uids)) => uids.contains(uid),
            Self::Stale(None) => false,
        }
    }

    pub(crate) fn allows_eviction(&self) -> bool {
        matches!(self, Self::Known(_))
    }
}

/// Extracts the pod UID from a container directory name.
///
/// Directories are named `[pod-]<pod-uid>[_<container-name>]`.
pub(crate) fn pod_uid_from_dir_name(dir_name: &str) -> &str {
    let uid = dir_name
        .split_once('_')
        .map_or(dir_name, |(uid, _container)| uid);
    uid.strip_prefix("pod-").unwrap_or(uid)
}
