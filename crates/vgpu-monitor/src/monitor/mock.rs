//! Test doubles for the reconciler's collaborators

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use std::time::SystemTime;

use error_stack::Report;

use super::clock::Clock;
use super::locator::SharedRegionLoader;
use super::model::PodRecord;
use super::model::SharedRegionSnapshot;
use super::oracle::PodLivenessOracle;
use super::MonitorError;

/// Writes a cache file readable by the default region layout.
pub(crate) fn write_cache(dir: &Path, name: &str, snapshot: SharedRegionSnapshot) {
    let mut bytes = Vec::with_capacity(12);
    bytes.extend_from_slice(&snapshot.utilization_switch.to_le_bytes());
    bytes.extend_from_slice(&snapshot.recent_kernel.to_le_bytes());
    bytes.extend_from_slice(&snapshot.priority.to_le_bytes());
    fs::write(dir.join(name), bytes).unwrap();
}

/// Oracle returning a canned pod roster, or failing on demand
pub(crate) struct MockOracle {
    uids: Mutex<Vec<String>>,
    error_mode: Mutex<bool>,
    queried_nodes: Mutex<Vec<String>>,
}

impl MockOracle {
    pub(crate) fn new(uids: &[&str]) -> Self {
        Self {
            uids: Mutex::new(uids.iter().map(|uid| uid.to_string()).collect()),
            error_mode: Mutex::new(false),
            queried_nodes: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_pods(&self, uids: &[&str]) {
        *self.uids.lock().unwrap() = uids.iter().map(|uid| uid.to_string()).collect();
    }

    /// Enable or disable error mode for testing error handling
    pub(crate) fn set_error_mode(&self, enabled: bool) {
        *self.error_mode.lock().unwrap() = enabled;
    }

    pub(crate) fn queried_nodes(&self) -> Vec<String> {
        self.queried_nodes.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl PodLivenessOracle for MockOracle {
    async fn list_pods_on_node(
        &self,
        node_name: &str,
    ) -> Result<Vec<PodRecord>, Report<MonitorError>> {
        self.queried_nodes
            .lock()
            .unwrap()
            .push(node_name.to_string());

        if *self.error_mode.lock().unwrap() {
            return Err(Report::new(MonitorError::PodQuery {
                node_name: node_name.to_string(),
            }));
        }

        Ok(self
            .uids
            .lock()
            .unwrap()
            .iter()
            .map(PodRecord::new)
            .collect())
    }
}

/// Loader returning a fixed snapshot and recording every requested path
pub(crate) struct MockLoader {
    snapshot: SharedRegionSnapshot,
    calls: Mutex<Vec<PathBuf>>,
}

impl MockLoader {
    pub(crate) fn new(snapshot: SharedRegionSnapshot) -> Self {
        Self {
            snapshot,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }
}

impl SharedRegionLoader for MockLoader {
    fn load(&self, path: &Path) -> Result<SharedRegionSnapshot, Report<MonitorError>> {
        self.calls.lock().unwrap().push(path.to_path_buf());
        Ok(self.snapshot)
    }
}

/// Mock clock for testing grace periods
pub(crate) struct MockClock {
    now: Mutex<SystemTime>,
}

impl MockClock {
    pub(crate) fn new(now: SystemTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Advance time by the given duration
    pub(crate) fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for MockClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap()
    }
}
