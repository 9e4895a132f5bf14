use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;

use error_stack::Report;
use error_stack::ResultExt;
use serde::Serialize;
use tokio::select;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;

use super::clock::Clock;
use super::clock::SystemClock;
use super::locator;
use super::locator::SharedRegionLoader;
use super::model::PodRoster;
use super::model::TrackedContainer;
use super::oracle::PodLivenessOracle;
use super::registry::Registry;
use super::scanner;
use super::scanner::DirEntryInfo;
use super::MonitorError;
use crate::metrics;

/// Minimum age of an unmatched directory before it may be deleted.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(300);

/// Inputs of the reconciler, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Directory holding one subdirectory per container
    pub container_path: PathBuf,
    /// Node whose pods make up the roster
    pub node_name: String,
    pub grace_period: Duration,
}

impl MonitorConfig {
    /// Configuration for the `containers` directory below the hook install path.
    pub fn from_hook_path(hook_path: impl Into<PathBuf>, node_name: impl Into<String>) -> Self {
        Self {
            container_path: hook_path.into().join("containers"),
            node_name: node_name.into(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    /// Entries found under the container path
    pub scanned: usize,
    pub adopted: usize,
    pub evicted: usize,
    /// Live directories whose cache could not be loaded yet
    pub pending: usize,
    /// Unmatched directories kept because of the grace period or a failed pod query
    pub protected: usize,
    /// Directories that disappeared between listing and stat
    pub vanished: usize,
    pub eviction_enabled: bool,
}

/// Keeps the [`Registry`] in step with the container directories on disk and
/// the pods scheduled to this node.
pub struct Reconciler {
    config: MonitorConfig,
    oracle: Arc<dyn PodLivenessOracle>,
    loader: Arc<dyn SharedRegionLoader>,
    clock: Arc<dyn Clock>,
    registry: Registry,
    /// Serializes passes; holds the pod UIDs of the last successful query.
    last_known_pods: Mutex<Option<HashSet<String>>>,
}

impl Reconciler {
    pub fn new(
        config: MonitorConfig,
        oracle: Arc<dyn PodLivenessOracle>,
        loader: Arc<dyn SharedRegionLoader>,
    ) -> Self {
        Self {
            config,
            oracle,
            loader,
            clock: Arc::new(SystemClock),
            registry: Registry::new(),
            last_known_pods: Mutex::new(None),
        }
    }

    /// Replace the wall clock used for grace period decisions.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Read handle on the registry; safe to use while a pass is running.
    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    /// Run one reconciliation pass.
    ///
    /// Passes are serialized. A fatal error abandons the rest of the pass but
    /// keeps the registry changes already made for earlier directories.
    ///
    /// When the pod query fails, only directories of pods seen in the last
    /// successful query are adopted and nothing is evicted.
    ///
    /// # Errors
    ///
    /// - [`MonitorError::ReadDirectory`] if the container path cannot be listed
    /// - [`MonitorError::Stat`] if a directory cannot be inspected
    /// - [`MonitorError::RemoveDirectory`] if an orphaned directory cannot be deleted
    /// - [`MonitorError::CacheLayout`] if a live directory has an unexpected layout
    #[tracing::instrument(skip(self), fields(node_name = %self.config.node_name))]
    pub async fn reconcile(&self) -> Result<PassSummary, Report<MonitorError>> {
        let mut last_known_pods = self.last_known_pods.lock().await;

        let entries = scanner::list_entries(&self.config.container_path)?;

        let roster = match self.oracle.list_pods_on_node(&self.config.node_name).await {
            Ok(pods) => {
                info!(pod_count = pods.len(), "Found pods on node");
                let roster = PodRoster::from_records(pods);
                *last_known_pods = roster.known_uids().cloned();
                roster
            }
            Err(e) => {
                error!(
                    has_previous_roster = last_known_pods.is_some(),
                    "Failed to get pods on node, eviction disabled for this pass: {e:?}"
                );
                PodRoster::stale((*last_known_pods).as_ref())
            }
        };

        let now = self.clock.now();
        let mut summary = PassSummary {
            scanned: entries.len(),
            eviction_enabled: roster.allows_eviction(),
            ..Default::default()
        };

        for entry in &entries {
            let metadata = match fs::metadata(&entry.path) {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %entry.path.display(), "Directory vanished before stat");
                    summary.vanished += 1;
                    continue;
                }
                Err(e) => {
                    return Err(Report::new(e).change_context(MonitorError::Stat {
                        path: entry.path.clone(),
                    }));
                }
            };

            if roster.admits(&entry.name) {
                self.adopt(entry, &mut summary).await?;
            } else {
                self.evict_if_expired(entry, &metadata, &roster, now, &mut summary)
                    .await?;
            }
        }

        let tracked = self.registry.len().await;
        debug!(tracked, "Monitored path map updated");
        Ok(summary)
    }

    async fn adopt(
        &self,
        entry: &DirEntryInfo,
        summary: &mut PassSummary,
    ) -> Result<(), Report<MonitorError>> {
        if self.registry.contains(&entry.path).await {
            return Ok(());
        }

        match locator::locate_and_load(&entry.path, self.loader.as_ref())? {
            Some(snapshot) => {
                info!(path = %entry.path.display(), "Adding container directory");
                self.registry
                    .insert(
                        entry.path.clone(),
                        TrackedContainer {
                            id: entry.name.clone(),
                            snapshot,
                        },
                    )
                    .await;
                summary.adopted += 1;
            }
            None => {
                debug!(path = %entry.path.display(), "Shared region not ready yet");
                summary.pending += 1;
            }
        }

        Ok(())
    }

    async fn evict_if_expired(
        &self,
        entry: &DirEntryInfo,
        metadata: &fs::Metadata,
        roster: &PodRoster,
        now: SystemTime,
        summary: &mut PassSummary,
    ) -> Result<(), Report<MonitorError>> {
        if !roster.allows_eviction() {
            summary.protected += 1;
            return Ok(());
        }

        let modified = metadata
            .modified()
            .change_context_lazy(|| MonitorError::Stat {
                path: entry.path.clone(),
            })?;
        // an mtime in the future counts as brand new
        let age = now.duration_since(modified).unwrap_or_default();
        if age < self.config.grace_period {
            debug!(
                path = %entry.path.display(),
                age_secs = age.as_secs(),
                "Orphaned directory still within grace period"
            );
            summary.protected += 1;
            return Ok(());
        }

        info!(path = %entry.path.display(), age_secs = age.as_secs(), "Removing orphaned directory");
        self.registry.remove(&entry.path).await;

        let removed = if metadata.is_dir() {
            fs::remove_dir_all(&entry.path)
        } else {
            fs::remove_file(&entry.path)
        };
        match removed {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                error!(path = %entry.path.display(), "Failed to remove directory: {e}");
                return Err(Report::new(e).change_context(MonitorError::RemoveDirectory {
                    path: entry.path.clone(),
                }));
            }
        }
        summary.evicted += 1;

        Ok(())
    }

    /// Reconcile every `interval` until `cancellation_token` fires.
    ///
    /// Failed passes are logged and retried on the next tick.
    pub async fn run(&self, interval: Duration, cancellation_token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            select! {
                _ = cancellation_token.cancelled() => {
                    info!("Reconciler shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    match self.reconcile().await {
                        Ok(summary) => {
                            info!(
                                scanned = summary.scanned,
                                adopted = summary.adopted,
                                evicted = summary.evicted,
                                pending = summary.pending,
                                protected = summary.protected,
                                eviction_enabled = summary.eviction_enabled,
                                "Reconciliation pass completed"
                            );
                            metrics::record_registry(&self.config.node_name, &self.registry).await;
                        }
                        Err(e) => {
                            error!(
                                node_name = %self.config.node_name,
                                "Reconciliation pass failed: {e:?}"
                            );
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use similar_asserts::assert_eq;

    use super::*;
    use crate::monitor::mock::write_cache;
    use crate::monitor::mock::MockClock;
    use crate::monitor::mock::MockOracle;
    use crate::monitor::model::SharedRegionSnapshot;
    use utils::shared_region::RegionFileLoader;

    const NODE: &str = "node-1";

    struct Fixture {
        _base: tempfile::TempDir,
        container_path: PathBuf,
        oracle: Arc<MockOracle>,
        clock: Arc<MockClock>,
        reconciler: Reconciler,
    }

    impl Fixture {
        fn new(uids: &[&str]) -> Self {
            let base = tempfile::tempdir().unwrap();
            let config = MonitorConfig::from_hook_path(base.path(), NODE);
            fs::create_dir(&config.container_path).unwrap();
            let container_path = config.container_path.clone();

            let oracle = Arc::new(MockOracle::new(uids));
            let clock = Arc::new(MockClock::new(SystemTime::now()));
            let reconciler = Reconciler::new(
                config,
                oracle.clone(),
                Arc::new(RegionFileLoader::default()),
            )
            .with_clock(clock.clone());

            Self {
                _base: base,
                container_path,
                oracle,
                clock,
                reconciler,
            }
        }

        /// Creates a container directory holding the hook artifact and a cache file.
        fn add_container(&self, name: &str, snapshot: SharedRegionSnapshot) -> PathBuf {
            let dir = self.container_path.join(name);
            fs::create_dir(&dir).unwrap();
            fs::write(dir.join("libvgpu.so.1"), b"").unwrap();
            write_cache(&dir, "xyz.cache", snapshot);
            dir
        }

        async fn tracked(&self, dir: &Path) -> Option<TrackedContainer> {
            self.reconciler.registry().get(dir).await
        }
    }

    fn snapshot(utilization_switch: i32, recent_kernel: i32, priority: i32) -> SharedRegionSnapshot {
        SharedRegionSnapshot {
            utilization_switch,
            recent_kernel,
            priority,
        }
    }

    #[test_log::test(tokio::test)]
    async fn adopts_directory_of_live_pod() {
        let fixture = Fixture::new(&["abc123"]);
        let dir = fixture.add_container("pod-abc123", snapshot(1, 42, 0));

        let summary = fixture.reconciler.reconcile().await.unwrap();

        assert_eq!(
            fixture.tracked(&dir).await,
            Some(TrackedContainer {
                id: "pod-abc123".to_string(),
                snapshot: snapshot(1, 42, 0),
            })
        );
        assert_eq!(summary.adopted, 1);
        assert_eq!(fixture.oracle.queried_nodes(), vec![NODE.to_string()]);
    }

    #[test_log::test(tokio::test)]
    async fn evicts_orphan_after_grace_period() {
        let fixture = Fixture::new(&["abc123"]);
        let dir = fixture.add_container("pod-abc123", snapshot(1, 42, 0));
        fixture.reconciler.reconcile().await.unwrap();

        fixture.oracle.set_pods(&[]);
        fixture.clock.advance(Duration::from_secs(6 * 60));
        let summary = fixture.reconciler.reconcile().await.unwrap();

        assert_eq!(fixture.tracked(&dir).await, None);
        assert!(!dir.exists());
        assert_eq!(summary.evicted, 1);
    }

    #[test_log::test(tokio::test)]
    async fn keeps_orphan_within_grace_period() {
        let fixture = Fixture::new(&["abc123"]);
        let dir = fixture.add_container("pod-abc123", snapshot(1, 42, 0));
        fixture.reconciler.reconcile().await.unwrap();
        let before = fixture.tracked(&dir).await;

        fixture.oracle.set_pods(&[]);
        fixture.clock.advance(Duration::from_secs(60));
        let summary = fixture.reconciler.reconcile().await.unwrap();

        assert!(before.is_some());
        assert_eq!(fixture.tracked(&dir).await, before);
        assert!(dir.exists());
        assert_eq!(summary.protected, 1);
        assert_eq!(summary.evicted, 0);
    }

    #[test_log::test(tokio::test)]
    async fn evicts_untracked_orphan_and_plain_files() {
        let fixture = Fixture::new(&[]);
        let dir = fixture.container_path.join("dead_main");
        fs::create_dir(&dir).unwrap();
        let stray = fixture.container_path.join("stray-file");
        fs::write(&stray, b"").unwrap();

        fixture.clock.advance(Duration::from_secs(301));
        let summary = fixture.reconciler.reconcile().await.unwrap();

        assert!(!dir.exists());
        assert!(!stray.exists());
        assert_eq!(summary.evicted, 2);
    }

    #[test_log::test(tokio::test)]
    async fn pod_query_failure_suppresses_eviction() {
        let fixture = Fixture::new(&["abc123"]);
        let dir = fixture.add_container("pod-abc123", snapshot(1, 42, 0));
        fixture.reconciler.reconcile().await.unwrap();
        let orphan = fixture.container_path.join("dead_main");
        fs::create_dir(&orphan).unwrap();

        fixture.oracle.set_error_mode(true);
        fixture.clock.advance(Duration::from_secs(3600));
        let summary = fixture.reconciler.reconcile().await.unwrap();

        assert!(!summary.eviction_enabled);
        assert_eq!(summary.evicted, 0);
        assert_eq!(summary.protected, 1);
        assert!(dir.exists());
        assert!(orphan.exists());
        assert!(fixture.tracked(&dir).await.is_some());
    }

    #[test_log::test(tokio::test)]
    async fn pod_query_failure_adopts_only_previously_known_pods() {
        let fixture = Fixture::new(&["live"]);
        fixture.reconciler.reconcile().await.unwrap();
        let live = fixture.add_container("live_main", snapshot(1, 1, 0));
        let dead = fixture.add_container("dead_main", snapshot(1, 2, 0));

        fixture.oracle.set_error_mode(true);
        let summary = fixture.reconciler.reconcile().await.unwrap();

        assert_eq!(summary.adopted, 1);
        assert!(fixture.tracked(&live).await.is_some());
        assert_eq!(fixture.tracked(&dead).await, None);
        assert!(dead.exists());
    }

    #[test_log::test(tokio::test)]
    async fn pod_query_failure_before_any_roster_adopts_nothing() {
        let fixture = Fixture::new(&["abc123"]);
        let dir = fixture.add_container("pod-abc123", snapshot(1, 42, 0));

        fixture.oracle.set_error_mode(true);
        let summary = fixture.reconciler.reconcile().await.unwrap();

        assert_eq!(summary.adopted, 0);
        assert_eq!(fixture.tracked(&dir).await, None);

        fixture.oracle.set_error_mode(false);
        let summary = fixture.reconciler.reconcile().await.unwrap();

        assert_eq!(summary.adopted, 1);
        assert!(fixture.tracked(&dir).await.is_some());
    }

    #[test_log::test(tokio::test)]
    async fn pod_query_failure_leaves_stray_entries_alone() {
        let fixture = Fixture::new(&["abc123"]);
        fixture.add_container("pod-abc123", snapshot(1, 42, 0));
        fixture.reconciler.reconcile().await.unwrap();
        let stray = fixture.container_path.join("stray-file2");
        fs::write(&stray, b"").unwrap();
        let crowded = fixture.container_path.join("crowded_main");
        fs::create_dir(&crowded).unwrap();
        for name in ["a.cache", "b.cache", "libvgpu.so"] {
            fs::write(crowded.join(name), b"").unwrap();
        }

        fixture.oracle.set_error_mode(true);
        let summary = fixture.reconciler.reconcile().await.unwrap();

        assert_eq!(summary.protected, 2);
        assert!(stray.exists());
        assert!(crowded.exists());
    }

    #[test_log::test(tokio::test)]
    async fn second_pass_without_changes_is_a_no_op() {
        let fixture = Fixture::new(&["abc123"]);
        let live = fixture.add_container("pod-abc123", snapshot(1, 42, 0));
        let young_orphan = fixture.add_container("pod-gone", snapshot(0, 1, 1));

        fixture.reconciler.reconcile().await.unwrap();
        let first = fixture.reconciler.registry().snapshot().await;
        let summary = fixture.reconciler.reconcile().await.unwrap();

        assert_eq!(fixture.reconciler.registry().snapshot().await, first);
        assert_eq!(summary.adopted, 0);
        assert_eq!(summary.evicted, 0);
        assert!(live.exists());
        assert!(young_orphan.exists());
    }

    #[test_log::test(tokio::test)]
    async fn layout_error_aborts_rest_of_pass() {
        let fixture = Fixture::new(&["aaa", "bbb", "ccc"]);
        let first = fixture.add_container("aaa_main", snapshot(1, 1, 1));
        let broken = fixture.add_container("bbb_main", snapshot(1, 2, 1));
        fs::write(broken.join("extra.cache"), b"").unwrap();
        let last = fixture.add_container("ccc_main", snapshot(1, 3, 1));

        let err = fixture.reconciler.reconcile().await.unwrap_err();

        assert!(matches!(
            err.current_context(),
            MonitorError::CacheLayout { entries: 3, .. }
        ));
        assert!(fixture.tracked(&first).await.is_some());
        assert_eq!(fixture.tracked(&broken).await, None);
        assert_eq!(fixture.tracked(&last).await, None);
    }

    #[test_log::test(tokio::test)]
    async fn pending_directory_is_adopted_once_cache_appears() {
        let fixture = Fixture::new(&["abc123"]);
        let dir = fixture.container_path.join("abc123_main");
        fs::create_dir(&dir).unwrap();

        let summary = fixture.reconciler.reconcile().await.unwrap();
        assert_eq!(summary.pending, 1);
        assert_eq!(fixture.tracked(&dir).await, None);

        fs::write(dir.join("libvgpu.so"), b"").unwrap();
        write_cache(&dir, "abc.cache", snapshot(0, 7, 2));
        let summary = fixture.reconciler.reconcile().await.unwrap();

        assert_eq!(summary.adopted, 1);
        assert_eq!(
            fixture.tracked(&dir).await.map(|tracked| tracked.snapshot),
            Some(snapshot(0, 7, 2))
        );
    }

    #[test_log::test(tokio::test)]
    async fn tracked_entry_is_not_refreshed() {
        let fixture = Fixture::new(&["abc123"]);
        let dir = fixture.add_container("pod-abc123", snapshot(1, 42, 0));
        fixture.reconciler.reconcile().await.unwrap();

        write_cache(&dir, "xyz.cache", snapshot(0, 99, 3));
        fixture.reconciler.reconcile().await.unwrap();

        assert_eq!(
            fixture.tracked(&dir).await.map(|tracked| tracked.snapshot),
            Some(snapshot(1, 42, 0))
        );
    }

    #[test_log::test(tokio::test)]
    async fn recreated_directory_starts_fresh() {
        let fixture = Fixture::new(&["abc123"]);
        let dir = fixture.add_container("pod-abc123", snapshot(1, 42, 0));
        fixture.reconciler.reconcile().await.unwrap();

        fixture.oracle.set_pods(&[]);
        fixture.clock.advance(Duration::from_secs(600));
        fixture.reconciler.reconcile().await.unwrap();
        assert!(!dir.exists());

        fixture.oracle.set_pods(&["abc123"]);
        fixture.add_container("pod-abc123", snapshot(1, 5, 4));
        fixture.reconciler.reconcile().await.unwrap();

        assert_eq!(
            fixture.tracked(&dir).await.map(|tracked| tracked.snapshot),
            Some(snapshot(1, 5, 4))
        );
    }

    #[test_log::test(tokio::test)]
    async fn missing_container_path_is_fatal() {
        let fixture = Fixture::new(&["abc123"]);
        fs::remove_dir(&fixture.container_path).unwrap();

        let err = fixture.reconciler.reconcile().await.unwrap_err();

        assert!(matches!(
            err.current_context(),
            MonitorError::ReadDirectory { .. }
        ));
        // the pass never got as far as the pod query
        assert!(fixture.oracle.queried_nodes().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn concurrent_passes_are_serialized() {
        let fixture = Fixture::new(&["abc123"]);
        let dir = fixture.add_container("pod-abc123", snapshot(1, 42, 0));

        let (first, second) = tokio::join!(
            fixture.reconciler.reconcile(),
            fixture.reconciler.reconcile()
        );

        let adopted = first.unwrap().adopted + second.unwrap().adopted;
        assert_eq!(adopted, 1);
        assert!(fixture.tracked(&dir).await.is_some());
    }

    #[test_log::test(tokio::test)]
    async fn run_loop_reconciles_until_cancelled() {
        let fixture = Fixture::new(&["abc123"]);
        let dir = fixture.add_container("pod-abc123", snapshot(1, 42, 0));
        let registry = fixture.reconciler.registry();
        let reconciler = Arc::new(fixture.reconciler);
        let token = CancellationToken::new();

        let handle = tokio::spawn({
            let reconciler = reconciler.clone();
            let token = token.clone();
            async move { reconciler.run(Duration::from_millis(10), token).await }
        });

        tokio::time::timeout(Duration::from_secs(5), async {
            while !registry.contains(&dir).await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("directory should be adopted by the run loop");

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("run loop should stop after cancellation")
            .unwrap();
    }

    #[test]
    fn config_from_hook_path() {
        let config = MonitorConfig::from_hook_path("/usr/local/vgpu", "node-a");

        assert_eq!(config.container_path, PathBuf::from("/usr/local/vgpu/containers"));
        assert_eq!(config.node_name, "node-a");
        assert_eq!(config.grace_period, Duration::from_secs(300));
    }
}
