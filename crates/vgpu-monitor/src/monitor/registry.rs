//! Registry of tracked container directories

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::model::TrackedContainer;

/// Map from container directory path to its tracked shared region.
///
/// Cloning yields another handle to the same map. Only the
/// [`Reconciler`](super::Reconciler) mutates it; any number of readers may
/// take snapshots concurrently with a running pass.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Arc<RwLock<HashMap<PathBuf, TrackedContainer>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy of every tracked container.
    pub async fn snapshot(&self) -> HashMap<PathBuf, TrackedContainer> {
        self.entries.read().await.clone()
    }

    pub async fn get(&self, path: &Path) -> Option<TrackedContainer> {
        self.entries.read().await.get(path).cloned()
    }

    pub async fn contains(&self, path: &Path) -> bool {
        self.entries.read().await.contains_key(path)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub(crate) async fn insert(&self, path: PathBuf, container: TrackedContainer) {
        self.entries.write().await.insert(path, container);
    }

    pub(crate) async fn remove(&self, path: &Path) -> Option<TrackedContainer> {
        self.entries.write().await.remove(path)
    }
}
