use std::io;
use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use tracing::debug;
use tracing::error;
use tracing::info;
use utils::shared_region::RegionFileLoader;

use super::model::SharedRegionSnapshot;
use super::scanner;
use super::MonitorError;

/// File name fragment of the injected hook runtime library.
pub(crate) const HOOK_ARTIFACT_PATTERN: &str = "libvgpu.so";
/// File name fragment of the shared region accounting cache.
pub(crate) const CACHE_FILE_PATTERN: &str = ".cache";
/// A container directory holds the hook artifact and one cache file at most.
const MAX_CONTAINER_ENTRIES: usize = 2;

/// Parses a container's accounting cache file.
pub trait SharedRegionLoader: Send + Sync {
    /// # Errors
    ///
    /// - [`MonitorError::CacheParse`] if the file is unreadable or malformed
    fn load(&self, path: &Path) -> Result<SharedRegionSnapshot, Report<MonitorError>>;
}

impl SharedRegionLoader for RegionFileLoader {
    fn load(&self, path: &Path) -> Result<SharedRegionSnapshot, Report<MonitorError>> {
        RegionFileLoader::load(self, path).change_context_lazy(|| MonitorError::CacheParse {
            path: path.to_path_buf(),
        })
    }
}

/// Finds the accounting cache in `dir` and loads it.
///
/// Returns `Ok(None)` when the directory is not ready yet: it is empty, it
/// holds no cache file, the loader rejected the cache, or the directory
/// disappeared. All of these are retried on the next pass.
///
/// # Errors
///
/// - [`MonitorError::CacheLayout`] if the directory has more entries than expected
/// - [`MonitorError::ReadDirectory`] if the directory cannot be listed
pub(crate) fn locate_and_load(
    dir: &Path,
    loader: &dyn SharedRegionLoader,
) -> Result<Option<SharedRegionSnapshot>, Report<MonitorError>> {
    debug!(path = %dir.display(), "Checking container directory");

    let entries = match scanner::list_entries(dir) {
        Ok(entries) => entries,
        Err(report) if is_not_found(&report) => {
            debug!(path = %dir.display(), "Container directory vanished before it could be read");
            return Ok(None);
        }
        Err(report) => return Err(report),
    };

    if entries.len() > MAX_CONTAINER_ENTRIES {
        return Err(Report::new(MonitorError::CacheLayout {
            path: dir.to_path_buf(),
            entries: entries.len(),
        })
        .attach_printable(format!(
            "entries: {:?}",
            entries.iter().map(|e| e.name.as_str()).collect::<Vec<_>>()
        )));
    }

    let Some(cache) = entries.iter().find(|entry| {
        !entry.name.contains(HOOK_ARTIFACT_PATTERN) && entry.name.contains(CACHE_FILE_PATTERN)
    }) else {
        return Ok(None);
    };

    match loader.load(&cache.path) {
        Ok(snapshot) => {
            info!(
                path = %cache.path.display(),
                utilization_switch = snapshot.utilization_switch,
                recent_kernel = snapshot.recent_kernel,
                priority = snapshot.priority,
                "Loaded shared region"
            );
            Ok(Some(snapshot))
        }
        Err(e) => {
            error!(path = %cache.path.display(), "Failed to load shared region: {e:?}");
            Ok(None)
        }
    }
}

fn is_not_found(report: &Report<MonitorError>) -> bool {
    report
        .frames()
        .filter_map(|frame| frame.downcast_ref::<io::Error>())
        .any(|e| e.kind() == io::ErrorKind::NotFound)
}
