//! Registry metrics, written as `metrics.*` tracing events.
//!
//! The daemon's logging setup routes these targets to the metrics file in
//! InfluxDB line protocol; `tag_` fields become tags.

use crate::monitor::Registry;

/// Emit one `vgpu_container` point per tracked container.
pub(crate) async fn record_registry(node_name: &str, registry: &Registry) {
    let snapshot = registry.snapshot().await;

    for tracked in snapshot.values() {
        tracing::info!(
            target: "metrics.vgpu_container",
            tag_node = node_name,
            tag_container = tracked.id.as_str(),
            utilization_switch = tracked.snapshot.utilization_switch,
            recent_kernel = tracked.snapshot.recent_kernel,
            priority = tracked.snapshot.priority
        );
    }

    tracing::info!(
        target: "metrics.vgpu_registry",
        tag_node = node_name,
        tracked_containers = snapshot.len() as u64
    );
}
