use poem::handler;
use poem::web::Data;
use poem::web::Json;
use serde::Deserialize;
use serde::Serialize;

use crate::monitor::model::SharedRegionSnapshot;
use crate::monitor::Registry;

/// One registry entry as rendered by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerView {
    pub path: String,
    pub id: String,
    pub snapshot: SnapshotView,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotView {
    pub utilization_switch: i32,
    pub recent_kernel: i32,
    pub priority: i32,
}

impl From<SharedRegionSnapshot> for SnapshotView {
    fn from(snapshot: SharedRegionSnapshot) -> Self {
        Self {
            utilization_switch: snapshot.utilization_switch,
            recent_kernel: snapshot.recent_kernel,
            priority: snapshot.priority,
        }
    }
}

impl ContainerView {
    /// Every tracked container, sorted by directory path.
    pub async fn collect(registry: &Registry) -> Vec<ContainerView> {
        let mut containers: Vec<ContainerView> = registry
            .snapshot()
            .await
            .into_iter()
            .map(|(path, tracked)| ContainerView {
                path: path.display().to_string(),
                id: tracked.id,
                snapshot: tracked.snapshot.into(),
            })
            .collect();
        containers.sort_by(|a, b| a.path.cmp(&b.path));
        containers
    }
}

/// List every tracked container
#[handler]
pub async fn list_containers(registry: Data<&Registry>) -> Json<Vec<ContainerView>> {
    Json(ContainerView::collect(registry.0).await)
}

#[handler]
pub fn healthz() -> &'static str {
    "ok"
}
