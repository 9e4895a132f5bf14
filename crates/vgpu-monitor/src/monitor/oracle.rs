use error_stack::Report;

use super::model::PodRecord;
use super::MonitorError;

/// Answers which pods are currently scheduled to a node.
///
/// Implementations must filter by node on the server side. A failure is
/// reported as [`MonitorError::PodQuery`] and never as an empty list.
#[async_trait::async_trait]
pub trait PodLivenessOracle: Send + Sync {
    async fn list_pods_on_node(
        &self,
        node_name: &str,
    ) -> Result<Vec<PodRecord>, Report<MonitorError>>;
}
