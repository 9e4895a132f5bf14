use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Api;
use kube::Client;
use kube::Config;
use tracing::debug;
use tracing::warn;

use super::KubernetesError;
use crate::monitor::MonitorError;
use crate::monitor::PodLivenessOracle;
use crate::monitor::PodRecord;

/// Lists the pods of a node through the Kubernetes API.
pub struct KubePodOracle {
    client: Client,
}

impl KubePodOracle {
    /// Connect using `kubeconfig`, or the in-cluster / `~/.kube/config`
    /// configuration when no path is given.
    ///
    /// # Errors
    ///
    /// - [`KubernetesError::ConnectionFailed`] if no client configuration can be loaded
    pub async fn init(kubeconfig: Option<&Path>) -> Result<Self, Report<KubernetesError>> {
        let config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).change_context_lazy(|| {
                    KubernetesError::ConnectionFailed {
                        message: format!("pod oracle cannot read kubeconfig {}", path.display()),
                    }
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .change_context_lazy(|| KubernetesError::ConnectionFailed {
                        message: format!("pod oracle cannot use kubeconfig {}", path.display()),
                    })?
            }
            None => Config::infer()
                .await
                .change_context_lazy(|| KubernetesError::ConnectionFailed {
                    message: "pod oracle found no in-cluster or local kubeconfig".to_string(),
                })?,
        };

        let cluster_url = config.cluster_url.to_string();
        let client = Client::try_from(config).change_context_lazy(|| {
            KubernetesError::ConnectionFailed {
                message: format!("pod oracle cannot build a client for {cluster_url}"),
            }
        })?;
        debug!(%cluster_url, "Pod oracle client created");

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl PodLivenessOracle for KubePodOracle {
    async fn list_pods_on_node(
        &self,
        node_name: &str,
    ) -> Result<Vec<PodRecord>, Report<MonitorError>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let selector = node_selector(node_name);
        let params = ListParams::default().fields(&selector);

        let pods = api
            .list(&params)
            .await
            .change_context_lazy(|| KubernetesError::ListFailed {
                message: format!("field selector {selector}"),
            })
            .change_context_lazy(|| MonitorError::PodQuery {
                node_name: node_name.to_string(),
            })?;

        debug!(node_name = %node_name, pod_count = pods.items.len(), "Listed pods");
        Ok(pod_records(pods.items))
    }
}

fn node_selector(node_name: &str) -> String {
    format!("spec.nodeName={node_name}")
}

/// Pod UIDs of `pods`; pods without a UID are skipped.
fn pod_records(pods: impl IntoIterator<Item = Pod>) -> Vec<PodRecord> {
    pods.into_iter()
        .filter_map(|pod| match pod.metadata.uid {
            Some(uid) => Some(PodRecord::new(uid)),
            None => {
                warn!(pod_name = ?pod.metadata.name, "Pod without UID ignored");
                None
            }
        })
        .collect()
}
