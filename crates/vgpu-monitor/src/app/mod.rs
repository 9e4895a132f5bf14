pub mod tasks;

use std::sync::Arc;

use anyhow::Result;
use error_stack::ResultExt;
use utils::shared_region::RegionFileLoader;

use crate::config::DaemonArgs;
use crate::config::MonitorArgs;
use crate::k8s::KubePodOracle;
use crate::monitor::Reconciler;
pub use tasks::Tasks;

/// Build a reconciler backed by the Kubernetes API and the file region loader.
pub async fn build_reconciler(args: &MonitorArgs) -> Result<Reconciler> {
    let config = args.monitor_config();
    tracing::info!(
        container_path = %config.container_path.display(),
        node_name = %config.node_name,
        grace_period_secs = config.grace_period.as_secs(),
        "Building reconciler"
    );

    let oracle = KubePodOracle::init(args.kubeconfig.as_deref())
        .await
        .attach_printable_lazy(|| format!("pod oracle for node {}", config.node_name))
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;
    let loader = RegionFileLoader::new(args.region_layout());

    Ok(Reconciler::new(config, Arc::new(oracle), Arc::new(loader)))
}

/// Application core structure, managing all components
pub struct Application {
    pub reconciler: Arc<Reconciler>,
    pub daemon_args: DaemonArgs,
}

impl Application {
    /// Build all application components
    pub async fn build(daemon_args: DaemonArgs) -> Result<Self> {
        tracing::info!("Building application components...");

        let reconciler = Arc::new(build_reconciler(&daemon_args.monitor).await?);

        Ok(Self {
            reconciler,
            daemon_args,
        })
    }

    /// Run application, start all tasks and wait for completion
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Starting all application tasks...");

        let tasks = Tasks::spawn(self);
        tracing::info!("All application tasks started successfully");

        if let Err(e) = tasks.wait_for_completion().await {
            tracing::error!("Error during task execution: {}", e);
            return Err(e);
        }

        tracing::info!("Application run completed");
        Ok(())
    }
}
