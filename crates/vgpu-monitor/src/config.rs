use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use utils::shared_region::RegionLayout;
use utils::version;

use crate::monitor::MonitorConfig;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the reconciler periodically and serve the registry API
    Daemon(DaemonArgs),
    /// Run a single reconciliation pass and print the registry as JSON
    #[command(name = "reconcile-once")]
    ReconcileOnce(MonitorArgs),
}

/// Options shared by every command that reconciles
#[derive(Args, Debug, Clone)]
pub struct MonitorArgs {
    #[arg(
        long,
        env = "HOOK_PATH",
        value_hint = clap::ValueHint::DirPath,
        default_value = "/usr/local/vgpu",
        help = "Hook install path; container directories live under <HOOK_PATH>/containers"
    )]
    pub hook_path: PathBuf,

    #[arg(
        long,
        env = "NODE_NAME",
        help = "Node name for filtering pods to this node only"
    )]
    pub node_name: String,

    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        default_value = "300",
        help = "Seconds an orphaned container directory must be unmodified before it is removed"
    )]
    pub grace_period_secs: u64,

    #[arg(
        long,
        default_value = "0",
        help = "Byte offset of the utilization switch in the shared region cache file"
    )]
    pub utilization_switch_offset: u64,

    #[arg(
        long,
        default_value = "4",
        help = "Byte offset of the recent kernel counter in the shared region cache file"
    )]
    pub recent_kernel_offset: u64,

    #[arg(
        long,
        default_value = "8",
        help = "Byte offset of the priority in the shared region cache file"
    )]
    pub priority_offset: u64,
}

impl MonitorArgs {
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            grace_period: Duration::from_secs(self.grace_period_secs),
            ..MonitorConfig::from_hook_path(&self.hook_path, &self.node_name)
        }
    }

    pub fn region_layout(&self) -> RegionLayout {
        RegionLayout {
            utilization_switch_offset: self.utilization_switch_offset,
            recent_kernel_offset: self.recent_kernel_offset,
            priority_offset: self.priority_offset,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct DaemonArgs {
    #[command(flatten)]
    pub monitor: MonitorArgs,

    #[arg(
        long,
        default_value = "5",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Seconds between reconciliation passes"
    )]
    pub reconcile_interval_secs: u64,

    #[arg(
        long,
        env = "VGPU_METRICS_FILE",
        value_hint = clap::ValueHint::FilePath,
        default_value = "/logs/metrics.log",
        help = "Path for printing registry metrics, e.g. /logs/metrics.log"
    )]
    pub metrics_file: PathBuf,

    #[arg(
        long,
        help = "Serve the registry over HTTP",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub enable_api: bool,

    #[arg(
        long,
        env = "API_LISTEN_ADDR",
        default_value = "0.0.0.0:8080",
        help = "HTTP API server listen address"
    )]
    pub api_listen_addr: String,
}

impl DaemonArgs {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}
