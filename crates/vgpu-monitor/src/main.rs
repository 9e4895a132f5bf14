use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use utils::version;
use vgpu_monitor::api::ContainerView;
use vgpu_monitor::app;
use vgpu_monitor::app::Application;
use vgpu_monitor::config::Cli;
use vgpu_monitor::config::Commands;
use vgpu_monitor::config::DaemonArgs;
use vgpu_monitor::config::MonitorArgs;
use vgpu_monitor::logging;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon(daemon_args) => run_daemon(daemon_args).await,
        Commands::ReconcileOnce(monitor_args) => run_once(monitor_args).await,
    }
}

async fn run_daemon(daemon_args: DaemonArgs) -> Result<()> {
    let _guard = logging::init(&daemon_args.metrics_file)?;

    tracing::info!("Starting vgpu-monitor daemon {}", &**version::VERSION);

    let app = Application::build(daemon_args).await?;
    app.run().await
}

async fn run_once(monitor_args: MonitorArgs) -> Result<()> {
    utils::logging::init();

    let reconciler = app::build_reconciler(&monitor_args).await?;
    let summary = reconciler
        .reconcile()
        .await
        .map_err(|e| anyhow::anyhow!("{e:?}"))
        .context("reconciliation pass failed")?;
    tracing::info!(?summary, "Reconciliation pass completed");

    let containers = ContainerView::collect(&reconciler.registry()).await;
    println!("{}", serde_json::to_string_pretty(&containers)?);
    Ok(())
}
