use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use futures::future::select_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Application;
use crate::api::ApiServer;

/// How long tasks get to finish once shutdown starts.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// The reconcile loop and, when enabled, the registry API server.
pub struct Tasks {
    tasks: Vec<JoinHandle<()>>,
    cancellation_token: CancellationToken,
}

impl Tasks {
    /// Spawn the daemon's tasks for `app`.
    pub fn spawn(app: &Application) -> Self {
        let cancellation_token = CancellationToken::new();
        let mut tasks = vec![spawn_reconcile_task(app, cancellation_token.clone())];
        if app.daemon_args.enable_api {
            tasks.push(spawn_api_server_task(app, cancellation_token.clone()));
        }

        Self {
            tasks,
            cancellation_token,
        }
    }

    /// Run until a shutdown signal arrives or a task exits on its own.
    ///
    /// Either way the remaining tasks are cancelled.
    pub async fn wait_for_completion(mut self) -> Result<()> {
        tokio::select! {
            signal = shutdown_signal() => {
                signal?;
                self.cancellation_token.cancel();
                self.drain().await;
                Ok(())
            }
            (result, _, _) = select_all(&mut self.tasks) => {
                self.cancellation_token.cancel();
                match result {
                    Ok(()) => {
                        tracing::warn!("Task exited before shutdown was requested");
                        Ok(())
                    }
                    Err(e) => {
                        tracing::error!("Task failed: {e}");
                        Err(e.into())
                    }
                }
            }
        }
    }

    async fn drain(self) {
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, join_all(self.tasks)).await {
            Ok(results) => {
                for e in results.into_iter().filter_map(Result::err) {
                    tracing::error!("Task failed during shutdown: {e}");
                }
            }
            Err(_) => tracing::warn!("Tasks still running after {:?}", SHUTDOWN_TIMEOUT),
        }
    }
}

/// Resolves on SIGTERM or SIGINT.
#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::signal;
    use tokio::signal::unix::SignalKind;

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
        _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down"),
    }
    Ok(())
}

/// Resolves on Ctrl+C.
#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl+C, shutting down");
    Ok(())
}

fn spawn_reconcile_task(app: &Application, token: CancellationToken) -> JoinHandle<()> {
    let reconciler = app.reconciler.clone();
    let interval = app.daemon_args.reconcile_interval();

    tokio::spawn(async move {
        tracing::info!("Starting reconcile task, interval {:?}", interval);
        reconciler.run(interval, token).await;
        tracing::info!("Reconcile task completed");
    })
}

fn spawn_api_server_task(app: &Application, token: CancellationToken) -> JoinHandle<()> {
    let api_server = ApiServer::new(
        app.reconciler.registry(),
        app.daemon_args.api_listen_addr.clone(),
    );

    tokio::spawn(async move {
        if let Err(e) = api_server.run(token).await {
            tracing::error!("API server failed: {e:?}");
        } else {
            tracing::info!("API server completed");
        }
    })
}
