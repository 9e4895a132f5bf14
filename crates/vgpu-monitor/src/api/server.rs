use error_stack::Report;
use poem::get;
use poem::listener::TcpListener;
use poem::middleware::Tracing;
use poem::Endpoint;
use poem::EndpointExt;
use poem::Route;
use poem::Server;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;

use super::handlers::healthz;
use super::handlers::list_containers;
use super::ApiError;
use crate::monitor::Registry;

/// HTTP API server exposing the container registry read-only
pub struct ApiServer {
    registry: Registry,
    listen_addr: String,
}

impl ApiServer {
    pub fn new(registry: Registry, listen_addr: String) -> Self {
        Self {
            registry,
            listen_addr,
        }
    }

    fn routes(&self) -> impl Endpoint {
        Route::new()
            .at("/api/v1/containers", get(list_containers))
            .at("/healthz", get(healthz))
            .data(self.registry.clone())
            .with(Tracing)
    }

    /// Start the API server
    ///
    /// # Errors
    ///
    /// - [`ApiError::ServerError`] if the server fails to start or bind to the address
    pub async fn run(self, cancellation_token: CancellationToken) -> Result<(), Report<ApiError>> {
        info!("Starting HTTP API server on {}", self.listen_addr);

        let app = self.routes();
        let listener = TcpListener::bind(&self.listen_addr);
        let server = Server::new(listener);

        tokio::select! {
            result = server.run(app) => {
                match result {
                    Ok(()) => {
                        info!("API server stopped normally");
                        Ok(())
                    }
                    Err(e) => {
                        error!("API server failed: {e}");
                        Err(Report::new(ApiError::ServerError {
                            message: format!("Server failed: {e}"),
                        }))
                    }
                }
            }
            _ = cancellation_token.cancelled() => {
                info!("API server shutdown requested");
                Ok(())
            }
        }
    }
}
