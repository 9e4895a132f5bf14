//! HTTP API for reading the container registry
//!
//! Other on-node components (metrics exporters, enforcement agents) read the
//! set of tracked vGPU shared regions through this API. It never mutates the
//! registry.
//!
//! # API Endpoints
//!
//! - `GET /api/v1/containers` - All tracked containers, sorted by directory path
//! - `GET /healthz` - Liveness probe
//!
//! Example response of `/api/v1/containers`:
//! ```json
//! [
//!   {
//!     "path": "/usr/local/vgpu/containers/pod-abc123",
//!     "id": "pod-abc123",
//!     "snapshot": { "utilization_switch": 1, "recent_kernel": 42, "priority": 0 }
//!   }
//! ]
//! ```

use core::error::Error;

pub mod handlers;
pub mod server;

pub use handlers::ContainerView;
pub use server::ApiServer;

/// API errors
#[derive(Debug, derive_more::Display)]
pub enum ApiError {
    #[display("Server error: {message}")]
    ServerError { message: String },
}

impl Error for ApiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display_formatting() {
        let server_error = ApiError::ServerError {
            message: "address in use".to_string(),
        };
        assert_eq!(server_error.to_string(), "Server error: address in use");
    }
}
