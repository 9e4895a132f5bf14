//! Kubernetes integration module.
//!
//! Provides the [`KubePodOracle`], which answers the reconciler's "which pods
//! are scheduled to this node" question from the cluster API.

pub(crate) mod pod_oracle;

use core::error::Error;

pub use pod_oracle::KubePodOracle;

/// Errors that can occur during Kubernetes operations.
#[derive(Debug, derive_more::Display)]
pub enum KubernetesError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("Failed to list pods: {message}")]
    ListFailed { message: String },
}

impl Error for KubernetesError {}
