//! Controller-specific error types.
//!
//! Power management failures are not errors here: the server reconciler
//! records them as events and requeues. What ends up in [`ControllerError`]
//! is store, watch and startup trouble.

use crds::CrdError;
use kube::Error as KubeError;
use metal_store::StoreError;
use pxe_server::PxeError;
use thiserror::Error;

/// Errors that can occur in the metal controller manager.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Record store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Boot server failed
    #[error("PXE server error: {0}")]
    Pxe(#[from] PxeError),

    /// Selector or qualifier evaluation failed
    #[error("Invalid resource: {0}")]
    Crd(#[from] CrdError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}
