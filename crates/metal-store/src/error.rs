//! Resource store errors

use thiserror::Error;

/// Errors returned by a [`crate::MetalStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object changed since it was read
    #[error("conflict updating {kind} {name}: object has been modified")]
    Conflict { kind: &'static str, name: String },

    /// The object does not exist
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// The object already exists
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    /// Secret value is not valid UTF-8
    #[error("secret {name} key {key} is not valid UTF-8")]
    InvalidSecret { name: String, key: String },

    /// Watch stream failed
    #[error("watch failed: {0}")]
    Watch(String),

    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
