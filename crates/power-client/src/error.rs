//! Power management errors

use thiserror::Error;

/// Errors that can occur while driving a server's power through its
/// management transport.
#[derive(Debug, Error)]
pub enum PowerError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Management API answered with a non-200 status
    #[error("API error: {0}")]
    Api(String),

    /// Failure injected by the failure dice
    #[error("simulated failure from the power management")]
    SimulatedFailure,

    /// IPMI command failed or returned an unexpected payload
    #[error("IPMI error: {0}")]
    Ipmi(String),

    /// Credentials could not be resolved
    #[error("credential error: {0}")]
    Credentials(String),

    /// Local I/O error (spawning the IPMI tool)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
