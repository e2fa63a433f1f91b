//! Agent errors.
//!
//! Every variant is fatal to the boot it happens in except BMC errors,
//! which are logged and skipped.

use agent_api::AgentApiError;
use power_client::PowerError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Required kernel command line argument absent
    #[error("kernel argument {0} not found")]
    MissingArgument(&'static str),

    #[error("invalid kernel argument {arg}: {value:?}")]
    InvalidArgument { arg: &'static str, value: String },

    #[error("RPC error: {0}")]
    Api(#[from] AgentApiError),

    #[error("failed wiping {path:?}: {source}")]
    Wipe {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("wipe task failed: {0}")]
    WipeTask(String),

    #[error("BMC error: {0}")]
    Bmc(#[from] PowerError),

    #[error("command {command} failed: {reason}")]
    Command { command: String, reason: String },

    #[error("interface {0} did not appear")]
    InterfaceTimeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
