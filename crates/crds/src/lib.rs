//! Metal CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the bare-metal lifecycle
//! controllers: servers, their bindings, server classes and boot
//! environments, plus the helpers that operate on them.

pub mod conditions;
pub mod config_patch;
pub mod environment;
pub mod error;
pub mod hardware;
pub mod references;
pub mod server;
pub mod server_binding;
pub mod server_class;

pub use conditions::{Condition, ConditionStatus};
pub use config_patch::*;
pub use environment::*;
pub use error::CrdError;
pub use hardware::*;
pub use references::*;
pub use server::*;
pub use server_binding::*;
pub use server_class::*;

/// API group shared by every metal CRD.
pub const API_GROUP: &str = "metal.dcops.microscaler.io";
