//! Agent RPC
//!
//! Contract between the agent running on a freshly booted machine and the
//! metal controller: registration, address reports, wipe heartbeats, wipe
//! completion and BMC discovery results. Calls are JSON over HTTP; the
//! agent side retries transport failures on a constant interval.

pub mod client;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod retry;
pub mod server;
#[path = "trait.rs"]
pub mod agent_trait;
pub mod types;

pub use agent_trait::AgentApi;
pub use client::AgentClient;
pub use error::AgentApiError;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockAgentApi;
pub use retry::RetryPolicy;
pub use server::router;
pub use types::*;
