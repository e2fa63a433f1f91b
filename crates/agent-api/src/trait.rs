//! AgentApi trait
//!
//! Implemented by the HTTP client on the agent, by the controller's RPC
//! service, and by the mock used in tests.

use crate::error::AgentApiError;
use crate::types::{
    BmcInfoRequest, HeartbeatRequest, RegisterRequest, RegisterResponse, ReportAddressesRequest, WipeCompleteRequest,
};

#[async_trait::async_trait]
pub trait AgentApi: Send + Sync {
    /// Creates the server record on first contact and returns the
    /// directives for the agent.
    async fn register(&self, req: RegisterRequest) -> Result<RegisterResponse, AgentApiError>;

    /// Merges discovered addresses into the server status.
    async fn report_addresses(&self, req: ReportAddressesRequest) -> Result<(), AgentApiError>;

    /// Keeps the current wipe episode alive.
    async fn heartbeat(&self, req: HeartbeatRequest) -> Result<(), AgentApiError>;

    async fn report_wipe_complete(&self, req: WipeCompleteRequest) -> Result<(), AgentApiError>;

    /// Stores the discovered BMC endpoint and generated credentials.
    async fn report_bmc_info(&self, req: BmcInfoRequest) -> Result<(), AgentApiError>;
}
