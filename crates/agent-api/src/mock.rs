//! Mock AgentApi for unit testing
//!
//! Records every request and answers registration with a configurable
//! response.

use crate::agent_trait::AgentApi;
use crate::error::AgentApiError;
use crate::types::{
    BmcInfoRequest, HeartbeatRequest, RegisterRequest, RegisterResponse, ReportAddressesRequest, WipeCompleteRequest,
};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Calls {
    registrations: Vec<RegisterRequest>,
    addresses: Vec<ReportAddressesRequest>,
    heartbeats: Vec<HeartbeatRequest>,
    wipes: Vec<WipeCompleteRequest>,
    bmc: Vec<BmcInfoRequest>,
}

/// Mock agent API. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockAgentApi {
    calls: Arc<Mutex<Calls>>,
    register_response: Arc<Mutex<RegisterResponse>>,
    not_found: Arc<Mutex<bool>>,
    fail_heartbeats: Arc<Mutex<bool>>,
}

impl MockAgentApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_register_response(&self, resp: RegisterResponse) {
        *self.register_response.lock().unwrap() = resp;
    }

    /// Every call fails as if the server record did not exist.
    pub fn fail_with_not_found(&self) {
        *self.not_found.lock().unwrap() = true;
    }

    /// Heartbeats fail with a transport-like error.
    pub fn fail_heartbeats(&self) {
        *self.fail_heartbeats.lock().unwrap() = true;
    }

    pub fn registrations(&self) -> Vec<RegisterRequest> {
        self.calls.lock().unwrap().registrations.clone()
    }

    pub fn address_reports(&self) -> Vec<ReportAddressesRequest> {
        self.calls.lock().unwrap().addresses.clone()
    }

    pub fn heartbeat_count(&self) -> usize {
        self.calls.lock().unwrap().heartbeats.len()
    }

    pub fn wipe_reports(&self) -> Vec<WipeCompleteRequest> {
        self.calls.lock().unwrap().wipes.clone()
    }

    pub fn bmc_reports(&self) -> Vec<BmcInfoRequest> {
        self.calls.lock().unwrap().bmc.clone()
    }

    fn check(&self, uuid: &str) -> Result<(), AgentApiError> {
        if *self.not_found.lock().unwrap() {
            return Err(AgentApiError::NotFound(uuid.to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl AgentApi for MockAgentApi {
    async fn register(&self, req: RegisterRequest) -> Result<RegisterResponse, AgentApiError> {
        self.check(req.uuid())?;
        self.calls.lock().unwrap().registrations.push(req);
        Ok(self.register_response.lock().unwrap().clone())
    }

    async fn report_addresses(&self, req: ReportAddressesRequest) -> Result<(), AgentApiError> {
        self.check(&req.uuid)?;
        self.calls.lock().unwrap().addresses.push(req);
        Ok(())
    }

    async fn heartbeat(&self, req: HeartbeatRequest) -> Result<(), AgentApiError> {
        self.check(&req.uuid)?;
        self.calls.lock().unwrap().heartbeats.push(req);
        if *self.fail_heartbeats.lock().unwrap() {
            return Err(AgentApiError::Timeout);
        }
        Ok(())
    }

    async fn report_wipe_complete(&self, req: WipeCompleteRequest) -> Result<(), AgentApiError> {
        self.check(&req.uuid)?;
        self.calls.lock().unwrap().wipes.push(req);
        Ok(())
    }

    async fn report_bmc_info(&self, req: BmcInfoRequest) -> Result<(), AgentApiError> {
        self.check(&req.uuid)?;
        self.calls.lock().unwrap().bmc.push(req);
        Ok(())
    }
}
