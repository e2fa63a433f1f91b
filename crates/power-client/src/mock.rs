//! Mock power clients for unit testing
//!
//! Records every call so tests of the server controller can assert on the
//! exact sequence of power actions, without a BMC or management API.

use crate::error::PowerError;
use crate::factory::PowerClientFactory;
use crate::ipmi::{IpmiRequest, IpmiTransport};
use crate::power_trait::PowerClient;
use crds::{PxeMode, ServerSpec};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// A power call observed by [`MockPowerClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerAction {
    PowerOn,
    PowerOff,
    PowerCycle,
    SetPxe(PxeMode),
    Close,
}

#[derive(Debug, Default)]
struct MockState {
    actions: Vec<PowerAction>,
    powered_on: bool,
    status_error: bool,
    failing: HashSet<PowerAction>,
}

/// Mock power client. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockPowerClient {
    state: Arc<Mutex<MockState>>,
    fake: bool,
}

impl MockPowerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock that reports itself as the fake client.
    pub fn fake() -> Self {
        Self {
            fake: true,
            ..Self::default()
        }
    }

    pub fn set_powered_on(&self, on: bool) {
        self.state.lock().unwrap().powered_on = on;
    }

    /// Make `is_powered_on` return an error.
    pub fn fail_status(&self) {
        self.state.lock().unwrap().status_error = true;
    }

    /// Make `action` return an error.
    pub fn fail_on(&self, action: PowerAction) {
        self.state.lock().unwrap().failing.insert(action);
    }

    /// Calls recorded so far, `Close` included.
    pub fn actions(&self) -> Vec<PowerAction> {
        self.state.lock().unwrap().actions.clone()
    }

    /// Recorded calls that change power or boot state.
    pub fn power_actions(&self) -> Vec<PowerAction> {
        self.actions()
            .into_iter()
            .filter(|a| *a != PowerAction::Close)
            .collect()
    }

    fn record(&self, action: PowerAction) -> Result<(), PowerError> {
        let mut state = self.state.lock().unwrap();
        state.actions.push(action);
        if state.failing.contains(&action) {
            return Err(PowerError::Api(format!("mock failure for {action:?}")));
        }
        match action {
            PowerAction::PowerOn | PowerAction::PowerCycle => state.powered_on = true,
            PowerAction::PowerOff => state.powered_on = false,
            PowerAction::SetPxe(_) | PowerAction::Close => {}
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl PowerClient for MockPowerClient {
    async fn power_on(&self) -> Result<(), PowerError> {
        self.record(PowerAction::PowerOn)
    }

    async fn power_off(&self) -> Result<(), PowerError> {
        self.record(PowerAction::PowerOff)
    }

    async fn power_cycle(&self) -> Result<(), PowerError> {
        self.record(PowerAction::PowerCycle)
    }

    async fn is_powered_on(&self) -> Result<bool, PowerError> {
        let state = self.state.lock().unwrap();
        if state.status_error {
            return Err(PowerError::Api("mock status failure".to_string()));
        }
        Ok(state.powered_on)
    }

    async fn set_pxe(&self, mode: PxeMode) -> Result<(), PowerError> {
        self.record(PowerAction::SetPxe(mode))
    }

    fn is_fake(&self) -> bool {
        self.fake
    }

    async fn close(&self) -> Result<(), PowerError> {
        self.record(PowerAction::Close)
    }
}

/// Factory handing out a shared [`MockPowerClient`], or a per-server one
/// registered with [`MockPowerClientFactory::insert`].
#[derive(Debug, Clone, Default)]
pub struct MockPowerClientFactory {
    default: MockPowerClient,
    by_endpoint: Arc<Mutex<HashMap<String, MockPowerClient>>>,
}

impl MockPowerClientFactory {
    pub fn new(default: MockPowerClient) -> Self {
        Self {
            default,
            by_endpoint: Arc::default(),
        }
    }

    /// Route servers whose BMC or API endpoint is `endpoint` to `client`.
    pub fn insert(&self, endpoint: impl Into<String>, client: MockPowerClient) {
        self.by_endpoint.lock().unwrap().insert(endpoint.into(), client);
    }

    pub fn client(&self) -> MockPowerClient {
        self.default.clone()
    }
}

#[async_trait::async_trait]
impl PowerClientFactory for MockPowerClientFactory {
    async fn client_for(&self, spec: &ServerSpec) -> Result<Box<dyn PowerClient>, PowerError> {
        let endpoint = spec
            .bmc
            .as_ref()
            .map(|b| b.endpoint.clone())
            .or_else(|| spec.management_api.as_ref().map(|a| a.endpoint.clone()));

        let client = endpoint
            .and_then(|e| self.by_endpoint.lock().unwrap().get(&e).cloned())
            .unwrap_or_else(|| self.default.clone());
        Ok(Box::new(client))
    }
}

/// IPMI transport answering from a table keyed by `(netfn, cmd)`.
#[derive(Debug, Clone, Default)]
pub struct MockIpmiTransport {
    replies: Arc<Mutex<HashMap<(u8, u8), Result<Vec<u8>, String>>>>,
    sent: Arc<Mutex<Vec<IpmiRequest>>>,
}

impl MockIpmiTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, netfn: u8, cmd: u8, data: Vec<u8>) {
        self.replies.lock().unwrap().insert((netfn, cmd), Ok(data));
    }

    pub fn fail(&self, netfn: u8, cmd: u8, message: impl Into<String>) {
        self.replies.lock().unwrap().insert((netfn, cmd), Err(message.into()));
    }

    pub fn sent(&self) -> Vec<IpmiRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl IpmiTransport for MockIpmiTransport {
    async fn send(&self, request: &IpmiRequest) -> Result<Vec<u8>, PowerError> {
        self.sent.lock().unwrap().push(request.clone());
        match self.replies.lock().unwrap().get(&(request.netfn, request.cmd)) {
            Some(Ok(data)) => Ok(data.clone()),
            Some(Err(message)) => Err(PowerError::Ipmi(message.clone())),
            None => Ok(Vec::new()),
        }
    }
}
