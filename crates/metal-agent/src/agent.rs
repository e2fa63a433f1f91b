//! Agent flow: register, report addresses, wipe under heartbeat, then
//! BMC setup.

use crate::addresses::INTERNAL_IP;
use crate::bmc;
use crate::error::AgentError;
use crate::heartbeat::{self, Heartbeat};
use crate::inventory::BlockDevice;
use crate::wipe::{self, WipeMode};
use agent_api::{Address, AgentApi, HardwareDescriptor, RegisterRequest, ReportAddressesRequest, WipeCompleteRequest};
use power_client::{IpmiClient, IpmiTransport};
use std::net::IpAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Facts gathered from the machine before talking to the controller.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub hardware: HardwareDescriptor,
    pub hostname: String,
    pub addresses: Vec<IpAddr>,
    pub devices: Vec<BlockDevice>,
}

pub struct Agent {
    api: Arc<dyn AgentApi>,
    cancel: CancellationToken,
}

impl Agent {
    pub fn new(api: Arc<dyn AgentApi>, cancel: CancellationToken) -> Self {
        Self { api, cancel }
    }

    /// Runs the whole flow once. Registration, address and wipe failures
    /// are returned; BMC setup never fails the run.
    pub async fn run<T: IpmiTransport>(&self, discovery: Discovery, ipmi: &IpmiClient<T>) -> Result<(), AgentError> {
        let uuid = discovery.hardware.system.uuid.clone();

        let directives = self
            .api
            .register(RegisterRequest {
                hardware: discovery.hardware,
                hostname: discovery.hostname,
            })
            .await?;
        info!(%uuid, ?directives, "registration complete");

        let addresses = discovery
            .addresses
            .iter()
            .map(|ip| Address::new(INTERNAL_IP, ip.to_string()))
            .collect();
        self.api
            .report_addresses(ReportAddressesRequest {
                uuid: uuid.clone(),
                addresses,
            })
            .await?;
        info!(%uuid, "reported IP addresses");

        if directives.wipe {
            self.wipe(&uuid, &discovery.devices, directives.insecure_wipe, directives.reboot_timeout)
                .await?;
        }

        if directives.setup_bmc {
            bmc::auto_setup(self.api.as_ref(), &uuid, ipmi).await;
        }

        Ok(())
    }

    async fn wipe(
        &self,
        uuid: &str,
        devices: &[BlockDevice],
        insecure: bool,
        reboot_timeout: f64,
    ) -> Result<(), AgentError> {
        let heartbeat = Heartbeat::spawn(
            Arc::clone(&self.api),
            uuid.to_string(),
            heartbeat::interval_for(reboot_timeout),
            &self.cancel,
        );

        let result = wipe::wipe_all(devices, WipeMode::from_insecure(insecure)).await;
        heartbeat.stop().await;
        result?;

        self.api
            .report_wipe_complete(WipeCompleteRequest { uuid: uuid.to_string() })
            .await?;
        info!(%uuid, "wipe complete");
        Ok(())
    }
}
