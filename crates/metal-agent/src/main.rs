//! Metal Agent
//!
//! Runs on a machine PXE-booted into the agent environment:
//! - Registers the hardware inventory with the metal controller
//! - Reports discovered IP addresses
//! - Wipes every writable disk when told to, heartbeating meanwhile
//! - Provisions a BMC user when told to
//!
//! The machine always reboots afterwards, whether the run succeeded or not.

mod addresses;
mod agent;
mod bmc;
mod cmdline;
mod error;
mod heartbeat;
mod inventory;
mod wipe;

use crate::addresses::InterfaceAddresses;
use crate::agent::{Agent, Discovery};
use crate::inventory::SysRoots;
use agent_api::AgentClient;
use anyhow::Context;
use power_client::{IpmiClient, IpmiTool};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const INTERFACE_TIMEOUT: Duration = Duration::from_secs(60);
const INTERFACE_POLL: Duration = Duration::from_secs(1);
const REBOOT_DELAY_SECS: u64 = 10;

async fn run(cancel: CancellationToken) -> anyhow::Result<()> {
    let args = cmdline::from_proc().await?;
    info!(endpoint = %args.endpoint, mac = %args.mac, "starting agent");

    addresses::wait_for_interface(Path::new("/sys/class/net"), &args.mac, INTERFACE_TIMEOUT, INTERFACE_POLL).await?;

    let roots = SysRoots::default();
    let addrs = InterfaceAddresses::discover().await.context("discovering addresses")?;
    let devices = inventory::block_devices(&roots).await.context("listing block devices")?;

    let discovery = Discovery {
        hardware: inventory::collect(&roots, &devices, &addrs).await,
        hostname: inventory::hostname(&roots).await,
        addresses: addrs.global_unicast(),
        devices,
    };

    let client = AgentClient::new(&args.endpoint)?.with_cancellation(cancel.clone());
    let agent = Agent::new(Arc::new(client), cancel);

    agent.run(discovery, &IpmiClient::new(IpmiTool::local())).await?;
    Ok(())
}

async fn reboot(result: anyhow::Result<()>) {
    if let Err(e) = result {
        error!("agent failed: {e:#}");
    }

    for i in (1..=REBOOT_DELAY_SECS).rev() {
        info!("rebooting in {i} seconds");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    match tokio::process::Command::new("/sbin/reboot").arg("-f").status().await {
        Ok(status) if status.success() => {}
        Ok(status) => error!(%status, "reboot command failed"),
        Err(e) => error!(error = %e, "failed to run reboot"),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    reboot(run(cancel).await).await;
}
