//! Metal Controller
//!
//! Manages the lifecycle of bare-metal servers:
//! - Server: power management through IPMI or a management API, wiping
//!   free servers and PXE booting allocated ones
//! - ServerClass: tracks which servers match each class
//! - Agent RPC: registration, wipe progress and BMC discovery reported by
//!   the agent running on booted servers
//! - PXE: DHCP proxy, TFTP and HTTP boot script service

mod agent_server;
mod backoff;
#[cfg(test)]
mod boot_flow_test;
mod config;
mod controller;
mod error;
mod events;
mod reconciler;
mod watcher;

use crate::config::Config;
use crate::error::ControllerError;
use clap::Parser;
use controller::Controller;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube is built with rustls; pick the ring provider explicitly
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        debug!("rustls crypto provider already installed");
    }

    info!("Starting metal controller");

    let config = Config::parse().validate()?;

    info!("Configuration:");
    info!("  API endpoint: {}:{}", config.api_endpoint, config.api_port);
    info!("  HTTP port: {}", config.http_port);
    info!("  Auto accept servers: {}", config.auto_accept_servers);
    info!("  Insecure wipe: {}", config.insecure_wipe);
    info!("  Reboot timeout: {:?}", config.reboot_timeout());
    info!("  DHCP proxy: {}", if config.disable_dhcp_proxy { "disabled" } else { "enabled" });

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
