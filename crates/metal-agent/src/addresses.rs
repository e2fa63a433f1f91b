//! Interface and address discovery.
//!
//! Addresses come from `ip -json addr show`; interface presence is read from
//! sysfs so the agent can wait for the boot NIC before talking to the
//! controller.

use crate::error::AgentError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Address type reported for discovered addresses.
pub const INTERNAL_IP: &str = "InternalIP";

#[derive(Debug, Deserialize)]
struct IpLink {
    ifname: String,
    #[serde(default)]
    addr_info: Vec<IpAddrInfo>,
}

#[derive(Debug, Deserialize)]
struct IpAddrInfo {
    local: IpAddr,
    prefixlen: u8,
}

/// Addresses of every interface, keyed by interface name, as `ip/prefix`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceAddresses(BTreeMap<String, Vec<(IpAddr, u8)>>);

impl InterfaceAddresses {
    pub fn parse(json: &str) -> Result<Self, AgentError> {
        let links: Vec<IpLink> = serde_json::from_str(json)?;
        Ok(Self(
            links
                .into_iter()
                .map(|link| {
                    let addrs = link.addr_info.into_iter().map(|a| (a.local, a.prefixlen)).collect();
                    (link.ifname, addrs)
                })
                .collect(),
        ))
    }

    pub async fn discover() -> Result<Self, AgentError> {
        let output = Command::new("ip").args(["-json", "addr", "show"]).output().await?;
        if !output.status.success() {
            return Err(AgentError::Command {
                command: "ip -json addr show".to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Self::parse(&String::from_utf8_lossy(&output.stdout))
    }

    /// `ip/prefix` strings of one interface.
    #[must_use]
    pub fn of(&self, ifname: &str) -> Vec<String> {
        self.0
            .get(ifname)
            .map(|addrs| addrs.iter().map(|(ip, prefix)| format!("{ip}/{prefix}")).collect())
            .unwrap_or_default()
    }

    /// Global unicast addresses across all interfaces.
    #[must_use]
    pub fn global_unicast(&self) -> Vec<IpAddr> {
        self.0
            .values()
            .flatten()
            .map(|(ip, _)| *ip)
            .filter(is_global_unicast)
            .collect()
    }
}

/// Not loopback, multicast, unspecified, broadcast or link-local.
fn is_global_unicast(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_loopback() || v4.is_multicast() || v4.is_unspecified() || v4.is_broadcast() || v4.is_link_local())
        }
        IpAddr::V6(v6) => {
            !(v6.is_loopback() || v6.is_multicast() || v6.is_unspecified() || v6.is_unicast_link_local())
        }
    }
}

/// Name of the interface with `mac` under `sys_class_net`, if present.
pub async fn find_interface(sys_class_net: &Path, mac: &str) -> Result<Option<String>, AgentError> {
    let mut entries = tokio::fs::read_dir(sys_class_net).await?;
    while let Some(entry) = entries.next_entry().await? {
        let Ok(address) = tokio::fs::read_to_string(entry.path().join("address")).await else {
            continue;
        };
        if address.trim().eq_ignore_ascii_case(mac) {
            return Ok(Some(entry.file_name().to_string_lossy().into_owned()));
        }
    }
    Ok(None)
}

/// Polls until the boot interface shows up.
pub async fn wait_for_interface(
    sys_class_net: &Path,
    mac: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<String, AgentError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(name) = find_interface(sys_class_net, mac).await? {
            info!(interface = %name, %mac, "boot interface is up");
            return Ok(name);
        }
        if tokio::time::Instant::now() + interval > deadline {
            return Err(AgentError::InterfaceTimeout(mac.to_string()));
        }
        debug!(%mac, "waiting for boot interface");
        tokio::time::sleep(interval).await;
    }
}
