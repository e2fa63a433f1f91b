//! Server CRD
//!
//! A physical machine, named after its SMBIOS system UUID. The spec carries
//! operator intent (acceptance, cordon, boot overrides) and the out-of-band
//! management target; the status carries what the controllers observed.

use crate::conditions::Condition;
use crate::config_patch::ConfigPatch;
use crate::error::CrdError;
use crate::hardware::HardwareInformation;
use crate::references::ResourceReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default IPMI port of a BMC.
pub const DEFAULT_BMC_PORT: u16 = 623;

/// Default IPMI interface used against a BMC.
pub const DEFAULT_BMC_INTERFACE: &str = "lanplus";

/// Tracks whether a power cycle was already issued for the current wipe episode.
pub const CONDITION_POWER_CYCLE: &str = "PowerCycle";

/// Records that the server already PXE booted into its target environment.
pub const CONDITION_PXE_BOOTED: &str = "PXEBooted";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "metal.dcops.microscaler.io",
    version = "v1alpha1",
    kind = "Server",
    status = "ServerStatus",
    printcolumn = r#"{"name":"Hostname","type":"string","jsonPath":".spec.hostname"}"#,
    printcolumn = r#"{"name":"Accepted","type":"boolean","jsonPath":".spec.accepted"}"#,
    printcolumn = r#"{"name":"Cordoned","type":"boolean","jsonPath":".spec.cordoned"}"#,
    printcolumn = r#"{"name":"Allocated","type":"boolean","jsonPath":".status.inUse"}"#,
    printcolumn = r#"{"name":"Clean","type":"boolean","jsonPath":".status.isClean"}"#,
    printcolumn = r#"{"name":"Power","type":"string","jsonPath":".status.power"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ServerSpec {
    /// Hostname reported by the machine on registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Operator consent; nothing is powered, wiped or booted until true
    #[serde(default)]
    pub accepted: bool,

    /// Excludes the server from allocation without deallocating it
    #[serde(default)]
    pub cordoned: bool,

    /// PXE boot on every reboot instead of only once per episode
    #[serde(default)]
    pub pxe_boot_always: bool,

    /// IPMI BMC to drive power through
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bmc: Option<Bmc>,

    /// Simple HTTP management endpoint (virtualised fleets)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_api: Option<ManagementApi>,

    /// Inventory reported by the agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware: Option<HardwareInformation>,

    /// Environment to boot, overriding class and default environments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_ref: Option<ResourceReference>,

    /// How to leave iPXE when the server must boot from disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_from_disk_method: Option<BootFromDiskMethod>,

    /// Boot device flavour requested over IPMI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pxe_mode: Option<PxeMode>,

    /// Patches applied to the machine configuration
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_patches: Vec<ConfigPatch>,
}

/// How to reach a server's BMC.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Bmc {
    /// BMC address
    pub endpoint: String,

    /// BMC port, defaults to 623
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Inline user name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// User name from a secret, used when `user` is empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_from: Option<CredentialSource>,

    /// Inline password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,

    /// Password from a secret, used when `pass` is empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_from: Option<CredentialSource>,

    /// IPMI interface, defaults to lanplus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
}

impl Bmc {
    /// Port with the IPMI default applied.
    #[must_use]
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_BMC_PORT)
    }

    /// Interface with the lanplus default applied.
    #[must_use]
    pub fn interface_or_default(&self) -> &str {
        match self.interface.as_deref() {
            Some(iface) if !iface.is_empty() => iface,
            _ => DEFAULT_BMC_INTERFACE,
        }
    }
}

/// Where a credential value is read from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<SecretKeyRef>,
}

/// A key inside a namespaced secret.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    pub namespace: String,
    pub name: String,
    pub key: String,
}

/// Simple HTTP power management endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManagementApi {
    /// `host:port` of the management API
    pub endpoint: String,
}

/// Observed state of a server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    /// Accepted and in a steady branch of the lifecycle
    #[serde(default)]
    pub ready: bool,

    /// Bound to a workload
    #[serde(default)]
    pub in_use: bool,

    /// Disks confirmed wiped
    #[serde(default)]
    pub is_clean: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Addresses reported by the agent
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<NodeAddress>,

    /// Last observed power state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<PowerState>,
}

/// A discovered address of a node.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct NodeAddress {
    /// Address type, e.g. `InternalIP`
    #[serde(rename = "type")]
    pub address_type: String,

    pub address: String,
}

/// Power state as last observed by the server controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
    Unknown,
}

/// How iPXE hands control back to local disks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum BootFromDiskMethod {
    /// Answer with an iPXE script that exits
    #[default]
    #[serde(rename = "ipxe-exit")]
    IpxeExit,

    /// Answer with HTTP 404
    #[serde(rename = "http-404")]
    Http404,

    /// Answer with an iPXE script that sanboots the first disk
    #[serde(rename = "ipxe-sanboot")]
    IpxeSanboot,
}

impl BootFromDiskMethod {
    /// Wire name of the method.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IpxeExit => "ipxe-exit",
            Self::Http404 => "http-404",
            Self::IpxeSanboot => "ipxe-sanboot",
        }
    }
}

impl fmt::Display for BootFromDiskMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BootFromDiskMethod {
    type Err = CrdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ipxe-exit" => Ok(Self::IpxeExit),
            "http-404" => Ok(Self::Http404),
            "ipxe-sanboot" => Ok(Self::IpxeSanboot),
            other => Err(CrdError::UnknownValue {
                kind: "boot from disk method",
                value: other.to_string(),
            }),
        }
    }
}

/// Firmware flavour used when asking a BMC for a PXE boot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PxeMode {
    Bios,
    #[default]
    Uefi,
}

impl fmt::Display for PxeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bios => "bios",
            Self::Uefi => "uefi",
        })
    }
}

impl FromStr for PxeMode {
    type Err = CrdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bios" => Ok(Self::Bios),
            "uefi" => Ok(Self::Uefi),
            other => Err(CrdError::UnknownValue {
                kind: "pxe mode",
                value: other.to_string(),
            }),
        }
    }
}

impl Server {
    /// Current status, or an empty one for freshly created servers.
    #[must_use]
    pub fn status_or_default(&self) -> ServerStatus {
        self.status.clone().unwrap_or_default()
    }

    /// Mutable status, created empty if absent.
    pub fn status_mut(&mut self) -> &mut ServerStatus {
        self.status.get_or_insert_with(ServerStatus::default)
    }

    /// Conditions currently recorded on the server.
    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
    }
}
