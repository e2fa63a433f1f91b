//! Wire types of the agent RPC.
//!
//! Every call is a JSON `POST` under [`paths`]. The hardware descriptor
//! carries raw units (memory in MiB, storage in bytes); the controller
//! turns them into the human readable totals stored on the server.

use serde::{Deserialize, Serialize};

/// Route of each RPC relative to the controller's HTTP endpoint.
pub mod paths {
    pub const REGISTER: &str = "/agent/v1/register";
    pub const REPORT_ADDRESSES: &str = "/agent/v1/addresses";
    pub const HEARTBEAT: &str = "/agent/v1/heartbeat";
    pub const REPORT_WIPE_COMPLETE: &str = "/agent/v1/wipe-complete";
    pub const REPORT_BMC_INFO: &str = "/agent/v1/bmc";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemInfo {
    pub uuid: String,
    pub manufacturer: String,
    pub product_name: String,
    pub version: String,
    pub serial_number: String,
    pub sku_number: String,
    pub family: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessorInfo {
    pub manufacturer: String,
    pub product_name: String,
    pub serial_number: String,
    /// MHz
    pub speed: u32,
    pub core_count: u32,
    pub thread_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComputeInfo {
    pub total_core_count: u32,
    pub total_thread_count: u32,
    pub processor_count: u32,
    pub processors: Vec<ProcessorInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryModuleInfo {
    pub manufacturer: String,
    pub product_name: String,
    pub serial_number: String,
    #[serde(rename = "type")]
    pub module_type: String,
    /// MiB
    pub size: u32,
    /// MT/s
    pub speed: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryInfo {
    /// MiB
    pub total_size: u64,
    pub module_count: u32,
    pub modules: Vec<MemoryModuleInfo>,
}

/// Kind of block device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StorageType {
    #[default]
    Unknown,
    Ssd,
    Hdd,
    Nvme,
    Sd,
}

impl StorageType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Ssd => "SSD",
            Self::Hdd => "HDD",
            Self::Nvme => "NVME",
            Self::Sd => "SD",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageDeviceInfo {
    #[serde(rename = "type")]
    pub device_type: StorageType,
    /// Bytes
    pub size: u64,
    pub model: String,
    pub serial: String,
    pub name: String,
    pub device_name: String,
    pub uuid: String,
    pub wwid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageInfo {
    /// Bytes
    pub total_size: u64,
    pub device_count: u32,
    pub devices: Vec<StorageDeviceInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkInterfaceInfo {
    pub index: u32,
    pub name: String,
    pub flags: String,
    pub mtu: u32,
    pub mac: String,
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkInfo {
    pub interface_count: u32,
    pub interfaces: Vec<NetworkInterfaceInfo>,
}

/// Hardware inventory collected by the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HardwareDescriptor {
    pub system: SystemInfo,
    pub compute: ComputeInfo,
    pub memory: MemoryInfo,
    pub storage: StorageInfo,
    pub network: NetworkInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub hardware: HardwareDescriptor,
    #[serde(default)]
    pub hostname: String,
}

impl RegisterRequest {
    /// Server identity reported by the machine.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.hardware.system.uuid
    }
}

/// Directives for a registered agent. All false for unaccepted servers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterResponse {
    pub wipe: bool,
    pub insecure_wipe: bool,
    /// Seconds
    pub reboot_timeout: f64,
    pub setup_bmc: bool,
}

/// One discovered address, `type` follows node address types
/// (`InternalIP`, `Hostname`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    #[serde(rename = "type")]
    pub address_type: String,
    pub address: String,
}

impl Address {
    pub fn new(address_type: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            address_type: address_type.into(),
            address: address.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportAddressesRequest {
    pub uuid: String,
    #[serde(default)]
    pub addresses: Vec<Address>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub uuid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WipeCompleteRequest {
    pub uuid: String,
}

/// BMC facts found or provisioned by the agent. Empty fields are unknown.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BmcInfo {
    pub ip: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
}

impl std::fmt::Debug for BmcInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BmcInfo")
            .field("ip", &self.ip)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BmcInfoRequest {
    pub uuid: String,
    pub bmc_info: BmcInfo,
}

/// Empty acknowledgement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {}
