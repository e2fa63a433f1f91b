//! Hardware inventory from sysfs and procfs.
//!
//! DMI strings come from `/sys/class/dmi/id`, CPUs from `/proc/cpuinfo`,
//! memory from `/proc/meminfo`, disks from `/sys/block` and NICs from
//! `/sys/class/net`. Memory modules need SMBIOS decoding and are left empty.

use crate::addresses::InterfaceAddresses;
use crate::error::AgentError;
use agent_api::{
    ComputeInfo, HardwareDescriptor, MemoryInfo, NetworkInfo, NetworkInterfaceInfo, ProcessorInfo, StorageDeviceInfo,
    StorageInfo, StorageType, SystemInfo,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

const SECTOR_SIZE: u64 = 512;

/// Block device prefixes that are never physical disks.
const VIRTUAL_BLOCK_PREFIXES: &[&str] = &["loop", "ram", "zram", "dm-", "md", "sr", "nbd"];

/// Filesystem roots the inventory is read from.
#[derive(Debug, Clone)]
pub struct SysRoots {
    pub sys: PathBuf,
    pub proc: PathBuf,
}

impl Default for SysRoots {
    fn default() -> Self {
        Self {
            sys: PathBuf::from("/sys"),
            proc: PathBuf::from("/proc"),
        }
    }
}

/// A physical block device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub read_only: bool,
    pub rotational: bool,
    pub model: String,
    pub serial: String,
    pub wwid: String,
}

impl BlockDevice {
    #[must_use]
    pub fn storage_type(&self) -> StorageType {
        if self.name.starts_with("nvme") {
            StorageType::Nvme
        } else if self.name.starts_with("mmcblk") {
            StorageType::Sd
        } else if self.rotational {
            StorageType::Hdd
        } else {
            StorageType::Ssd
        }
    }
}

async fn read_trimmed(path: impl AsRef<Path>) -> String {
    tokio::fs::read_to_string(path)
        .await
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

pub async fn system(roots: &SysRoots) -> SystemInfo {
    let dmi = roots.sys.join("class/dmi/id");
    SystemInfo {
        uuid: read_trimmed(dmi.join("product_uuid")).await.to_ascii_lowercase(),
        manufacturer: read_trimmed(dmi.join("sys_vendor")).await,
        product_name: read_trimmed(dmi.join("product_name")).await,
        version: read_trimmed(dmi.join("product_version")).await,
        serial_number: read_trimmed(dmi.join("product_serial")).await,
        sku_number: read_trimmed(dmi.join("product_sku")).await,
        family: read_trimmed(dmi.join("product_family")).await,
    }
}

/// One processor per populated socket (`physical id`).
#[must_use]
pub fn parse_cpuinfo(cpuinfo: &str) -> ComputeInfo {
    let mut sockets: BTreeMap<String, ProcessorInfo> = BTreeMap::new();

    for block in cpuinfo.split("\n\n").filter(|b| !b.trim().is_empty()) {
        let fields: BTreeMap<&str, &str> = block
            .lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim(), v.trim()))
            .collect();

        let socket = fields.get("physical id").copied().unwrap_or("0").to_string();
        let processor = sockets.entry(socket).or_insert_with(|| ProcessorInfo {
            manufacturer: fields.get("vendor_id").copied().unwrap_or_default().to_string(),
            product_name: fields.get("model name").copied().unwrap_or_default().to_string(),
            speed: fields
                .get("cpu MHz")
                .and_then(|v| v.parse::<f64>().ok())
                .map_or(0, |mhz| mhz as u32),
            core_count: fields.get("cpu cores").and_then(|v| v.parse().ok()).unwrap_or(1),
            ..ProcessorInfo::default()
        });
        processor.thread_count += 1;
    }

    let processors: Vec<ProcessorInfo> = sockets.into_values().collect();
    ComputeInfo {
        total_core_count: processors.iter().map(|p| p.core_count).sum(),
        total_thread_count: processors.iter().map(|p| p.thread_count).sum(),
        processor_count: u32::try_from(processors.len()).unwrap_or(u32::MAX),
        processors,
    }
}

/// Total memory in MiB from `MemTotal` (kB).
#[must_use]
pub fn parse_meminfo(meminfo: &str) -> MemoryInfo {
    let total_kb = meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .and_then(|rest| rest.trim().trim_end_matches("kB").trim().parse::<u64>().ok())
        .unwrap_or_default();

    MemoryInfo {
        total_size: total_kb / 1024,
        ..MemoryInfo::default()
    }
}

/// Physical block devices under `/sys/block`.
pub async fn block_devices(roots: &SysRoots) -> Result<Vec<BlockDevice>, AgentError> {
    let mut devices = Vec::new();
    let mut entries = tokio::fs::read_dir(roots.sys.join("block")).await?;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if VIRTUAL_BLOCK_PREFIXES.iter().any(|p| name.starts_with(p)) {
            continue;
        }

        let dir = entry.path();
        let sectors: u64 = read_trimmed(dir.join("size")).await.parse().unwrap_or_default();
        if sectors == 0 {
            continue;
        }

        let wwid = match read_trimmed(dir.join("wwid")).await {
            w if w.is_empty() => read_trimmed(dir.join("device/wwid")).await,
            w => w,
        };

        devices.push(BlockDevice {
            path: PathBuf::from("/dev").join(&name),
            size: sectors * SECTOR_SIZE,
            read_only: read_trimmed(dir.join("ro")).await == "1",
            rotational: read_trimmed(dir.join("queue/rotational")).await == "1",
            model: read_trimmed(dir.join("device/model")).await,
            serial: read_trimmed(dir.join("device/serial")).await,
            wwid,
            name,
        });
    }

    devices.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(devices)
}

#[must_use]
pub fn storage(devices: &[BlockDevice]) -> StorageInfo {
    let devices: Vec<StorageDeviceInfo> = devices
        .iter()
        .map(|d| StorageDeviceInfo {
            device_type: d.storage_type(),
            size: d.size,
            model: d.model.clone(),
            serial: d.serial.clone(),
            name: d.name.clone(),
            device_name: d.path.to_string_lossy().into_owned(),
            uuid: String::new(),
            wwid: d.wwid.clone(),
        })
        .collect();

    StorageInfo {
        total_size: devices.iter().map(|d| d.size).sum(),
        device_count: u32::try_from(devices.len()).unwrap_or(u32::MAX),
        devices,
    }
}

/// Kernel `IFF_*` flag names, in bit order.
const IFF_NAMES: &[(u32, &str)] = &[
    (0x1, "up"),
    (0x2, "broadcast"),
    (0x8, "loopback"),
    (0x10, "pointtopoint"),
    (0x1000, "multicast"),
];

fn flag_names(flags: u32) -> String {
    IFF_NAMES
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, name)| *name)
        .collect::<Vec<_>>()
        .join("|")
}

/// Interfaces with a hardware address.
pub async fn network(roots: &SysRoots, addresses: &InterfaceAddresses) -> Result<NetworkInfo, AgentError> {
    let mut interfaces = Vec::new();
    let mut entries = tokio::fs::read_dir(roots.sys.join("class/net")).await?;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let dir = entry.path();

        let mac = read_trimmed(dir.join("address")).await;
        if mac.is_empty() || mac == "00:00:00:00:00:00" {
            continue;
        }

        let flags = read_trimmed(dir.join("flags")).await;
        let flags = u32::from_str_radix(flags.trim_start_matches("0x"), 16).unwrap_or_default();

        interfaces.push(NetworkInterfaceInfo {
            index: read_trimmed(dir.join("ifindex")).await.parse().unwrap_or_default(),
            flags: flag_names(flags),
            mtu: read_trimmed(dir.join("mtu")).await.parse().unwrap_or_default(),
            mac,
            addresses: addresses.of(&name),
            name,
        });
    }

    interfaces.sort_by_key(|i| i.index);
    Ok(NetworkInfo {
        interface_count: u32::try_from(interfaces.len()).unwrap_or(u32::MAX),
        interfaces,
    })
}

/// Collects the full descriptor. Sections that cannot be read are logged
/// and left empty.
pub async fn collect(roots: &SysRoots, devices: &[BlockDevice], addresses: &InterfaceAddresses) -> HardwareDescriptor {
    let compute = match tokio::fs::read_to_string(roots.proc.join("cpuinfo")).await {
        Ok(s) => parse_cpuinfo(&s),
        Err(e) => {
            warn!(error = %e, "encountered error reading cpuinfo");
            ComputeInfo::default()
        }
    };

    let memory = match tokio::fs::read_to_string(roots.proc.join("meminfo")).await {
        Ok(s) => parse_meminfo(&s),
        Err(e) => {
            warn!(error = %e, "encountered error reading meminfo");
            MemoryInfo::default()
        }
    };

    let network = network(roots, addresses).await.unwrap_or_else(|e| {
        warn!(error = %e, "encountered error fetching network interfaces");
        NetworkInfo::default()
    });

    HardwareDescriptor {
        system: system(roots).await,
        compute,
        memory,
        storage: storage(devices),
        network,
    }
}

pub async fn hostname(roots: &SysRoots) -> String {
    read_trimmed(roots.proc.join("sys/kernel/hostname")).await
}
