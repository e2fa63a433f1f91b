//! Hardware inventory
//!
//! Inventory reported by the agent on registration and stored on the
//! `Server` spec. The same types double as server class qualifiers: a
//! qualifier matches a server when every populated field of the qualifier
//! equals the corresponding field of the server's inventory.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Partial comparison against a candidate of the same shape.
///
/// Default-valued fields of `self` are wildcards. Nested values recurse, and
/// a filter list longer than the candidate list never matches.
pub trait PartialMatch {
    /// Returns true when every non-default field of `self` equals the
    /// corresponding field of `candidate`.
    fn partial_match(&self, candidate: &Self) -> bool;
}

fn scalar<T: PartialEq + Default>(filter: &T, candidate: &T) -> bool {
    *filter == T::default() || filter == candidate
}

fn nested<T: PartialMatch + PartialEq + Default>(filter: Option<&T>, candidate: Option<&T>) -> bool {
    match (filter, candidate) {
        (None, _) => true,
        (Some(f), Some(c)) => f.partial_match(c),
        // an all-default filter still matches a missing section
        (Some(f), None) => *f == T::default(),
    }
}

fn list<T: PartialMatch>(filter: &[T], candidate: &[T]) -> bool {
    if filter.len() > candidate.len() {
        return false;
    }

    filter.iter().zip(candidate).all(|(f, c)| f.partial_match(c))
}

impl PartialMatch for String {
    fn partial_match(&self, candidate: &Self) -> bool {
        scalar(self, candidate)
    }
}

/// SMBIOS system identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemInformation {
    pub uuid: String,
    pub manufacturer: String,
    pub product_name: String,
    pub version: String,
    pub serial_number: String,
    pub sku_number: String,
    pub family: String,
}

impl PartialMatch for SystemInformation {
    fn partial_match(&self, c: &Self) -> bool {
        scalar(&self.uuid, &c.uuid)
            && scalar(&self.manufacturer, &c.manufacturer)
            && scalar(&self.product_name, &c.product_name)
            && scalar(&self.version, &c.version)
            && scalar(&self.serial_number, &c.serial_number)
            && scalar(&self.sku_number, &c.sku_number)
            && scalar(&self.family, &c.family)
    }
}

/// A CPU package.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Processor {
    pub manufacturer: String,
    pub product_name: String,
    pub serial_number: String,
    /// Speed in MHz
    pub speed: u32,
    pub core_count: u32,
    pub thread_count: u32,
}

impl PartialMatch for Processor {
    fn partial_match(&self, c: &Self) -> bool {
        scalar(&self.manufacturer, &c.manufacturer)
            && scalar(&self.product_name, &c.product_name)
            && scalar(&self.serial_number, &c.serial_number)
            && scalar(&self.speed, &c.speed)
            && scalar(&self.core_count, &c.core_count)
            && scalar(&self.thread_count, &c.thread_count)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ComputeInformation {
    pub total_core_count: u32,
    pub total_thread_count: u32,
    pub processor_count: u32,
    pub processors: Vec<Processor>,
}

impl PartialMatch for ComputeInformation {
    fn partial_match(&self, c: &Self) -> bool {
        scalar(&self.total_core_count, &c.total_core_count)
            && scalar(&self.total_thread_count, &c.total_thread_count)
            && scalar(&self.processor_count, &c.processor_count)
            && list(&self.processors, &c.processors)
    }
}

/// A DIMM.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryModule {
    pub manufacturer: String,
    pub product_name: String,
    pub serial_number: String,
    #[serde(rename = "type")]
    pub module_type: String,
    /// Size in MB
    pub size: u32,
    /// Speed in MT/s
    pub speed: u32,
}

impl PartialMatch for MemoryModule {
    fn partial_match(&self, c: &Self) -> bool {
        scalar(&self.manufacturer, &c.manufacturer)
            && scalar(&self.product_name, &c.product_name)
            && scalar(&self.serial_number, &c.serial_number)
            && scalar(&self.module_type, &c.module_type)
            && scalar(&self.size, &c.size)
            && scalar(&self.speed, &c.speed)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryInformation {
    /// Human readable total, e.g. `"32 GB"`
    pub total_size: String,
    pub module_count: u32,
    pub modules: Vec<MemoryModule>,
}

impl PartialMatch for MemoryInformation {
    fn partial_match(&self, c: &Self) -> bool {
        scalar(&self.total_size, &c.total_size)
            && scalar(&self.module_count, &c.module_count)
            && list(&self.modules, &c.modules)
    }
}

/// A block device.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageDevice {
    #[serde(rename = "type")]
    pub device_type: String,
    /// Size in bytes
    pub size: u64,
    #[serde(rename = "productName")]
    pub model: String,
    #[serde(rename = "serialNumber")]
    pub serial: String,
    pub name: String,
    pub device_name: String,
    pub uuid: String,
    pub wwid: String,
}

impl PartialMatch for StorageDevice {
    fn partial_match(&self, c: &Self) -> bool {
        scalar(&self.device_type, &c.device_type)
            && scalar(&self.size, &c.size)
            && scalar(&self.model, &c.model)
            && scalar(&self.serial, &c.serial)
            && scalar(&self.name, &c.name)
            && scalar(&self.device_name, &c.device_name)
            && scalar(&self.uuid, &c.uuid)
            && scalar(&self.wwid, &c.wwid)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageInformation {
    /// Human readable total, e.g. `"480 GB"`
    pub total_size: String,
    pub device_count: u32,
    pub devices: Vec<StorageDevice>,
}

impl PartialMatch for StorageInformation {
    fn partial_match(&self, c: &Self) -> bool {
        scalar(&self.total_size, &c.total_size)
            && scalar(&self.device_count, &c.device_count)
            && list(&self.devices, &c.devices)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkInterface {
    pub index: u32,
    pub name: String,
    pub flags: String,
    pub mtu: u32,
    pub mac: String,
    pub addresses: Vec<String>,
}

impl PartialMatch for NetworkInterface {
    fn partial_match(&self, c: &Self) -> bool {
        scalar(&self.index, &c.index)
            && scalar(&self.name, &c.name)
            && scalar(&self.flags, &c.flags)
            && scalar(&self.mtu, &c.mtu)
            && scalar(&self.mac, &c.mac)
            && list(&self.addresses, &c.addresses)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkInformation {
    pub interface_count: u32,
    pub interfaces: Vec<NetworkInterface>,
}

impl PartialMatch for NetworkInformation {
    fn partial_match(&self, c: &Self) -> bool {
        scalar(&self.interface_count, &c.interface_count) && list(&self.interfaces, &c.interfaces)
    }
}

/// Full hardware inventory of a server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HardwareInformation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemInformation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute: Option<ComputeInformation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryInformation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageInformation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkInformation>,
}

impl PartialMatch for HardwareInformation {
    fn partial_match(&self, c: &Self) -> bool {
        nested(self.system.as_ref(), c.system.as_ref())
            && nested(self.compute.as_ref(), c.compute.as_ref())
            && nested(self.memory.as_ref(), c.memory.as_ref())
            && nested(self.storage.as_ref(), c.storage.as_ref())
            && nested(self.network.as_ref(), c.network.as_ref())
    }
}
