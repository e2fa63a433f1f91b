//! Controller side of the agent RPC.
//!
//! Registration creates the Server record, the other calls update it.
//! Wipe and BMC directives are only handed to accepted servers so a random
//! machine PXE booting against the controller never gets wiped.

use crate::events::{
    EventRecorder, ServerEvent, REASON_BMC_UPDATE, REASON_SERVER_REGISTRATION, REASON_SERVER_WIPE,
};
use agent_api::{
    Address, AgentApi, AgentApiError, BmcInfoRequest, HardwareDescriptor, HeartbeatRequest, RegisterRequest,
    RegisterResponse, ReportAddressesRequest, WipeCompleteRequest,
};
use chrono::Utc;
use crds::{
    conditions, Bmc, ComputeInformation, Condition, CredentialSource, HardwareInformation, MemoryInformation,
    MemoryModule, NetworkInformation, NetworkInterface, NodeAddress, Processor, SecretKeyRef, Server, ServerSpec,
    StorageDevice, StorageInformation, SystemInformation, CONDITION_POWER_CYCLE, DEFAULT_BMC_PORT,
};
use metal_store::{update_server, update_server_status, MetalStore, StoreError};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const BMC_USER_KEY: &str = "user";
const BMC_PASS_KEY: &str = "pass";

#[derive(Debug, Clone)]
pub struct AgentServiceConfig {
    pub auto_accept: bool,
    pub insecure_wipe: bool,
    pub auto_bmc_setup: bool,
    pub reboot_timeout: Duration,
    /// Namespace BMC credential secrets are written to
    pub secret_namespace: String,
}

pub struct AgentService {
    store: Arc<dyn MetalStore>,
    events: Arc<dyn EventRecorder>,
    config: AgentServiceConfig,
}

impl AgentService {
    pub fn new(store: Arc<dyn MetalStore>, events: Arc<dyn EventRecorder>, config: AgentServiceConfig) -> Self {
        Self { store, events, config }
    }
}

fn api_error(e: StoreError) -> AgentApiError {
    match e {
        StoreError::NotFound { name, .. } => AgentApiError::NotFound(name),
        other => AgentApiError::Internal(other.to_string()),
    }
}

fn count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// Converts the agent inventory into the stored form. Totals become
/// human readable sizes; counts follow the lists.
pub fn map_hardware(hw: &HardwareDescriptor) -> HardwareInformation {
    let processors: Vec<Processor> = hw
        .compute
        .processors
        .iter()
        .map(|p| Processor {
            manufacturer: p.manufacturer.clone(),
            product_name: p.product_name.clone(),
            serial_number: p.serial_number.clone(),
            speed: p.speed,
            core_count: p.core_count,
            thread_count: p.thread_count,
        })
        .collect();

    let modules: Vec<MemoryModule> = hw
        .memory
        .modules
        .iter()
        .map(|m| MemoryModule {
            manufacturer: m.manufacturer.clone(),
            product_name: m.product_name.clone(),
            serial_number: m.serial_number.clone(),
            module_type: m.module_type.clone(),
            size: m.size,
            speed: m.speed,
        })
        .collect();

    let devices: Vec<StorageDevice> = hw
        .storage
        .devices
        .iter()
        .map(|d| StorageDevice {
            device_type: d.device_type.as_str().to_string(),
            size: d.size,
            model: d.model.clone(),
            serial: d.serial.clone(),
            name: d.name.clone(),
            device_name: d.device_name.clone(),
            uuid: d.uuid.clone(),
            wwid: d.wwid.clone(),
        })
        .collect();

    let interfaces: Vec<NetworkInterface> = hw
        .network
        .interfaces
        .iter()
        .map(|i| NetworkInterface {
            index: i.index,
            name: i.name.clone(),
            flags: i.flags.clone(),
            mtu: i.mtu,
            mac: i.mac.clone(),
            addresses: i.addresses.clone(),
        })
        .collect();

    let system = &hw.system;
    HardwareInformation {
        system: Some(SystemInformation {
            uuid: system.uuid.clone(),
            manufacturer: system.manufacturer.clone(),
            product_name: system.product_name.clone(),
            version: system.version.clone(),
            serial_number: system.serial_number.clone(),
            sku_number: system.sku_number.clone(),
            family: system.family.clone(),
        }),
        compute: Some(ComputeInformation {
            total_core_count: hw.compute.total_core_count,
            total_thread_count: hw.compute.total_thread_count,
            processor_count: count(processors.len()),
            processors,
        }),
        memory: Some(MemoryInformation {
            total_size: format!("{} GB", hw.memory.total_size / 1024),
            module_count: count(modules.len()),
            modules,
        }),
        storage: Some(StorageInformation {
            total_size: format!("{} GB", hw.storage.total_size / 1024 / 1024 / 1024),
            device_count: count(devices.len()),
            devices,
        }),
        network: Some(NetworkInformation {
            interface_count: count(interfaces.len()),
            interfaces,
        }),
    }
}

type AddressSet = BTreeMap<String, BTreeSet<String>>;

fn by_type<'a>(pairs: impl Iterator<Item = (&'a str, &'a str)>) -> AddressSet {
    let mut set = AddressSet::new();
    for (t, a) in pairs {
        set.entry(t.to_string()).or_default().insert(a.to_string());
    }
    set
}

/// Replaces the address types present in `reported` and keeps the others.
/// `None` when every reported type already holds exactly the reported set.
pub fn merge_addresses(existing: &[NodeAddress], reported: &[Address]) -> Option<Vec<NodeAddress>> {
    let old = by_type(existing.iter().map(|a| (a.address_type.as_str(), a.address.as_str())));
    let new = by_type(reported.iter().map(|a| (a.address_type.as_str(), a.address.as_str())));

    if new.iter().all(|(t, addrs)| old.get(t) == Some(addrs)) {
        return None;
    }

    let mut merged = old;
    merged.extend(new);

    Some(
        merged
            .into_iter()
            .flat_map(|(t, addrs)| {
                addrs.into_iter().map(move |address| NodeAddress {
                    address_type: t.clone(),
                    address,
                })
            })
            .collect(),
    )
}

fn secret_ref(namespace: &str, name: &str, key: &str) -> Option<CredentialSource> {
    Some(CredentialSource {
        secret_key_ref: Some(SecretKeyRef {
            namespace: namespace.to_string(),
            name: name.to_string(),
            key: key.to_string(),
        }),
    })
}

#[async_trait::async_trait]
impl AgentApi for AgentService {
    async fn register(&self, req: RegisterRequest) -> Result<RegisterResponse, AgentApiError> {
        let uuid = req.uuid().to_string();

        let server = match self.store.get_server(&uuid).await.map_err(api_error)? {
            Some(server) => server,
            None => {
                let spec = ServerSpec {
                    hostname: Some(req.hostname.clone()).filter(|h| !h.is_empty()),
                    accepted: self.config.auto_accept,
                    hardware: Some(map_hardware(&req.hardware)),
                    ..ServerSpec::default()
                };
                match self.store.create_server(&Server::new(&uuid, spec)).await {
                    Ok(created) => {
                        info!(server = %uuid, "added server");
                        self.events
                            .record(
                                &created,
                                ServerEvent::normal(REASON_SERVER_REGISTRATION, "Server auto-registered via API."),
                            )
                            .await;
                        created
                    }
                    // registered concurrently by another request
                    Err(StoreError::AlreadyExists { .. }) => self
                        .store
                        .get_server(&uuid)
                        .await
                        .map_err(api_error)?
                        .ok_or_else(|| AgentApiError::NotFound(uuid.clone()))?,
                    Err(e) => return Err(api_error(e)),
                }
            }
        };

        let mut resp = RegisterResponse::default();
        if !server.spec.accepted {
            debug!(server = %uuid, "server not accepted, no directives");
            return Ok(resp);
        }

        if server.spec.bmc.is_none() && self.config.auto_bmc_setup {
            info!(server = %uuid, "server needs BMC setup");
            resp.setup_bmc = true;
        }

        if !server.status_or_default().is_clean {
            info!(server = %uuid, "server needs wipe");
            resp.wipe = true;
            resp.insecure_wipe = self.config.insecure_wipe;
            resp.reboot_timeout = self.config.reboot_timeout.as_secs_f64();
        }

        Ok(resp)
    }

    async fn report_addresses(&self, req: ReportAddressesRequest) -> Result<(), AgentApiError> {
        let updated = update_server_status(self.store.as_ref(), &req.uuid, |server| {
            match merge_addresses(&server.status_or_default().addresses, &req.addresses) {
                Some(merged) => {
                    server.status_mut().addresses = merged;
                    true
                }
                None => false,
            }
        })
        .await
        .map_err(api_error)?;

        updated.map(|_| ()).ok_or(AgentApiError::NotFound(req.uuid))
    }

    async fn heartbeat(&self, req: HeartbeatRequest) -> Result<(), AgentApiError> {
        let updated = update_server_status(self.store.as_ref(), &req.uuid, |server| {
            let conds = &mut server.status_mut().conditions;
            // dropped first so the transition time is always fresh
            conditions::delete(conds, CONDITION_POWER_CYCLE);
            conditions::set(
                conds,
                Condition::false_(CONDITION_POWER_CYCLE, "InProgress", "Server wipe in progress.", Utc::now()),
            );
            true
        })
        .await
        .map_err(api_error)?;

        debug!(server = %req.uuid, "heartbeat");
        updated.map(|_| ()).ok_or(AgentApiError::NotFound(req.uuid))
    }

    async fn report_wipe_complete(&self, req: WipeCompleteRequest) -> Result<(), AgentApiError> {
        let updated = update_server_status(self.store.as_ref(), &req.uuid, |server| {
            let status = server.status_mut();
            status.is_clean = true;
            conditions::set(&mut status.conditions, Condition::true_(CONDITION_POWER_CYCLE, Utc::now()));
            true
        })
        .await
        .map_err(api_error)?
        .ok_or_else(|| AgentApiError::NotFound(req.uuid.clone()))?;

        info!(server = %req.uuid, "server wiped");
        self.events
            .record(&updated, ServerEvent::normal(REASON_SERVER_WIPE, "Server wiped via agent."))
            .await;
        Ok(())
    }

    async fn report_bmc_info(&self, req: BmcInfoRequest) -> Result<(), AgentApiError> {
        let uuid = req.uuid;
        let info = req.bmc_info;

        if self.store.get_server(&uuid).await.map_err(api_error)?.is_none() {
            return Err(AgentApiError::NotFound(uuid));
        }

        let secret_name = format!("{uuid}-bmc");
        let has_credentials = !info.user.is_empty() && !info.pass.is_empty();
        if has_credentials {
            let data = BTreeMap::from([
                (BMC_USER_KEY.to_string(), info.user.clone()),
                (BMC_PASS_KEY.to_string(), info.pass.clone()),
            ]);
            self.store
                .upsert_secret(&self.config.secret_namespace, &secret_name, data)
                .await
                .map_err(api_error)?;
        }

        let namespace = &self.config.secret_namespace;
        let updated = update_server(self.store.as_ref(), &uuid, |server| {
            let bmc = server.spec.bmc.get_or_insert_with(Bmc::default);
            if !info.ip.is_empty() {
                bmc.endpoint.clone_from(&info.ip);
            }
            bmc.port = Some(if info.port == 0 { DEFAULT_BMC_PORT } else { info.port });
            if has_credentials {
                bmc.user_from = secret_ref(namespace, &secret_name, BMC_USER_KEY);
                bmc.pass_from = secret_ref(namespace, &secret_name, BMC_PASS_KEY);
            }
            true
        })
        .await
        .map_err(api_error)?
        .ok_or_else(|| AgentApiError::NotFound(uuid.clone()))?;

        info!(server = %uuid, "updated server with BMC info");
        self.events
            .record(&updated, ServerEvent::normal(REASON_BMC_UPDATE, "BMC info updated via API."))
            .await;
        Ok(())
    }
}
