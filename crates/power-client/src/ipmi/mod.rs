//! IPMI power client
//!
//! Encodes the IPMI commands needed for power control, boot device
//! selection, LAN configuration discovery and BMC user management on top
//! of an [`IpmiTransport`].

pub mod transport;

use crate::error::PowerError;
use crate::power_trait::PowerClient;
use crds::PxeMode;
use std::net::Ipv4Addr;
pub use transport::{IpmiRequest, IpmiTool, IpmiTransport};

const NETFN_CHASSIS: u8 = 0x00;
const NETFN_APP: u8 = 0x06;
const NETFN_TRANSPORT: u8 = 0x0c;

const CMD_CHASSIS_STATUS: u8 = 0x01;
const CMD_CHASSIS_CONTROL: u8 = 0x02;
const CMD_SET_SYSTEM_BOOT_OPTIONS: u8 = 0x08;
const CMD_GET_LAN_CONFIG: u8 = 0x02;
const CMD_SET_USER_ACCESS: u8 = 0x43;
const CMD_GET_USER_ACCESS: u8 = 0x44;
const CMD_SET_USER_NAME: u8 = 0x45;
const CMD_GET_USER_NAME: u8 = 0x46;
const CMD_SET_USER_PASSWORD: u8 = 0x47;

const CONTROL_POWER_DOWN: u8 = 0x00;
const CONTROL_POWER_UP: u8 = 0x01;
const CONTROL_POWER_CYCLE: u8 = 0x02;

const BOOT_PARAM_FLAGS: u8 = 0x05;
const BOOT_FLAGS_VALID: u8 = 0x80;
const BOOT_FLAGS_EFI: u8 = 0x20;
const BOOT_DEVICE_PXE: u8 = 0x04;

const PASSWORD_OP_ENABLE: u8 = 0x01;
const PASSWORD_OP_SET: u8 = 0x02;

/// LAN channel used for configuration and user management.
pub const LAN_CHANNEL: u8 = 0x01;
/// LAN configuration parameter holding the BMC IPv4 address.
pub const LAN_PARAM_IP_ADDRESS: u8 = 0x03;
/// LAN configuration parameter holding the primary RMCP port.
pub const LAN_PARAM_PRIMARY_RMCP_PORT: u8 = 0x08;

/// User name and password fields are fixed 16 byte records.
pub const CREDENTIAL_FIELD_LEN: usize = 16;

/// Answer of Get User Access for the summary of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserSummary {
    /// Number of user slots (bits 5:0)
    pub max_users: u8,
    pub enabled_users: u8,
    pub fixed_names: u8,
}

/// IPMI client over any transport.
#[derive(Debug, Clone)]
pub struct IpmiClient<T = IpmiTool> {
    transport: T,
}

fn credential_field(uid: u8, value: &str, prefix: &[u8]) -> Result<Vec<u8>, PowerError> {
    let bytes = value.as_bytes();
    if bytes.len() > CREDENTIAL_FIELD_LEN {
        return Err(PowerError::Ipmi(format!(
            "value longer than {CREDENTIAL_FIELD_LEN} bytes for user {uid}"
        )));
    }

    let mut data = Vec::with_capacity(prefix.len() + CREDENTIAL_FIELD_LEN + 1);
    data.push(uid);
    data.extend_from_slice(prefix);
    data.extend_from_slice(bytes);
    data.resize(1 + prefix.len() + CREDENTIAL_FIELD_LEN, 0);
    Ok(data)
}

impl<T: IpmiTransport> IpmiClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn send(&self, netfn: u8, cmd: u8, data: Vec<u8>) -> Result<Vec<u8>, PowerError> {
        self.transport.send(&IpmiRequest::new(netfn, cmd, data)).await
    }

    async fn chassis_control(&self, control: u8) -> Result<(), PowerError> {
        self.send(NETFN_CHASSIS, CMD_CHASSIS_CONTROL, vec![control]).await.map(|_| ())
    }

    /// Reads the chassis power bit.
    pub async fn chassis_powered_on(&self) -> Result<bool, PowerError> {
        let resp = self.send(NETFN_CHASSIS, CMD_CHASSIS_STATUS, Vec::new()).await?;
        let state = resp
            .first()
            .ok_or_else(|| PowerError::Ipmi("empty chassis status response".to_string()))?;
        Ok(state & 0x01 == 0x01)
    }

    /// Sets the next boot device to PXE, once.
    pub async fn set_boot_device_pxe(&self, mode: PxeMode) -> Result<(), PowerError> {
        let flags = match mode {
            PxeMode::Bios => BOOT_FLAGS_VALID,
            PxeMode::Uefi => BOOT_FLAGS_VALID | BOOT_FLAGS_EFI,
        };
        self.send(
            NETFN_CHASSIS,
            CMD_SET_SYSTEM_BOOT_OPTIONS,
            vec![BOOT_PARAM_FLAGS, flags, BOOT_DEVICE_PXE, 0x00, 0x00, 0x00],
        )
        .await
        .map(|_| ())
    }

    /// Reads a LAN configuration parameter of channel 1, without the revision byte.
    pub async fn get_lan_config(&self, param: u8) -> Result<Vec<u8>, PowerError> {
        let resp = self
            .send(NETFN_TRANSPORT, CMD_GET_LAN_CONFIG, vec![LAN_CHANNEL, param, 0x00, 0x00])
            .await?;
        match resp.split_first() {
            Some((_revision, data)) => Ok(data.to_vec()),
            None => Err(PowerError::Ipmi(format!("empty LAN config response for param {param}"))),
        }
    }

    /// BMC IPv4 address (LAN parameter 3).
    pub async fn bmc_ip(&self) -> Result<Ipv4Addr, PowerError> {
        let data = self.get_lan_config(LAN_PARAM_IP_ADDRESS).await?;
        let octets: [u8; 4] = data
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| PowerError::Ipmi(format!("short IP address payload: {data:02x?}")))?;
        Ok(Ipv4Addr::from(octets))
    }

    /// BMC RMCP port (LAN parameter 8, little endian).
    pub async fn bmc_port(&self) -> Result<u16, PowerError> {
        let data = self.get_lan_config(LAN_PARAM_PRIMARY_RMCP_PORT).await?;
        match data.as_slice() {
            [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
            _ => Err(PowerError::Ipmi(format!("short port payload: {data:02x?}"))),
        }
    }

    pub async fn get_user_summary(&self) -> Result<UserSummary, PowerError> {
        let resp = self.send(NETFN_APP, CMD_GET_USER_ACCESS, vec![LAN_CHANNEL, 0x01]).await?;
        match resp.as_slice() {
            [max, enabled, fixed, ..] => Ok(UserSummary {
                max_users: max & 0x3f,
                enabled_users: enabled & 0x3f,
                fixed_names: fixed & 0x3f,
            }),
            _ => Err(PowerError::Ipmi(format!("short user access response: {resp:02x?}"))),
        }
    }

    /// Name of user slot `uid`, with NUL padding stripped.
    pub async fn get_user_name(&self, uid: u8) -> Result<String, PowerError> {
        let resp = self.send(NETFN_APP, CMD_GET_USER_NAME, vec![uid]).await?;
        let end = resp.iter().position(|b| *b == 0).unwrap_or(resp.len());
        Ok(String::from_utf8_lossy(&resp[..end]).into_owned())
    }

    pub async fn set_user_name(&self, uid: u8, name: &str) -> Result<(), PowerError> {
        let data = credential_field(uid, name, &[])?;
        self.send(NETFN_APP, CMD_SET_USER_NAME, data).await.map(|_| ())
    }

    pub async fn set_user_pass(&self, uid: u8, pass: &str) -> Result<(), PowerError> {
        let data = credential_field(uid, pass, &[PASSWORD_OP_SET])?;
        self.send(NETFN_APP, CMD_SET_USER_PASSWORD, data).await.map(|_| ())
    }

    pub async fn set_user_access(&self, options: u8, uid: u8, limits: u8, session: u8) -> Result<(), PowerError> {
        self.send(NETFN_APP, CMD_SET_USER_ACCESS, vec![options, uid, limits, session])
            .await
            .map(|_| ())
    }

    pub async fn enable_user(&self, uid: u8) -> Result<(), PowerError> {
        self.send(NETFN_APP, CMD_SET_USER_PASSWORD, vec![uid, PASSWORD_OP_ENABLE])
            .await
            .map(|_| ())
    }
}

#[async_trait::async_trait]
impl<T: IpmiTransport> PowerClient for IpmiClient<T> {
    async fn power_on(&self) -> Result<(), PowerError> {
        self.chassis_control(CONTROL_POWER_UP).await
    }

    async fn power_off(&self) -> Result<(), PowerError> {
        self.chassis_control(CONTROL_POWER_DOWN).await
    }

    async fn power_cycle(&self) -> Result<(), PowerError> {
        self.chassis_control(CONTROL_POWER_CYCLE).await
    }

    async fn is_powered_on(&self) -> Result<bool, PowerError> {
        self.chassis_powered_on().await
    }

    async fn set_pxe(&self, mode: PxeMode) -> Result<(), PowerError> {
        self.set_boot_device_pxe(mode).await
    }
}
