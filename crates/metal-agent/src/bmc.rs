//! BMC auto-setup.
//!
//! Reads the BMC address from the local IPMI interface, claims a user slot
//! for the `sidero` account with a fresh password and reports both to the
//! controller. Best effort: failures are logged, never propagated.

use crate::error::AgentError;
use agent_api::{AgentApi, BmcInfo, BmcInfoRequest};
use power_client::{IpmiClient, IpmiTransport};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{info, warn};

pub const BMC_USER: &str = "sidero";
pub const PASSWORD_LEN: usize = 16;

/// Slot 1 is the reserved anonymous administrator.
const FIRST_USER_SLOT: u8 = 2;

/// Callin, IPMI messaging, channel 1.
const ACCESS_OPTIONS: u8 = 0x91;
const PRIVILEGE_ADMINISTRATOR: u8 = 0x04;
const NO_SESSION_LIMIT: u8 = 0x00;

pub fn generate_password<R: Rng>(rng: &mut R) -> String {
    (0..PASSWORD_LEN).map(|_| char::from(rng.sample(Alphanumeric))).collect()
}

/// BMC address and RMCP port from LAN parameters 3 and 8.
pub async fn discover<T: IpmiTransport>(ipmi: &IpmiClient<T>) -> Result<BmcInfo, AgentError> {
    let ip = ipmi.bmc_ip().await?;
    let port = ipmi.bmc_port().await?;
    Ok(BmcInfo {
        ip: ip.to_string(),
        port,
        ..BmcInfo::default()
    })
}

/// Picks the slot for the BMC user: an existing `sidero` slot, else the
/// first empty or unreadable one.
async fn find_slot<T: IpmiTransport>(ipmi: &IpmiClient<T>) -> Result<(u8, bool), AgentError> {
    let max_users = ipmi.get_user_summary().await?.max_users;
    let mut free = None;

    for uid in FIRST_USER_SLOT..=max_users {
        match ipmi.get_user_name(uid).await {
            Ok(name) if name == BMC_USER => {
                info!(slot = uid, "BMC user already present, claiming it");
                return Ok((uid, true));
            }
            Ok(name) if name.is_empty() => {
                free.get_or_insert(uid);
            }
            Ok(_) => {}
            // unreadable slots are unused on most BMCs
            Err(_) => {
                free.get_or_insert(uid);
            }
        }
    }

    free.map(|uid| (uid, false)).ok_or_else(|| {
        AgentError::Bmc(power_client::PowerError::Ipmi(format!(
            "no slot available for {BMC_USER} user"
        )))
    })
}

/// Creates or resets the BMC user. The password is always regenerated
/// since an existing one cannot be read back.
pub async fn setup_user<T: IpmiTransport>(ipmi: &IpmiClient<T>, pass: &str) -> Result<(), AgentError> {
    let (uid, exists) = find_slot(ipmi).await?;

    if !exists {
        info!(slot = uid, "adding BMC user");
        ipmi.set_user_name(uid, BMC_USER).await?;
    }

    ipmi.set_user_pass(uid, pass).await?;
    ipmi.set_user_access(ACCESS_OPTIONS, uid, PRIVILEGE_ADMINISTRATOR, NO_SESSION_LIMIT)
        .await?;
    ipmi.enable_user(uid).await?;
    Ok(())
}

/// Discovers the BMC, provisions the user and reports what worked.
pub async fn auto_setup<T: IpmiTransport>(api: &dyn AgentApi, uuid: &str, ipmi: &IpmiClient<T>) {
    let mut bmc_info = match discover(ipmi).await {
        Ok(info) => info,
        Err(e) => {
            warn!(error = %e, "encountered error discovering BMC IP, skipping setup");
            return;
        }
    };

    let pass = generate_password(&mut rand::thread_rng());
    match setup_user(ipmi, &pass).await {
        Ok(()) => {
            bmc_info.user = BMC_USER.to_string();
            bmc_info.pass = pass;
        }
        Err(e) => warn!(error = %e, "encountered error setting up BMC user, reporting address only"),
    }

    let req = BmcInfoRequest {
        uuid: uuid.to_string(),
        bmc_info,
    };
    if let Err(e) = api.report_bmc_info(req).await {
        warn!(error = %e, "failed to report BMC info");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_api::MockAgentApi;
    use power_client::{IpmiRequest, MockIpmiTransport, PowerError};
    use std::collections::HashMap;
    use std::sync::Mutex;

    const NETFN_APP: u8 = 0x06;
    const NETFN_TRANSPORT: u8 = 0x0c;
    const GET_LAN_CONFIG: u8 = 0x02;
    const SET_USER_ACCESS: u8 = 0x43;
    const GET_USER_ACCESS: u8 = 0x44;
    const SET_USER_NAME: u8 = 0x45;
    const GET_USER_NAME: u8 = 0x46;
    const SET_USER_PASSWORD: u8 = 0x47;

    /// BMC with per-slot user names; `None` slots fail to read.
    #[derive(Default)]
    struct SlotBmc {
        slots: HashMap<u8, Option<&'static str>>,
        sent: Mutex<Vec<IpmiRequest>>,
    }

    #[async_trait::async_trait]
    impl IpmiTransport for SlotBmc {
        async fn send(&self, req: &IpmiRequest) -> Result<Vec<u8>, PowerError> {
            self.sent.lock().unwrap().push(req.clone());
            match (req.netfn, req.cmd) {
                (NETFN_TRANSPORT, GET_LAN_CONFIG) if req.data[1] == 3 => Ok(vec![0x11, 10, 0, 0, 9]),
                (NETFN_TRANSPORT, GET_LAN_CONFIG) => Ok(vec![0x11, 0x6f, 0x02]),
                (NETFN_APP, GET_USER_ACCESS) => Ok(vec![0xc4, 0x01, 0x01, 0x00]),
                (NETFN_APP, GET_USER_NAME) => match self.slots.get(&req.data[0]) {
                    Some(Some(name)) => {
                        let mut bytes = name.as_bytes().to_vec();
                        bytes.resize(16, 0);
                        Ok(bytes)
                    }
                    _ => Err(PowerError::Ipmi("invalid user id".to_string())),
                },
                _ => Ok(Vec::new()),
            }
        }
    }

    impl SlotBmc {
        fn with(slots: &[(u8, Option<&'static str>)]) -> IpmiClient<Self> {
            IpmiClient::new(Self {
                slots: slots.iter().copied().collect(),
                ..Self::default()
            })
        }
    }

    fn sent_cmds(ipmi: &IpmiClient<SlotBmc>) -> Vec<(u8, Vec<u8>)> {
        ipmi.transport()
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter(|r| matches!(r.cmd, SET_USER_NAME | SET_USER_ACCESS | SET_USER_PASSWORD))
            .map(|r| (r.cmd, r.data.clone()))
            .collect()
    }

    #[test]
    fn test_password_shape() {
        let pass = generate_password(&mut rand::thread_rng());
        assert_eq!(pass.len(), PASSWORD_LEN);
        assert!(pass.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn test_existing_user_is_reused() {
        let ipmi = SlotBmc::with(&[(2, Some("admin")), (3, Some("")), (4, Some(BMC_USER))]);
        setup_user(&ipmi, "0123456789abcdef").await.unwrap();

        let cmds = sent_cmds(&ipmi);
        assert!(!cmds.iter().any(|(cmd, _)| *cmd == SET_USER_NAME));
        assert!(cmds.contains(&(SET_USER_ACCESS, vec![0x91, 4, 0x04, 0x00])));
        assert!(cmds.contains(&(SET_USER_PASSWORD, vec![4, 0x01])));
    }

    #[tokio::test]
    async fn test_first_free_slot_is_claimed() {
        let ipmi = SlotBmc::with(&[(2, Some("admin")), (3, None), (4, Some(""))]);
        setup_user(&ipmi, "0123456789abcdef").await.unwrap();

        let cmds = sent_cmds(&ipmi);
        let (_, name) = cmds.iter().find(|(cmd, _)| *cmd == SET_USER_NAME).unwrap();
        assert_eq!(name[0], 3);
        assert_eq!(&name[1..7], BMC_USER.as_bytes());
    }

    #[tokio::test]
    async fn test_no_free_slot_fails() {
        let ipmi = SlotBmc::with(&[(2, Some("a")), (3, Some("b")), (4, Some("c"))]);
        assert!(setup_user(&ipmi, "x").await.is_err());
    }

    #[tokio::test]
    async fn test_auto_setup_reports_address_and_credentials() {
        let api = MockAgentApi::new();
        let ipmi = SlotBmc::with(&[(2, Some(""))]);

        auto_setup(&api, "abc", &ipmi).await;

        let reports = api.bmc_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].bmc_info.ip, "10.0.0.9");
        assert_eq!(reports[0].bmc_info.port, 623);
        assert_eq!(reports[0].bmc_info.user, BMC_USER);
        assert_eq!(reports[0].bmc_info.pass.len(), PASSWORD_LEN);
    }

    #[tokio::test]
    async fn test_auto_setup_without_bmc_reports_nothing() {
        let api = MockAgentApi::new();
        let transport = MockIpmiTransport::new();
        transport.fail(NETFN_TRANSPORT, GET_LAN_CONFIG, "no BMC device");

        auto_setup(&api, "abc", &IpmiClient::new(transport)).await;
        assert!(api.bmc_reports().is_empty());
    }
}
