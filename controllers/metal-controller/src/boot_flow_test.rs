//! Boot flow tests for a machine the controller has never seen
//!
//! Walks one machine through the DHCP proxy, the iPXE endpoint and agent
//! registration, all served from the same store.

#[cfg(test)]
mod tests {
    use crate::agent_server::{AgentService, AgentServiceConfig};
    use crate::events::mock::MockEventRecorder;
    use agent_api::{HardwareDescriptor, RegisterRequest, RegisterResponse, SystemInfo, paths};
    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use crds::{CONDITION_PXE_BOOTED, conditions};
    use dhcproto::v4::{Architecture, DhcpOption, Message, MessageType, OptionCode};
    use dhcproto::{Decodable, Decoder, Encodable};
    use metal_store::{MemoryStore, MetalStore};
    use pxe_server::dhcp::{self, arch};
    use pxe_server::{PxeConfig, PxeServer};
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    const UUID: &str = "4c4c4544-0048-4b10-8039-b4c04f4e3232";
    const MAC: [u8; 6] = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];
    const ENDPOINT: Ipv4Addr = Ipv4Addr::new(10, 5, 0, 1);

    fn app(store: &MemoryStore) -> Router {
        let agent = AgentService::new(
            Arc::new(store.clone()),
            Arc::new(MockEventRecorder::new()),
            AgentServiceConfig {
                auto_accept: false,
                insecure_wipe: true,
                auto_bmc_setup: true,
                reboot_timeout: Duration::from_secs(1200),
                secret_namespace: "default".to_string(),
            },
        );

        PxeServer::new(
            Arc::new(store.clone()),
            PxeConfig {
                api_endpoint: ENDPOINT.to_string(),
                ..PxeConfig::default()
            },
        )
        .with_routes(agent_api::router(Arc::new(agent)))
        .router("#!ipxe\nchain ipxe\n")
    }

    fn efi_discover() -> Vec<u8> {
        let mut msg = Message::new_with_id(
            0x1234_5678,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            &MAC,
        );
        msg.opts_mut().insert(DhcpOption::MessageType(MessageType::Discover));
        msg.opts_mut().insert(DhcpOption::ClientSystemArchitecture(Architecture::from(
            arch::EFI_X86_64,
        )));
        msg.opts_mut().insert(DhcpOption::ClassIdentifier(b"PXEClient:Arch:00007".to_vec()));
        msg.to_vec().unwrap()
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, String) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn register(uuid: &str) -> Request<Body> {
        let body = RegisterRequest {
            hardware: HardwareDescriptor {
                system: SystemInfo {
                    uuid: uuid.to_string(),
                    ..SystemInfo::default()
                },
                ..HardwareDescriptor::default()
            },
            hostname: "node-1".to_string(),
        };
        Request::builder()
            .method("POST")
            .uri(paths::REGISTER)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_new_machine_boots_agent_and_registers() {
        let store = MemoryStore::new();

        // DHCP: UEFI firmware is pointed at snp.efi on the controller
        let offer = dhcp::handle_packet(&efi_discover(), ENDPOINT, 8081).unwrap().unwrap();
        let offer = Message::decode(&mut Decoder::new(&offer)).unwrap();
        assert_eq!(
            offer.opts().get(OptionCode::BootfileName),
            Some(&DhcpOption::BootfileName(b"snp.efi".to_vec()))
        );
        assert_eq!(
            offer.opts().get(OptionCode::TFTPServerName),
            Some(&DhcpOption::TFTPServerName(b"10.5.0.1".to_vec()))
        );

        // iPXE: an unknown uuid gets the agent environment
        let uri = format!("/ipxe?uuid={UUID}&mac=52:54:00:12:34:56&arch=amd64");
        let (status, script) = send(app(&store), get(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(script.contains("kernel /env/agent-amd64/vmlinuz"));
        assert!(script.contains("sidero.endpoint=10.5.0.1:8081"));
        assert!(script.contains("sidero.mac=52:54:00:12:34:56"));
        assert!(store.get_server(UUID).await.unwrap().is_none());

        // agent: registration creates the record, unaccepted, with no directives
        let (status, body) = send(app(&store), register(UUID)).await;
        assert_eq!(status, StatusCode::OK);
        let directives: RegisterResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(directives, RegisterResponse::default());

        let server = store.get_server(UUID).await.unwrap().unwrap();
        assert!(!server.spec.accepted);
        assert_eq!(server.spec.hostname.as_deref(), Some("node-1"));
        assert!(!conditions::has(server.conditions(), CONDITION_PXE_BOOTED));

        // the next boot still gets the agent until the server is accepted
        let (status, script) = send(app(&store), get(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(script.contains("kernel /env/agent-amd64/vmlinuz"));
    }

    #[tokio::test]
    async fn test_register_without_uuid_is_rejected() {
        let store = MemoryStore::new();
        let (status, _) = send(app(&store), register("")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(store.list_servers().await.unwrap().is_empty());
    }
}
