//! Network boot server.
//!
//! Patches the iPXE binaries, then runs the HTTP, TFTP and DHCP proxy
//! services until cancelled. Any service exiting with an error stops the
//! others.

use crate::boot::{BootConfig, BootResolver};
use crate::dhcp::DhcpServer;
use crate::error::PxeError;
use crate::http::{self, HttpState, StaticRoots};
use crate::ipxe::{IpxePatcher, render_embedded_script};
use crate::tftp::TftpServer;
use axum::Router;
use crds::BootFromDiskMethod;
use metal_store::MetalStore;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Default data directory holding `env/`, `ipxe/` and `tftp/`.
pub const DEFAULT_DATA_DIR: &str = "/var/lib/sidero";

#[derive(Debug, Clone)]
pub struct PxeConfig {
    /// Address machines reach this server on
    pub api_endpoint: String,
    /// Port advertised in agent and Talos kernel arguments
    pub api_port: u16,
    /// Port of the HTTP listener, used by the embedded script and HTTP boot
    pub http_port: u16,
    pub extra_agent_kernel_args: String,
    pub boot_from_disk_method: BootFromDiskMethod,
    pub disable_dhcp_proxy: bool,
    pub dhcp_bind: SocketAddr,
    pub tftp_bind: SocketAddr,
    pub env_root: PathBuf,
    pub ipxe_root: PathBuf,
    pub tftp_root: PathBuf,
    pub zbin: PathBuf,
}

impl Default for PxeConfig {
    fn default() -> Self {
        let data = PathBuf::from(DEFAULT_DATA_DIR);
        Self {
            api_endpoint: String::new(),
            api_port: 8081,
            http_port: 8081,
            extra_agent_kernel_args: String::new(),
            boot_from_disk_method: BootFromDiskMethod::IpxeExit,
            disable_dhcp_proxy: false,
            dhcp_bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 67)),
            tftp_bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 69)),
            env_root: data.join("env"),
            ipxe_root: data.join("ipxe"),
            tftp_root: data.join("tftp"),
            zbin: PathBuf::from(crate::ipxe::DEFAULT_ZBIN),
        }
    }
}

pub struct PxeServer {
    store: Arc<dyn MetalStore>,
    config: PxeConfig,
    extra_routes: Option<Router>,
}

impl PxeServer {
    pub fn new(store: Arc<dyn MetalStore>, config: PxeConfig) -> Self {
        Self {
            store,
            config,
            extra_routes: None,
        }
    }

    /// Serves additional routes on the HTTP listener.
    #[must_use]
    pub fn with_routes(mut self, routes: Router) -> Self {
        self.extra_routes = Some(routes);
        self
    }

    /// Boot endpoints plus any extra routes, without binding.
    pub fn router(&self, embedded_script: &str) -> Router {
        let resolver = BootResolver::new(
            self.store.clone(),
            BootConfig {
                endpoint: self.config.api_endpoint.clone(),
                port: self.config.api_port,
                extra_agent_kernel_args: self.config.extra_agent_kernel_args.clone(),
                default_boot_from_disk: self.config.boot_from_disk_method,
            },
        );

        let router = http::router(
            HttpState {
                resolver,
                embedded_script: Arc::from(embedded_script),
            },
            &StaticRoots {
                env_root: self.config.env_root.clone(),
                tftp_root: self.config.tftp_root.clone(),
            },
        );

        match &self.extra_routes {
            Some(extra) => router.merge(extra.clone()),
            None => router,
        }
    }

    /// Runs every service until `cancel` fires or one of them fails.
    ///
    /// Patching happens first: a script that does not fit the binaries is a
    /// startup error.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), PxeError> {
        let script = render_embedded_script(&self.config.api_endpoint, self.config.http_port);
        IpxePatcher::new(&self.config.ipxe_root, &self.config.tftp_root)
            .with_zbin(&self.config.zbin)
            .patch_all(script.as_bytes())
            .await?;

        let app = self.router(&script);
        let http_bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.http_port));
        let listener = TcpListener::bind(http_bind).await?;
        info!(bind = %http_bind, "HTTP server listening");

        let http_cancel = cancel.clone();
        let http = async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { http_cancel.cancelled().await })
                .await
                .map_err(|e| PxeError::Http(e.to_string()))
        };

        let tftp = TftpServer::new(self.config.tftp_bind, &self.config.tftp_root);
        let tftp = tftp.run(cancel.clone());

        let dhcp = async {
            if self.config.disable_dhcp_proxy {
                info!("DHCP proxy disabled");
                return Ok(());
            }
            DhcpServer::new(self.config.dhcp_bind, &self.config.api_endpoint, self.config.http_port)
                .run(cancel.clone())
                .await
        };

        let result = tokio::try_join!(http, tftp, dhcp);
        cancel.cancel();
        result.map(|_| ())
    }
}
