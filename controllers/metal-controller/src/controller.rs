//! Main controller implementation.
//!
//! Wires the record store, power client factory and event recorder into
//! the reconcilers, and runs alongside them:
//! - the Server and ServerClass watchers
//! - the PXE boot server (DHCP proxy, TFTP, HTTP) with the agent RPC
//!   routes mounted on its HTTP listener

use crate::agent_server::{AgentService, AgentServiceConfig};
use crate::config::Config;
use crate::error::ControllerError;
use crate::events::{EventRecorder, KubeEventRecorder};
use crate::reconciler::{Reconciler, Settings, StoreCredentialResolver};
use crate::watcher::Watcher;
use kube::Client;
use metal_store::{KubeStore, MetalStore};
use power_client::{DefaultPowerClientFactory, FailureDice};
use pxe_server::PxeServer;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Main controller for bare-metal server management.
pub struct Controller {
    server_watcher: JoinHandle<Result<(), ControllerError>>,
    server_class_watcher: JoinHandle<Result<(), ControllerError>>,
    pxe_server: JoinHandle<Result<(), ControllerError>>,
    cancel: CancellationToken,
}

impl Controller {
    /// Creates the controller and starts every background task.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing metal controller");

        let kube_client = Client::try_default().await?;
        let store: Arc<dyn MetalStore> = Arc::new(KubeStore::new(kube_client.clone()));
        let events: Arc<dyn EventRecorder> = Arc::new(KubeEventRecorder::new(kube_client.clone()));

        let dice = Arc::new(FailureDice::new(
            config.test_power_simulated_explicit_failure_prob,
            config.test_power_simulated_silent_failure_prob,
            config.test_power_seed,
        ));
        if dice.is_enabled() {
            warn!("power management failure injection is enabled");
        }
        let power = Arc::new(DefaultPowerClientFactory::new(
            StoreCredentialResolver::new(Arc::clone(&store)),
            dice,
        ));

        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store),
            power,
            Arc::clone(&events),
            Settings {
                pxe_mode: config.ipmi_pxe_method,
                reboot_timeout: config.reboot_timeout(),
                power_check_period: config.power_check_period(),
            },
        ));

        if let Err(e) = reconciler.ensure_any_class().await {
            warn!("Failed to ensure server class \"any\" (will retry on reconcile): {}", e);
        }

        let agent = Arc::new(AgentService::new(
            Arc::clone(&store),
            events,
            AgentServiceConfig {
                auto_accept: config.auto_accept_servers,
                insecure_wipe: config.insecure_wipe,
                auto_bmc_setup: config.auto_bmc_setup,
                reboot_timeout: config.reboot_timeout(),
                secret_namespace: config.watch_namespace.clone(),
            },
        ));

        let cancel = CancellationToken::new();
        let pxe_server = {
            let server = PxeServer::new(store, config.pxe_config()).with_routes(agent_api::router(agent));
            let cancel = cancel.clone();
            tokio::spawn(async move { server.run(cancel).await.map_err(ControllerError::from) })
        };

        let watcher_instance = Arc::new(Watcher::new(reconciler, kube_client));

        let server_watcher = {
            let watcher = Arc::clone(&watcher_instance);
            tokio::spawn(async move { watcher.watch_servers().await })
        };

        let server_class_watcher = {
            let watcher = watcher_instance;
            tokio::spawn(async move { watcher.watch_server_classes().await })
        };

        Ok(Self {
            server_watcher,
            server_class_watcher,
            pxe_server,
            cancel,
        })
    }

    /// Runs the controller until a task exits or a shutdown signal arrives.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Metal controller running");

        let result = tokio::select! {
            result = &mut self.server_watcher => Self::joined("Server watcher", result),
            result = &mut self.server_class_watcher => Self::joined("ServerClass watcher", result),
            result = &mut self.pxe_server => Self::joined("PXE server", result),
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                Ok(())
            }
        };

        self.cancel.cancel();
        result
    }

    fn joined(
        task: &str,
        result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
    ) -> Result<(), ControllerError> {
        result
            .map_err(|e| ControllerError::Watch(format!("{task} panicked: {e}")))?
            .map_err(|e| ControllerError::Watch(format!("{task} error: {e}")))?;
        warn!("{} exited", task);
        Ok(())
    }
}
