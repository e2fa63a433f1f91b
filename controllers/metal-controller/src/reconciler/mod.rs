//! Reconciliation logic for the metal resources.
//!
//! - `server`: power lifecycle of a single Server
//! - `server_class`: membership counts of ServerClasses

pub mod server;
pub mod server_class;

use crate::backoff::FibonacciBackoff;
use crate::events::EventRecorder;
use crds::{PxeMode, SecretKeyRef};
use metal_store::MetalStore;
use power_client::{CredentialResolver, PowerClientFactory, PowerError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::default(),
            error_count: 0,
        }
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Server lifecycle tunables.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Boot mode requested when the server does not set one
    pub pxe_mode: PxeMode,
    /// How long a power cycled server may take to start wiping
    pub reboot_timeout: Duration,
    /// Requeue interval of provisioning servers
    pub power_check_period: Duration,
}

/// Shared context of the metal reconcilers.
pub struct Reconciler {
    pub(crate) store: Arc<dyn MetalStore>,
    pub(crate) power: Arc<dyn PowerClientFactory>,
    pub(crate) events: Arc<dyn EventRecorder>,
    pub(crate) settings: Settings,
    /// Error tracking per resource (kind/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn MetalStore>,
        power: Arc<dyn PowerClientFactory>,
        events: Arc<dyn EventRecorder>,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            power,
            events,
            settings,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Records a failed reconcile and returns how long to wait before the
    /// next attempt.
    pub fn next_backoff(&self, resource_key: &str) -> (Duration, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states.entry(resource_key.to_string()).or_insert_with(BackoffState::new);
                state.error_count += 1;
                (state.backoff.next_backoff(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (Duration::from_secs(60), 0)
            }
        }
    }

    /// Reset error tracking for a resource after a successful reconcile.
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock()
            && let Some(state) = states.get_mut(resource_key)
        {
            state.reset();
        }
    }
}

/// Resolves BMC credential references through the record store.
pub struct StoreCredentialResolver {
    store: Arc<dyn MetalStore>,
}

impl StoreCredentialResolver {
    pub fn new(store: Arc<dyn MetalStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl CredentialResolver for StoreCredentialResolver {
    async fn resolve(&self, key_ref: &SecretKeyRef) -> Result<String, PowerError> {
        self.store
            .get_secret_value(key_ref)
            .await
            .map_err(|e| PowerError::Credentials(e.to_string()))?
            .ok_or_else(|| {
                PowerError::Credentials(format!(
                    "secret {}/{} has no key {:?}",
                    key_ref.namespace, key_ref.name, key_ref.key
                ))
            })
    }
}
