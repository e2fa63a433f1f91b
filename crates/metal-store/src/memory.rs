//! In-memory store for unit testing
//!
//! Behaves like the API server where it matters to the controllers:
//! per-object resource versions, 409-style conflicts on stale writes, and
//! change notifications for servers.

use crate::error::StoreError;
use crate::store_trait::MetalStore;
use crds::{Environment, SecretKeyRef, Server, ServerBinding, ServerClass};
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

#[derive(Default)]
struct Records {
    version: u64,
    servers: HashMap<String, Server>,
    bindings: HashMap<String, ServerBinding>,
    classes: HashMap<String, ServerClass>,
    environments: HashMap<String, Environment>,
    secrets: HashMap<(String, String), BTreeMap<String, String>>,
}

impl Records {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// In-memory [`MetalStore`]. Clones share state.
#[derive(Clone)]
pub struct MemoryStore {
    records: Arc<Mutex<Records>>,
    events: broadcast::Sender<String>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_version(kind: &'static str, name: &str, stored: Option<&String>, given: Option<&String>) -> Result<(), StoreError> {
    match given {
        Some(v) if Some(v) != stored => Err(StoreError::Conflict {
            kind,
            name: name.to_string(),
        }),
        _ => Ok(()),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            records: Arc::default(),
            events,
        }
    }

    fn notify(&self, name: &str) {
        let _ = self.events.send(name.to_string());
    }

    /// Stores `server` as is, assigning a fresh resource version.
    pub fn insert_server(&self, mut server: Server) {
        let name = server.name_any();
        {
            let mut records = self.records.lock().unwrap();
            server.metadata.resource_version = Some(records.next_version());
            records.servers.insert(name.clone(), server);
        }
        self.notify(&name);
    }

    pub fn insert_binding(&self, mut binding: ServerBinding) {
        let mut records = self.records.lock().unwrap();
        binding.metadata.resource_version = Some(records.next_version());
        records.bindings.insert(binding.name_any(), binding);
    }

    pub fn remove_binding(&self, name: &str) {
        self.records.lock().unwrap().bindings.remove(name);
    }

    pub fn insert_server_class(&self, mut class: ServerClass) {
        let mut records = self.records.lock().unwrap();
        class.metadata.resource_version = Some(records.next_version());
        records.classes.insert(class.name_any(), class);
    }

    pub fn insert_environment(&self, mut env: Environment) {
        let mut records = self.records.lock().unwrap();
        env.metadata.resource_version = Some(records.next_version());
        records.environments.insert(env.name_any(), env);
    }

    /// Data of a stored secret.
    pub fn secret(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, String>> {
        self.records
            .lock()
            .unwrap()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }
}

#[async_trait::async_trait]
impl MetalStore for MemoryStore {
    async fn get_server(&self, name: &str) -> Result<Option<Server>, StoreError> {
        Ok(self.records.lock().unwrap().servers.get(name).cloned())
    }

    async fn list_servers(&self) -> Result<Vec<Server>, StoreError> {
        let mut servers: Vec<_> = self.records.lock().unwrap().servers.values().cloned().collect();
        servers.sort_by_key(|r| r.name_any());
        Ok(servers)
    }

    async fn create_server(&self, server: &Server) -> Result<Server, StoreError> {
        let name = server.name_any();
        let stored = {
            let mut records = self.records.lock().unwrap();
            if records.servers.contains_key(&name) {
                return Err(StoreError::AlreadyExists { kind: "Server", name });
            }
            let mut stored = server.clone();
            stored.metadata.resource_version = Some(records.next_version());
            records.servers.insert(name.clone(), stored.clone());
            stored
        };
        self.notify(&name);
        Ok(stored)
    }

    async fn replace_server(&self, server: &Server) -> Result<Server, StoreError> {
        let name = server.name_any();
        let stored = {
            let mut records = self.records.lock().unwrap();
            let version = records.next_version();
            let existing = records.servers.get_mut(&name).ok_or_else(|| StoreError::NotFound {
                kind: "Server",
                name: name.clone(),
            })?;
            check_version(
                "Server",
                &name,
                existing.metadata.resource_version.as_ref(),
                server.metadata.resource_version.as_ref(),
            )?;
            existing.metadata = server.metadata.clone();
            existing.spec = server.spec.clone();
            existing.metadata.resource_version = Some(version);
            existing.clone()
        };
        self.notify(&name);
        Ok(stored)
    }

    async fn replace_server_status(&self, server: &Server) -> Result<Server, StoreError> {
        let name = server.name_any();
        let stored = {
            let mut records = self.records.lock().unwrap();
            let version = records.next_version();
            let existing = records.servers.get_mut(&name).ok_or_else(|| StoreError::NotFound {
                kind: "Server",
                name: name.clone(),
            })?;
            check_version(
                "Server",
                &name,
                existing.metadata.resource_version.as_ref(),
                server.metadata.resource_version.as_ref(),
            )?;
            existing.status = server.status.clone();
            existing.metadata.resource_version = Some(version);
            existing.clone()
        };
        self.notify(&name);
        Ok(stored)
    }

    async fn get_server_binding(&self, name: &str) -> Result<Option<ServerBinding>, StoreError> {
        Ok(self.records.lock().unwrap().bindings.get(name).cloned())
    }

    async fn get_server_class(&self, name: &str) -> Result<Option<ServerClass>, StoreError> {
        Ok(self.records.lock().unwrap().classes.get(name).cloned())
    }

    async fn list_server_classes(&self) -> Result<Vec<ServerClass>, StoreError> {
        let mut classes: Vec<_> = self.records.lock().unwrap().classes.values().cloned().collect();
        classes.sort_by_key(|r| r.name_any());
        Ok(classes)
    }

    async fn create_server_class(&self, class: &ServerClass) -> Result<ServerClass, StoreError> {
        let name = class.name_any();
        let mut records = self.records.lock().unwrap();
        if records.classes.contains_key(&name) {
            return Err(StoreError::AlreadyExists {
                kind: "ServerClass",
                name,
            });
        }
        let mut stored = class.clone();
        stored.metadata.resource_version = Some(records.next_version());
        records.classes.insert(name, stored.clone());
        Ok(stored)
    }

    async fn replace_server_class(&self, class: &ServerClass) -> Result<ServerClass, StoreError> {
        let name = class.name_any();
        let mut records = self.records.lock().unwrap();
        let version = records.next_version();
        let existing = records.classes.get_mut(&name).ok_or_else(|| StoreError::NotFound {
            kind: "ServerClass",
            name: name.clone(),
        })?;
        check_version(
            "ServerClass",
            &name,
            existing.metadata.resource_version.as_ref(),
            class.metadata.resource_version.as_ref(),
        )?;
        existing.metadata = class.metadata.clone();
        existing.spec = class.spec.clone();
        existing.metadata.resource_version = Some(version);
        Ok(existing.clone())
    }

    async fn replace_server_class_status(&self, class: &ServerClass) -> Result<ServerClass, StoreError> {
        let name = class.name_any();
        let mut records = self.records.lock().unwrap();
        let version = records.next_version();
        let existing = records.classes.get_mut(&name).ok_or_else(|| StoreError::NotFound {
            kind: "ServerClass",
            name: name.clone(),
        })?;
        check_version(
            "ServerClass",
            &name,
            existing.metadata.resource_version.as_ref(),
            class.metadata.resource_version.as_ref(),
        )?;
        existing.status = class.status.clone();
        existing.metadata.resource_version = Some(version);
        Ok(existing.clone())
    }

    async fn get_environment(&self, name: &str) -> Result<Option<Environment>, StoreError> {
        Ok(self.records.lock().unwrap().environments.get(name).cloned())
    }

    async fn get_secret_value(&self, key_ref: &SecretKeyRef) -> Result<Option<String>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .secrets
            .get(&(key_ref.namespace.clone(), key_ref.name.clone()))
            .and_then(|data| data.get(&key_ref.key).cloned()))
    }

    async fn upsert_secret(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        self.records
            .lock()
            .unwrap()
            .secrets
            .insert((namespace.to_string(), name.to_string()), data);
        Ok(())
    }

    fn watch_servers(&self) -> BoxStream<'static, Result<String, StoreError>> {
        futures::stream::unfold(self.events.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(name) => return Some((Ok(name), rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}
