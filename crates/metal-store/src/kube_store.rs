//! Kubernetes backed store.
//!
//! Every metal resource is cluster scoped. Status writes are merge patches
//! carrying `metadata.resourceVersion`, so the API server rejects them
//! with 409 when the object moved on since it was read.

use crate::error::StoreError;
use crate::store_trait::MetalStore;
use crds::{Environment, SecretKeyRef, Server, ServerBinding, ServerClass};
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use kube_runtime::watcher;
use kube_runtime::WatchStreamExt;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

const FIELD_MANAGER: &str = "metal-controller";

fn api_code(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(resp) => Some(resp.code),
        _ => None,
    }
}

fn map_write_error(err: kube::Error, kind: &'static str, name: &str) -> StoreError {
    match api_code(&err) {
        Some(409) => StoreError::Conflict {
            kind,
            name: name.to_string(),
        },
        Some(404) => StoreError::NotFound {
            kind,
            name: name.to_string(),
        },
        _ => StoreError::Kube(err),
    }
}

fn map_create_error(err: kube::Error, kind: &'static str, name: &str) -> StoreError {
    match api_code(&err) {
        Some(409) => StoreError::AlreadyExists {
            kind,
            name: name.to_string(),
        },
        _ => StoreError::Kube(err),
    }
}

/// [`MetalStore`] over the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    servers: Api<Server>,
    bindings: Api<ServerBinding>,
    classes: Api<ServerClass>,
    environments: Api<Environment>,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self {
            servers: Api::all(client.clone()),
            bindings: Api::all(client.clone()),
            classes: Api::all(client.clone()),
            environments: Api::all(client.clone()),
            client,
        }
    }

    /// Underlying Kubernetes client.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn status_patch<S: serde::Serialize>(resource_version: Option<&String>, status: &S) -> serde_json::Value {
        json!({
            "metadata": { "resourceVersion": resource_version },
            "status": status,
        })
    }
}

#[async_trait::async_trait]
impl MetalStore for KubeStore {
    async fn get_server(&self, name: &str) -> Result<Option<Server>, StoreError> {
        Ok(self.servers.get_opt(name).await?)
    }

    async fn list_servers(&self) -> Result<Vec<Server>, StoreError> {
        Ok(self.servers.list(&ListParams::default()).await?.items)
    }

    async fn create_server(&self, server: &Server) -> Result<Server, StoreError> {
        let name = server.name_any();
        debug!(server = %name, "creating server");
        self.servers
            .create(&PostParams::default(), server)
            .await
            .map_err(|e| map_create_error(e, "Server", &name))
    }

    async fn replace_server(&self, server: &Server) -> Result<Server, StoreError> {
        let name = server.name_any();
        self.servers
            .replace(&name, &PostParams::default(), server)
            .await
            .map_err(|e| map_write_error(e, "Server", &name))
    }

    async fn replace_server_status(&self, server: &Server) -> Result<Server, StoreError> {
        let name = server.name_any();
        let patch = Self::status_patch(server.metadata.resource_version.as_ref(), &server.status);
        self.servers
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_write_error(e, "Server", &name))
    }

    async fn get_server_binding(&self, name: &str) -> Result<Option<ServerBinding>, StoreError> {
        Ok(self.bindings.get_opt(name).await?)
    }

    async fn get_server_class(&self, name: &str) -> Result<Option<ServerClass>, StoreError> {
        Ok(self.classes.get_opt(name).await?)
    }

    async fn list_server_classes(&self) -> Result<Vec<ServerClass>, StoreError> {
        Ok(self.classes.list(&ListParams::default()).await?.items)
    }

    async fn create_server_class(&self, class: &ServerClass) -> Result<ServerClass, StoreError> {
        let name = class.name_any();
        self.classes
            .create(&PostParams::default(), class)
            .await
            .map_err(|e| map_create_error(e, "ServerClass", &name))
    }

    async fn replace_server_class(&self, class: &ServerClass) -> Result<ServerClass, StoreError> {
        let name = class.name_any();
        self.classes
            .replace(&name, &PostParams::default(), class)
            .await
            .map_err(|e| map_write_error(e, "ServerClass", &name))
    }

    async fn replace_server_class_status(&self, class: &ServerClass) -> Result<ServerClass, StoreError> {
        let name = class.name_any();
        let patch = Self::status_patch(class.metadata.resource_version.as_ref(), &class.status);
        self.classes
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_write_error(e, "ServerClass", &name))
    }

    async fn get_environment(&self, name: &str) -> Result<Option<Environment>, StoreError> {
        Ok(self.environments.get_opt(name).await?)
    }

    async fn get_secret_value(&self, key_ref: &SecretKeyRef) -> Result<Option<String>, StoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &key_ref.namespace);
        let Some(secret) = api.get_opt(&key_ref.name).await? else {
            return Ok(None);
        };

        let Some(value) = secret.data.as_ref().and_then(|d| d.get(&key_ref.key)) else {
            return Ok(None);
        };

        String::from_utf8(value.0.clone())
            .map(Some)
            .map_err(|_| StoreError::InvalidSecret {
                name: key_ref.name.clone(),
                key: key_ref.key.clone(),
            })
    }

    async fn upsert_secret(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            string_data: Some(data),
            ..Default::default()
        };

        api.patch(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&secret))
            .await?;
        Ok(())
    }

    fn watch_servers(&self) -> BoxStream<'static, Result<String, StoreError>> {
        watcher(self.servers.clone(), watcher::Config::default())
            .applied_objects()
            .map_ok(|server: Server| server.name_any())
            .map_err(|e| StoreError::Watch(e.to_string()))
            .boxed()
    }
}
