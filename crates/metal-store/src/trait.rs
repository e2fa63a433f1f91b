//! MetalStore trait
//!
//! Get/list/update/watch over the metal records, with optimistic
//! concurrency: every update carries the resource version it was read at,
//! and a stale version is rejected with [`StoreError::Conflict`].

use crate::error::StoreError;
use crds::{Environment, SecretKeyRef, Server, ServerBinding, ServerClass};
use futures::stream::BoxStream;
use std::collections::BTreeMap;

/// Backing record store for the metal controllers.
#[async_trait::async_trait]
pub trait MetalStore: Send + Sync {
    async fn get_server(&self, name: &str) -> Result<Option<Server>, StoreError>;
    async fn list_servers(&self) -> Result<Vec<Server>, StoreError>;
    async fn create_server(&self, server: &Server) -> Result<Server, StoreError>;

    /// Replaces metadata and spec. Status is left untouched.
    async fn replace_server(&self, server: &Server) -> Result<Server, StoreError>;

    /// Replaces status only.
    async fn replace_server_status(&self, server: &Server) -> Result<Server, StoreError>;

    async fn get_server_binding(&self, name: &str) -> Result<Option<ServerBinding>, StoreError>;

    async fn get_server_class(&self, name: &str) -> Result<Option<ServerClass>, StoreError>;
    async fn list_server_classes(&self) -> Result<Vec<ServerClass>, StoreError>;
    async fn create_server_class(&self, class: &ServerClass) -> Result<ServerClass, StoreError>;
    async fn replace_server_class(&self, class: &ServerClass) -> Result<ServerClass, StoreError>;
    async fn replace_server_class_status(&self, class: &ServerClass) -> Result<ServerClass, StoreError>;

    async fn get_environment(&self, name: &str) -> Result<Option<Environment>, StoreError>;

    /// Value of a single secret key, `None` if the secret or key is missing.
    async fn get_secret_value(&self, key_ref: &SecretKeyRef) -> Result<Option<String>, StoreError>;

    /// Creates or overwrites a secret with the given string data.
    async fn upsert_secret(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<(), StoreError>;

    /// Names of servers as they change.
    fn watch_servers(&self) -> BoxStream<'static, Result<String, StoreError>>;
}
