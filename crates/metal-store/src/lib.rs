//! Metal Resource Store
//!
//! Abstracts the record store behind the metal controllers as a
//! get/list/update/watch interface with optimistic concurrency.
//! [`KubeStore`] talks to the Kubernetes API; with the `test-util` feature
//! [`MemoryStore`] provides an in-process double.

pub mod error;
pub mod kube_store;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
#[path = "trait.rs"]
pub mod store_trait;
pub mod update;

pub use kube_store::KubeStore;
pub use error::StoreError;
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryStore;
pub use store_trait::MetalStore;
pub use update::{update_server, update_server_status};
