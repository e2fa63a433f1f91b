//! ServerBinding CRD
//!
//! Created by the allocation layer when a server is handed to a workload.
//! Named after the bound server, so its presence alone means "allocated".

use crate::references::ResourceReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "metal.dcops.microscaler.io",
    version = "v1alpha1",
    kind = "ServerBinding",
    status = "ServerBindingStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ServerBindingSpec {
    /// Server class the server was picked from, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_class_ref: Option<ResourceReference>,

    /// Hostname assigned by the allocation layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Addresses assigned to the bound machine
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerBindingStatus {
    #[serde(default)]
    pub ready: bool,
}
