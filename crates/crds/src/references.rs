//! Object references between metal CRDs
//!
//! Follows the Kubernetes `ObjectReference` shape: a required name plus
//! optional namespace, kind and API group. All metal CRDs are cluster
//! scoped, so most references carry just a name.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to another metal resource.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReference {
    /// Name of the referenced resource
    pub name: String,

    /// Namespace of the referenced resource (empty for cluster scoped kinds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Kind of the referenced resource (e.g. "Environment")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// API group of the referenced resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,
}

impl ResourceReference {
    /// Reference a cluster scoped resource by name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            kind: None,
            api_group: None,
        }
    }

    /// Reference a metal resource of the given kind in this API group.
    pub fn metal(kind: &str, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            kind: Some(kind.to_string()),
            api_group: Some(crate::API_GROUP.to_string()),
        }
    }
}
