//! Environment CRD
//!
//! A bootable kernel + initrd pair with its kernel arguments. Assets are
//! downloaded out of band; readiness is tracked per asset URL in status.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Name of the cluster wide fallback environment.
pub const ENVIRONMENT_DEFAULT: &str = "default";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "metal.dcops.microscaler.io",
    version = "v1alpha1",
    kind = "Environment",
    status = "EnvironmentStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSpec {
    #[serde(default)]
    pub kernel: Kernel,

    #[serde(default)]
    pub initrd: Initrd,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Kernel {
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub sha512: String,

    /// Kernel command line arguments
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Initrd {
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub sha512: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentStatus {
    #[serde(default)]
    pub conditions: Vec<AssetCondition>,
}

/// Download state of one asset.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AssetCondition {
    pub url: String,

    #[serde(default)]
    pub sha512: String,

    pub status: String,

    #[serde(rename = "type")]
    pub type_: String,
}

impl Environment {
    /// True when every referenced asset has a `Ready=True` condition.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        let mut pending: HashSet<&str> = [self.spec.kernel.url.as_str(), self.spec.initrd.url.as_str()]
            .into_iter()
            .filter(|url| !url.is_empty())
            .collect();

        if let Some(status) = &self.status {
            for cond in &status.conditions {
                if cond.status == "True" && cond.type_ == "Ready" {
                    pending.remove(cond.url.as_str());
                }
            }
        }

        pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(kernel: &str, initrd: &str, ready: &[&str]) -> Environment {
        let mut env = Environment::new(
            "test",
            EnvironmentSpec {
                kernel: Kernel {
                    url: kernel.to_string(),
                    ..Default::default()
                },
                initrd: Initrd {
                    url: initrd.to_string(),
                    ..Default::default()
                },
            },
        );
        env.status = Some(EnvironmentStatus {
            conditions: ready
                .iter()
                .map(|url| AssetCondition {
                    url: (*url).to_string(),
                    status: "True".to_string(),
                    type_: "Ready".to_string(),
                    ..Default::default()
                })
                .collect(),
        });
        env
    }

    #[test]
    fn test_ready_when_all_assets_ready() {
        assert!(env("http://k", "http://i", &["http://k", "http://i"]).is_ready());
    }

    #[test]
    fn test_not_ready_with_pending_asset() {
        assert!(!env("http://k", "http://i", &["http://k"]).is_ready());
    }

    #[test]
    fn test_no_assets_is_ready() {
        assert!(env("", "", &[]).is_ready());
    }
}
