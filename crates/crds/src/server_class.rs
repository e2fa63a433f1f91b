//! ServerClass CRD
//!
//! A named pool of servers selected by labels and hardware qualifiers.
//! The server class controller keeps the status lists of available and
//! in-use members up to date.

use crate::config_patch::ConfigPatch;
use crate::error::CrdError;
use crate::hardware::{HardwareInformation, PartialMatch};
use crate::references::ResourceReference;
use crate::server::{BootFromDiskMethod, Server};
use kube::CustomResource;
use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Built-in class matching every accepted, uncordoned server.
pub const SERVER_CLASS_ANY: &str = "any";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "metal.dcops.microscaler.io",
    version = "v1alpha1",
    kind = "ServerClass",
    status = "ServerClassStatus",
    printcolumn = r#"{"name":"Available","type":"string","jsonPath":".status.serversAvailable"}"#,
    printcolumn = r#"{"name":"In use","type":"string","jsonPath":".status.serversInUse"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ServerClassSpec {
    /// Environment booted by members of this class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_ref: Option<ResourceReference>,

    #[serde(default)]
    pub qualifiers: Qualifiers,

    /// Label selector servers must satisfy
    #[serde(default)]
    pub selector: LabelSelector,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_patches: Vec<ConfigPatch>,

    /// Boot-from-disk method for members without their own override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_from_disk_method: Option<BootFromDiskMethod>,
}

/// Hardware and label qualifiers; each list is OR'ed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Qualifiers {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hardware: Vec<HardwareInformation>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label_selectors: Vec<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerClassStatus {
    #[serde(default)]
    pub servers_available: Vec<String>,

    #[serde(default)]
    pub servers_in_use: Vec<String>,
}

/// Kubernetes style label selector.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirement {
    pub key: String,

    /// One of `In`, `NotIn`, `Exists`, `DoesNotExist`
    pub operator: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl LabelSelector {
    /// Evaluates the selector against a label set. An empty selector matches everything.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> Result<bool, CrdError> {
        for (key, value) in &self.match_labels {
            if labels.get(key) != Some(value) {
                return Ok(false);
            }
        }

        for req in &self.match_expressions {
            let current = labels.get(&req.key);
            let ok = match req.operator.as_str() {
                "In" => {
                    if req.values.is_empty() {
                        return Err(CrdError::InvalidSelector(format!("{}: In requires values", req.key)));
                    }
                    current.is_some_and(|v| req.values.contains(v))
                }
                "NotIn" => {
                    if req.values.is_empty() {
                        return Err(CrdError::InvalidSelector(format!("{}: NotIn requires values", req.key)));
                    }
                    current.is_none_or(|v| !req.values.contains(v))
                }
                "Exists" => current.is_some(),
                "DoesNotExist" => current.is_none(),
                op => return Err(CrdError::InvalidSelector(format!("unknown operator {op:?}"))),
            };
            if !ok {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

/// Filter applied to servers when computing class membership.
pub type ServerFilter<'a> = &'a (dyn Fn(&Server) -> Result<bool, CrdError> + Sync);

/// Matches servers that were accepted by an operator.
pub fn accepted_server_filter(server: &Server) -> Result<bool, CrdError> {
    Ok(server.spec.accepted)
}

/// Matches servers that are not cordoned.
pub fn not_cordoned_server_filter(server: &Server) -> Result<bool, CrdError> {
    Ok(!server.spec.cordoned)
}

impl ServerClass {
    /// Whether the server's labels satisfy the class selector.
    pub fn selector_matches(&self, server: &Server) -> Result<bool, CrdError> {
        self.spec.selector.matches(server.labels())
    }

    /// Whether the server satisfies the class qualifiers.
    ///
    /// Hardware qualifiers match if any one of them partially matches the
    /// server inventory. Label qualifiers match if any key/value pair of any
    /// map is present on the server.
    #[must_use]
    pub fn qualifiers_match(&self, server: &Server) -> bool {
        let q = &self.spec.qualifiers;

        if !q.hardware.is_empty() {
            let Some(info) = server.spec.hardware.as_ref() else {
                return false;
            };
            if !q.hardware.iter().any(|filter| filter.partial_match(info)) {
                return false;
            }
        }

        if !q.label_selectors.is_empty() {
            let labels = server.labels();
            let any = q
                .label_selectors
                .iter()
                .flat_map(|selector| selector.iter())
                .any(|(key, value)| labels.get(key) == Some(value));
            if !any {
                return false;
            }
        }

        true
    }
}

/// Returns the servers passing every filter, sorted by name.
pub fn filter_servers(servers: &[Server], filters: &[ServerFilter<'_>]) -> Result<Vec<Server>, CrdError> {
    let mut matches = Vec::with_capacity(servers.len());

    'servers: for server in servers {
        for filter in filters {
            if !filter(server)? {
                continue 'servers;
            }
        }
        matches.push(server.clone());
    }

    matches.sort_by_key(ResourceExt::name_any);
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{ComputeInformation, SystemInformation};
    use crate::server::ServerSpec;

    fn server(name: &str, labels: &[(&str, &str)], accepted: bool, cordoned: bool) -> Server {
        let mut s = Server::new(
            name,
            ServerSpec {
                accepted,
                cordoned,
                hardware: Some(HardwareInformation {
                    system: Some(SystemInformation {
                        manufacturer: "Dell".to_string(),
                        ..Default::default()
                    }),
                    compute: Some(ComputeInformation {
                        total_core_count: 32,
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        s.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        );
        s
    }

    fn class(spec: ServerClassSpec) -> ServerClass {
        ServerClass::new("test", spec)
    }

    #[test]
    fn test_filter_servers_sorted_and_filtered() {
        let servers = vec![
            server("c", &[], true, false),
            server("a", &[], true, false),
            server("b", &[], false, false),
            server("d", &[], true, true),
        ];
        let result = filter_servers(&servers, &[&accepted_server_filter, &not_cordoned_server_filter]).unwrap();
        let names: Vec<_> = result.iter().map(ResourceExt::name_any).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_hardware_qualifiers_are_ored() {
        let sc = class(ServerClassSpec {
            qualifiers: Qualifiers {
                hardware: vec![
                    HardwareInformation {
                        system: Some(SystemInformation {
                            manufacturer: "HPE".to_string(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    HardwareInformation {
                        compute: Some(ComputeInformation {
                            total_core_count: 32,
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            },
            ..Default::default()
        });
        assert!(sc.qualifiers_match(&server("a", &[], true, false)));
    }

    #[test]
    fn test_hardware_qualifier_requires_inventory() {
        let sc = class(ServerClassSpec {
            qualifiers: Qualifiers {
                hardware: vec![HardwareInformation {
                    system: Some(SystemInformation {
                        manufacturer: "Dell".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        });
        let mut bare = server("a", &[], true, false);
        bare.spec.hardware = None;
        assert!(!sc.qualifiers_match(&bare));
    }

    #[test]
    fn test_label_qualifiers_match_any_pair() {
        let sc = class(ServerClassSpec {
            qualifiers: Qualifiers {
                label_selectors: vec![BTreeMap::from([
                    ("rack".to_string(), "r1".to_string()),
                    ("zone".to_string(), "z9".to_string()),
                ])],
                ..Default::default()
            },
            ..Default::default()
        });
        assert!(sc.qualifiers_match(&server("a", &[("rack", "r1")], true, false)));
        assert!(!sc.qualifiers_match(&server("a", &[("rack", "r2")], true, false)));
    }

    #[test]
    fn test_selector_expressions() {
        let selector = LabelSelector {
            match_labels: BTreeMap::from([("role".to_string(), "worker".to_string())]),
            match_expressions: vec![
                LabelSelectorRequirement {
                    key: "zone".to_string(),
                    operator: "In".to_string(),
                    values: vec!["a".to_string(), "b".to_string()],
                },
                LabelSelectorRequirement {
                    key: "broken".to_string(),
                    operator: "DoesNotExist".to_string(),
                    values: vec![],
                },
            ],
        };
        let labels = BTreeMap::from([
            ("role".to_string(), "worker".to_string()),
            ("zone".to_string(), "b".to_string()),
        ]);
        assert!(selector.matches(&labels).unwrap());

        let mut broken = labels.clone();
        broken.insert("broken".to_string(), "yes".to_string());
        assert!(!selector.matches(&broken).unwrap());

        let bad = LabelSelector {
            match_expressions: vec![LabelSelectorRequirement {
                key: "x".to_string(),
                operator: "Near".to_string(),
                values: vec![],
            }],
            ..Default::default()
        };
        assert!(bad.matches(&labels).is_err());
    }

    #[test]
    fn test_empty_class_matches_everything() {
        let sc = class(ServerClassSpec::default());
        let s = server("a", &[], true, false);
        assert!(sc.selector_matches(&s).unwrap());
        assert!(sc.qualifiers_match(&s));
    }
}
