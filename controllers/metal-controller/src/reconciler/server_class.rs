//! ServerClass reconciliation.
//!
//! Recomputes which accepted, uncordoned servers match a class and splits
//! them into available and in-use lists. Runs for every class whenever any
//! server changes.

use super::Reconciler;
use crate::error::ControllerError;
use crds::{
    accepted_server_filter, filter_servers, not_cordoned_server_filter, CrdError, Qualifiers, Server, ServerClass,
    ServerClassSpec, ServerClassStatus, ServerFilter, SERVER_CLASS_ANY,
};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use metal_store::StoreError;
use tracing::{debug, info};

/// Splits matching servers by allocation. Input order is kept.
#[must_use]
pub fn membership(servers: &[Server]) -> ServerClassStatus {
    let (in_use, available): (Vec<&Server>, Vec<&Server>) =
        servers.iter().partition(|s| s.status_or_default().in_use);

    ServerClassStatus {
        servers_available: available.into_iter().map(ResourceExt::name_any).collect(),
        servers_in_use: in_use.into_iter().map(ResourceExt::name_any).collect(),
    }
}

impl Reconciler {
    /// Makes sure the built-in `any` class exists and qualifies every server.
    pub async fn ensure_any_class(&self) -> Result<(), ControllerError> {
        match self.store.get_server_class(SERVER_CLASS_ANY).await? {
            None => {
                let class = ServerClass::new(SERVER_CLASS_ANY, ServerClassSpec::default());
                match self.store.create_server_class(&class).await {
                    Ok(_) => info!("created server class {SERVER_CLASS_ANY:?}"),
                    Err(StoreError::AlreadyExists { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Some(mut class) if class.spec.qualifiers != Qualifiers::default() => {
                info!("resetting qualifiers of server class {SERVER_CLASS_ANY:?}");
                class.spec.qualifiers = Qualifiers::default();
                self.store.replace_server_class(&class).await?;
            }
            Some(_) => {}
        }
        Ok(())
    }

    pub async fn reconcile_server_class(&self, name: &str) -> Result<Action, ControllerError> {
        if name == SERVER_CLASS_ANY {
            self.ensure_any_class().await?;
        }

        let Some(mut class) = self.store.get_server_class(name).await? else {
            debug!(server_class = name, "server class is gone");
            return Ok(Action::await_change());
        };

        let servers = self.store.list_servers().await?;
        let selector = |s: &Server| class.selector_matches(s);
        let qualifiers = |s: &Server| -> Result<bool, CrdError> { Ok(class.qualifiers_match(s)) };
        let filters: [ServerFilter<'_>; 4] =
            [&accepted_server_filter, &not_cordoned_server_filter, &selector, &qualifiers];
        let matches = filter_servers(&servers, &filters)?;

        let status = membership(&matches);
        if class.status.as_ref() == Some(&status) {
            return Ok(Action::await_change());
        }

        debug!(
            server_class = name,
            available = status.servers_available.len(),
            in_use = status.servers_in_use.len(),
            "updating server class status"
        );
        class.status = Some(status);
        self.store.replace_server_class_status(&class).await?;

        Ok(Action::await_change())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::mock::MockEventRecorder;
    use crate::reconciler::test_support;
    use crds::{LabelSelector, ServerSpec, ServerStatus};
    use metal_store::{MemoryStore, MetalStore};
    use power_client::{MockPowerClient, MockPowerClientFactory};
    use std::collections::BTreeMap;

    fn reconciler(store: &MemoryStore) -> Reconciler {
        test_support::reconciler(
            store,
            &MockPowerClientFactory::new(MockPowerClient::new()),
            &MockEventRecorder::new(),
        )
    }

    fn server(name: &str, accepted: bool, cordoned: bool, in_use: bool, labels: &[(&str, &str)]) -> Server {
        let mut server = Server::new(
            name,
            ServerSpec {
                accepted,
                cordoned,
                ..ServerSpec::default()
            },
        );
        server.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        );
        server.status = Some(ServerStatus {
            in_use,
            ..ServerStatus::default()
        });
        server
    }

    fn seed(store: &MemoryStore) {
        store.insert_server(server("c", true, false, false, &[("rack", "r1")]));
        store.insert_server(server("a", true, false, true, &[("rack", "r1")]));
        store.insert_server(server("b", true, false, false, &[("rack", "r2")]));
        store.insert_server(server("d", false, false, false, &[("rack", "r1")]));
        store.insert_server(server("e", true, true, false, &[("rack", "r1")]));
    }

    #[tokio::test]
    async fn test_any_class_is_created_and_counts_every_eligible_server() {
        let store = MemoryStore::new();
        seed(&store);
        let r = reconciler(&store);

        r.reconcile_server_class(SERVER_CLASS_ANY).await.unwrap();

        let class = store.get_server_class(SERVER_CLASS_ANY).await.unwrap().unwrap();
        let status = class.status.unwrap();
        assert_eq!(status.servers_available, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(status.servers_in_use, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_any_class_qualifiers_are_reset() {
        let store = MemoryStore::new();
        store.insert_server_class(ServerClass::new(
            SERVER_CLASS_ANY,
            ServerClassSpec {
                qualifiers: Qualifiers {
                    label_selectors: vec![BTreeMap::from([("rack".to_string(), "r9".to_string())])],
                    ..Qualifiers::default()
                },
                ..ServerClassSpec::default()
            },
        ));
        let r = reconciler(&store);

        r.ensure_any_class().await.unwrap();

        let class = store.get_server_class(SERVER_CLASS_ANY).await.unwrap().unwrap();
        assert_eq!(class.spec.qualifiers, Qualifiers::default());
    }

    #[tokio::test]
    async fn test_selector_and_qualifiers_narrow_membership() {
        let store = MemoryStore::new();
        seed(&store);
        store.insert_server(server("f", true, false, false, &[("rack", "r1"), ("tier", "gold")]));
        store.insert_server_class(ServerClass::new(
            "rack1-gold",
            ServerClassSpec {
                selector: LabelSelector {
                    match_labels: BTreeMap::from([("rack".to_string(), "r1".to_string())]),
                    ..LabelSelector::default()
                },
                qualifiers: Qualifiers {
                    label_selectors: vec![BTreeMap::from([("tier".to_string(), "gold".to_string())])],
                    ..Qualifiers::default()
                },
                ..ServerClassSpec::default()
            },
        ));
        let r = reconciler(&store);

        r.reconcile_server_class("rack1-gold").await.unwrap();

        let status = store.get_server_class("rack1-gold").await.unwrap().unwrap().status.unwrap();
        assert_eq!(status.servers_available, vec!["f".to_string()]);
        assert!(status.servers_in_use.is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_membership_is_not_rewritten() {
        let store = MemoryStore::new();
        seed(&store);
        store.insert_server_class(ServerClass::new("all", ServerClassSpec::default()));
        let r = reconciler(&store);

        r.reconcile_server_class("all").await.unwrap();
        let first = store.get_server_class("all").await.unwrap().unwrap();
        r.reconcile_server_class("all").await.unwrap();
        let second = store.get_server_class("all").await.unwrap().unwrap();

        assert_eq!(first.resource_version(), second.resource_version());
    }

    #[tokio::test]
    async fn test_missing_class_is_ignored() {
        let store = MemoryStore::new();
        let r = reconciler(&store);
        assert_eq!(r.reconcile_server_class("gone").await.unwrap(), Action::await_change());
    }
}
