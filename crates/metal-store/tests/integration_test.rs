//! Integration tests for the Kubernetes backed store
//!
//! These tests require a cluster with the metal CRDs installed
//! (`cargo run --bin crdgen | kubectl apply -f -`) and a kubeconfig.

use crds::{Server, ServerSpec, ServerStatus};
use kube::{Client, ResourceExt};
use metal_store::{KubeStore, MetalStore, update_server_status};

async fn store() -> KubeStore {
    let client = Client::try_default().await.expect("Failed to create Kubernetes client");
    KubeStore::new(client)
}

fn test_name(suffix: &str) -> String {
    format!("metal-store-it-{suffix}")
}

#[tokio::test]
#[ignore] // Requires a cluster
async fn test_server_round_trip() {
    let store = store().await;
    let name = test_name("round-trip");

    if store.get_server(&name).await.expect("Failed to get server").is_none() {
        store
            .create_server(&Server::new(&name, ServerSpec::default()))
            .await
            .expect("Failed to create server");
    }

    let updated = update_server_status(&store, &name, |server| {
        server.status = Some(ServerStatus {
            is_clean: true,
            ..ServerStatus::default()
        });
        true
    })
    .await
    .expect("Failed to update status")
    .expect("Server disappeared");

    assert!(updated.status_or_default().is_clean);
    println!("server {} at version {:?}", updated.name_any(), updated.resource_version());
}

#[tokio::test]
#[ignore]
async fn test_stale_write_conflicts() {
    let store = store().await;
    let name = test_name("conflict");

    let server = match store.get_server(&name).await.expect("Failed to get server") {
        Some(server) => server,
        None => store
            .create_server(&Server::new(&name, ServerSpec::default()))
            .await
            .expect("Failed to create server"),
    };

    let mut first = server.clone();
    first.spec.cordoned = !first.spec.cordoned;
    store.replace_server(&first).await.expect("Failed to replace server");

    let mut stale = server;
    stale.spec.accepted = !stale.spec.accepted;
    let err = store.replace_server(&stale).await.expect_err("Stale write must fail");
    assert!(err.is_conflict());
}

#[tokio::test]
#[ignore]
async fn test_list_server_classes() {
    let classes = store().await.list_server_classes().await.expect("Failed to list server classes");
    println!("Found {} server classes", classes.len());
}
