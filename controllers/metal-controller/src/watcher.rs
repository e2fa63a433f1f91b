//! Kubernetes resource watchers.
//!
//! Both watchers go through the generic `watch_resource()` helper, which
//! drives a `kube_runtime::Controller` with debouncing, bounded concurrency
//! and per-resource Fibonacci backoff on errors.
//!
//! - Servers are reconciled when the Server or its same-named
//!   ServerBinding changes.
//! - Every ServerClass is reconciled when any Server changes.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::{Server, ServerBinding, ServerClass};
use futures::StreamExt;
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Runs `controller` until its watch streams end.
///
/// `reconcile_fn` receives the name of the changed resource. A successful
/// reconcile resets the resource's error backoff; a failed one requeues it
/// after the next Fibonacci delay.
async fn watch_resource<K, F, Fut>(
    controller: Controller<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    kind: &'static str,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, String) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Result<Action, ControllerError>> + Send + 'static,
{
    info!("Starting {} watcher", kind);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = format!("{kind}/{}", obj.name_any());
        let (delay, errors) = ctx.next_backoff(&key);
        warn!(resource = %key, errors, retry_in = ?delay, error = %error, "reconcile failed");
        Action::requeue(delay)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let name = obj.name_any();
            debug!("Reconciling {} {}", kind, name);

            let action = reconcile_fn(ctx.clone(), name.clone()).await?;
            ctx.reset_error(&format!("{kind}/{name}"));
            Ok(action)
        }
    };

    // Debounce batches bursts of status updates into one reconcile
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(5))
        .concurrency(3);

    controller
        .with_config(controller_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled {} {}", kind, obj.name),
                Err(kube_runtime::controller::Error::ReconcilerFailed(..)) => {}
                Err(e) => error!("Controller error for {}: {}", kind, e),
            }
        })
        .await;

    info!("{} watcher stopped", kind);
    Ok(())
}

/// Watches the metal resources for changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    client: Client,
}

impl Watcher {
    pub fn new(reconciler: Arc<Reconciler>, client: Client) -> Self {
        Self { reconciler, client }
    }

    /// Watches Servers and their ServerBindings.
    pub async fn watch_servers(&self) -> Result<(), ControllerError> {
        let servers: Api<Server> = Api::all(self.client.clone());
        let bindings: Api<ServerBinding> = Api::all(self.client.clone());

        // servers and bindings share names
        let controller = Controller::new(servers, watcher::Config::default()).watches(
            bindings,
            watcher::Config::default(),
            |binding: ServerBinding| Some(ObjectRef::<Server>::new(&binding.name_any())),
        );

        watch_resource(
            controller,
            self.reconciler.clone(),
            |reconciler, name| async move { reconciler.reconcile_server(&name).await },
            "Server",
        )
        .await
    }

    /// Watches ServerClasses, re-evaluating all of them on any Server change.
    pub async fn watch_server_classes(&self) -> Result<(), ControllerError> {
        let classes: Api<ServerClass> = Api::all(self.client.clone());
        let servers: Api<Server> = Api::all(self.client.clone());

        let controller = Controller::new(classes, watcher::Config::default());
        let known = controller.store();
        let controller = controller.watches(servers, watcher::Config::default(), move |_: Server| {
            known
                .state()
                .into_iter()
                .map(|class| ObjectRef::from_obj(&*class))
                .collect::<Vec<_>>()
        });

        watch_resource(
            controller,
            self.reconciler.clone(),
            |reconciler, name| async move { reconciler.reconcile_server_class(&name).await },
            "ServerClass",
        )
        .await
    }
}
