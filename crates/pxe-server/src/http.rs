//! HTTP side of network boot.
//!
//! - `GET /boot.ipxe`: the embedded chainload script
//! - `GET /ipxe`: the resolved boot script for one machine
//! - `/env/*` and `/tftp/*`: static environment assets and iPXE binaries

use crate::boot::{BootAction, BootError, BootLabels, BootResolver};
use crate::ipxe::{BOOT_FROM_DISK_EXIT, BOOT_FROM_DISK_SANBOOT};
use axum::{
    Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use crds::BootFromDiskMethod;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct HttpState {
    pub resolver: BootResolver,
    pub embedded_script: Arc<str>,
}

/// Static directories served next to the boot endpoints.
#[derive(Debug, Clone)]
pub struct StaticRoots {
    pub env_root: PathBuf,
    pub tftp_root: PathBuf,
}

pub fn router(state: HttpState, roots: &StaticRoots) -> Router {
    Router::new()
        .route("/boot.ipxe", get(boot_file))
        .route("/ipxe", get(ipxe))
        .nest_service("/env", ServeDir::new(&roots.env_root))
        .nest_service("/tftp", ServeDir::new(&roots.tftp_root))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn script(body: impl Into<String>) -> Response {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body.into()).into_response()
}

async fn boot_file(State(state): State<HttpState>) -> Response {
    script(state.embedded_script.as_ref())
}

async fn ipxe(State(state): State<HttpState>, Query(query): Query<Vec<(String, String)>>) -> Response {
    let labels = BootLabels::from_query(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    match state.resolver.resolve(&labels).await {
        Ok(BootAction::Environment { script: body, .. }) => script(body),
        Ok(BootAction::BootFromDisk(method)) => boot_from_disk(method),
        Err(e) => boot_error(labels.uuid(), &e),
    }
}

fn boot_from_disk(method: BootFromDiskMethod) -> Response {
    match method {
        BootFromDiskMethod::Http404 => StatusCode::NOT_FOUND.into_response(),
        BootFromDiskMethod::IpxeSanboot => script(BOOT_FROM_DISK_SANBOOT),
        BootFromDiskMethod::IpxeExit => script(BOOT_FROM_DISK_EXIT),
    }
}

fn boot_error(uuid: &str, err: &BootError) -> Response {
    match err {
        BootError::EnvironmentNotFound(_) | BootError::ServerClassNotFound(_) => {
            info!(%uuid, error = %err, "boot resource not found");
            StatusCode::NOT_FOUND.into_response()
        }
        BootError::EnvironmentNotReady(name) => {
            warn!(%uuid, env = %name, "environment not ready");
            (
                StatusCode::PRECONDITION_FAILED,
                format!("environment {name:?} is not ready"),
            )
                .into_response()
        }
        BootError::Store(e) => {
            error!(%uuid, error = %e, "error looking up server");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
