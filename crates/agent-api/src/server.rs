//! axum routes serving an [`AgentApi`] implementation.

use crate::agent_trait::AgentApi;
use crate::error::AgentApiError;
use crate::types::{
    paths, Ack, BmcInfoRequest, HeartbeatRequest, RegisterRequest, RegisterResponse, ReportAddressesRequest,
    WipeCompleteRequest,
};
use axum::extract::State;
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use std::sync::Arc;

type Service = Arc<dyn AgentApi>;

/// Router exposing every RPC under `/agent/v1`.
pub fn router(service: Service) -> Router {
    Router::new()
        .route(paths::REGISTER, post(register))
        .route(paths::REPORT_ADDRESSES, post(report_addresses))
        .route(paths::HEARTBEAT, post(heartbeat))
        .route(paths::REPORT_WIPE_COMPLETE, post(report_wipe_complete))
        .route(paths::REPORT_BMC_INFO, post(report_bmc_info))
        .with_state(service)
}

async fn register(
    State(service): State<Service>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AgentApiError> {
    if req.uuid().is_empty() {
        return Err(AgentApiError::InvalidRequest("hardware.system.uuid is required".to_string()));
    }
    service.register(req).await.map(Json)
}

async fn report_addresses(
    State(service): State<Service>,
    Json(req): Json<ReportAddressesRequest>,
) -> Result<Json<Ack>, AgentApiError> {
    service.report_addresses(req).await.map(|()| Json(Ack {}))
}

async fn heartbeat(
    State(service): State<Service>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<Ack>, AgentApiError> {
    service.heartbeat(req).await.map(|()| Json(Ack {}))
}

async fn report_wipe_complete(
    State(service): State<Service>,
    Json(req): Json<WipeCompleteRequest>,
) -> Result<Json<Ack>, AgentApiError> {
    service.report_wipe_complete(req).await.map(|()| Json(Ack {}))
}

async fn report_bmc_info(
    State(service): State<Service>,
    Json(req): Json<BmcInfoRequest>,
) -> Result<Json<Ack>, AgentApiError> {
    service.report_bmc_info(req).await.map(|()| Json(Ack {}))
}
