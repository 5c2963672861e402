use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::broker::ConnectionBroker;
use crate::error::FabricError;
use crate::health::{
    HealthAggregator, HealthCheckResult, HealthSnapshot, ServiceDescriptor, ServiceRegistration,
    ServiceRegistry, ServiceUpdate,
};
use crate::http::error::ApiError;
use crate::net::ClientSummary;

/// Shared handles for the API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<ServiceRegistry>,
    pub broker: Arc<ConnectionBroker>,
    pub aggregator: Arc<HealthAggregator>,
}

#[derive(Debug, Serialize)]
pub struct BrokerHealth {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub clients: usize,
    pub services: usize,
}

pub async fn get_health(State(state): State<ApiState>) -> Json<BrokerHealth> {
    Json(BrokerHealth {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.broker.uptime().as_secs(),
        clients: state.broker.client_count(),
        services: state.registry.len(),
    })
}

/// Probe every service now.
pub async fn get_services_health(State(state): State<ApiState>) -> Json<HealthSnapshot> {
    let snapshot = state.aggregator.snapshot_now().await;
    Json(snapshot.as_ref().clone())
}

pub async fn list_services(State(state): State<ApiState>) -> Json<Vec<ServiceDescriptor>> {
    Json(state.registry.list_services())
}

pub async fn register_service(
    State(state): State<ApiState>,
    Json(registration): Json<ServiceRegistration>,
) -> Result<(StatusCode, Json<ServiceDescriptor>), ApiError> {
    if registration.id.trim().is_empty() {
        return Err(FabricError::Parse("service id must not be empty".to_string()).into());
    }
    let descriptor = state.registry.register_service(registration);
    Ok((StatusCode::CREATED, Json(descriptor)))
}

pub async fn get_service(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<ServiceDescriptor>, ApiError> {
    state
        .registry
        .get_service(&id)
        .map(Json)
        .ok_or_else(|| FabricError::NotFound(format!("service {id}")).into())
}

pub async fn update_service(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(update): Json<ServiceUpdate>,
) -> Result<Json<ServiceDescriptor>, ApiError> {
    Ok(Json(state.registry.update_service(&id, update)?))
}

pub async fn deregister_service(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.registry.deregister_service(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(FabricError::NotFound(format!("service {id}")).into())
    }
}

pub async fn check_service(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<HealthCheckResult>, ApiError> {
    Ok(Json(state.registry.check_service_health(&id).await?))
}

pub async fn list_clients(State(state): State<ApiState>) -> Json<Vec<ClientSummary>> {
    Json(state.broker.clients())
}
