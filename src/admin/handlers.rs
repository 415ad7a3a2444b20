//! Admin endpoint handlers.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::gateway::ResilientClient;

pub type AdminState = Arc<ResilientClient>;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub breakers: Vec<String>,
    pub retry_policies: Vec<String>,
    pub pooled_hosts: usize,
    pub pool_closed: bool,
}

#[derive(Debug, Deserialize)]
pub struct ResetQuery {
    /// Reset only this service breaker.
    pub name: Option<String>,
}

#[derive(Serialize)]
pub struct ResetResult {
    pub reset: String,
}

/// 200 while healthy or degraded, 503 when unhealthy.
pub async fn get_health(State(client): State<AdminState>) -> impl IntoResponse {
    let report = client.health_check().await;
    let code = if report.status.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

pub async fn get_metrics(State(client): State<AdminState>) -> impl IntoResponse {
    Json(client.metrics())
}

pub async fn get_status(State(client): State<AdminState>) -> Json<SystemStatus> {
    let metrics = client.metrics();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if metrics.pool.closed { "draining" } else { "operational" },
        uptime_secs: metrics.uptime_secs,
        breakers: client.breakers().names(),
        retry_policies: metrics.retry_policies,
        pooled_hosts: metrics.pool.hosts.len(),
        pool_closed: metrics.pool.closed,
    })
}

pub async fn reset_breakers(
    State(client): State<AdminState>,
    Query(query): Query<ResetQuery>,
) -> impl IntoResponse {
    match query.name {
        Some(name) => {
            if client.breakers().reset(&name) {
                tracing::info!(breaker = %name, "Breaker reset via admin API");
                (StatusCode::OK, Json(ResetResult { reset: name })).into_response()
            } else {
                (StatusCode::NOT_FOUND, format!("no breaker named '{}'", name)).into_response()
            }
        }
        None => {
            client.reset_breakers();
            tracing::info!("All breakers reset via admin API");
            (StatusCode::OK, Json(ResetResult { reset: "all".into() })).into_response()
        }
    }
}
