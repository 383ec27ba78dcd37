// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use utoipa::ToSchema;

use crate::state::AppState;

/// Health check response with individual component status.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Overall health status ("ok" or "degraded").
    pub status: String,
    /// Individual health checks and their results.
    pub checks: HealthChecks,
}

/// Individual health check results.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthChecks {
    /// Whether the service process is running.
    pub service: String,
    /// Relay store round trip.
    pub relay: String,
    /// Identity provider keys. Absent when signature checks are disabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
}

/// Simple health check response for liveness probes.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

const PROBE_TTL: Duration = Duration::from_secs(5);

/// Write and take a throwaway relay entry.
async fn check_relay(state: &AppState) -> String {
    let key = format!("health:{}", uuid::Uuid::new_v4());
    let result = match state.relay.put(&key, json!({ "probe": true }), PROBE_TTL).await {
        Ok(()) => state.relay.get(&key).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(Some(_)) => "ok".to_string(),
        Ok(None) => "unavailable".to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Relay health probe failed");
            "unavailable".to_string()
        }
    }
}

async fn check_identity(state: &AppState) -> Option<String> {
    state
        .identity
        .readiness()
        .await
        .map(|ready| if ready { "ok" } else { "unavailable" }.to_string())
}

/// Health check endpoint handler.
///
/// Returns 200 if all checks pass, 503 if any check fails.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = ReadyResponse),
        (status = 503, description = "Service is unhealthy", body = ReadyResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let relay = check_relay(&state).await;
    let identity = check_identity(&state).await;

    let all_ok = relay == "ok" && identity.as_deref().map_or(true, |s| s == "ok");

    let response = ReadyResponse {
        status: if all_ok { "ok" } else { "degraded" }.to_string(),
        checks: HealthChecks {
            service: "ok".to_string(),
            relay,
            identity,
        },
    };

    let status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}

/// Liveness probe handler.
///
/// Always returns 200 if the process is running.
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
