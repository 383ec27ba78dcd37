// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! One-time credential relay endpoints.
//!
//! `POST /relay` parks an opaque auth payload under a correlation id;
//! `GET /relay` hands it out once. Misses for absent, consumed and expired ids
//! all return `{ "found": false }`.

use axum::{
    extract::{Query, State},
    http::header::{HeaderValue, CACHE_CONTROL},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    error::ApiError,
    models::{RelayRetrieveResponse, RelayStoreRequest, RelayStoreResponse},
    relay::RelayError,
    state::AppState,
};

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query, rename_all = "camelCase")]
pub struct RelayQuery {
    pub session_id: Option<String>,
}

pub(super) fn relay_error(err: RelayError) -> ApiError {
    match err {
        RelayError::InvalidInput(msg) => ApiError::bad_request(msg),
        RelayError::Backend(detail) => ApiError::internal(detail),
    }
}

#[utoipa::path(
    post,
    path = "/relay",
    request_body = RelayStoreRequest,
    tag = "Relay",
    responses(
        (status = 200, description = "Payload stored", body = RelayStoreResponse),
        (status = 400, description = "sessionId or authData missing"),
        (status = 429, description = "Too many requests"),
        (status = 500, description = "Relay store failure")
    )
)]
pub async fn store_relay(
    State(state): State<AppState>,
    Json(request): Json<RelayStoreRequest>,
) -> Result<Json<RelayStoreResponse>, ApiError> {
    let session_id = request
        .session_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("sessionId and authData are required"))?;
    let auth_data = request
        .auth_data
        .filter(|data| !data.is_null())
        .ok_or_else(|| ApiError::bad_request("sessionId and authData are required"))?;

    state
        .relay
        .put(&session_id, auth_data, state.config.relay_ttl)
        .await
        .map_err(relay_error)?;

    Ok(Json(RelayStoreResponse { success: true }))
}

#[utoipa::path(
    get,
    path = "/relay",
    params(RelayQuery),
    tag = "Relay",
    responses(
        (status = 200, description = "Lookup result; the payload is deleted when found", body = RelayRetrieveResponse),
        (status = 400, description = "sessionId missing"),
        (status = 429, description = "Too many requests")
    )
)]
pub async fn retrieve_relay(
    State(state): State<AppState>,
    Query(query): Query<RelayQuery>,
) -> Result<Response, ApiError> {
    let session_id = query
        .session_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("sessionId is required"))?;

    let body = match state.relay.get(&session_id).await.map_err(relay_error)? {
        Some(auth_data) => RelayRetrieveResponse::found(auth_data),
        None => RelayRetrieveResponse::not_found(),
    };

    let mut response = Json(body).into_response();
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}
