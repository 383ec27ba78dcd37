// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::State,
    http::header::{HeaderValue, CACHE_CONTROL, SET_COOKIE},
    response::{IntoResponse, Response},
    Json,
};

use crate::{error::ApiError, models::CsrfTokenResponse, state::AppState};

/// Issue a double-submit CSRF token.
///
/// The same value is set as an `HttpOnly` cookie; clients echo the body value
/// in the `x-csrf-token` header on mutating requests.
#[utoipa::path(
    get,
    path = "/csrf-token",
    tag = "Security",
    responses(
        (status = 200, description = "Token issued and cookie set", body = CsrfTokenResponse),
        (status = 500, description = "Token could not be generated")
    )
)]
pub async fn issue_csrf_token(State(state): State<AppState>) -> Result<Response, ApiError> {
    let issued = state.csrf.issue().map_err(ApiError::internal)?;

    let mut response = Json(CsrfTokenResponse {
        token: issued.token,
    })
    .into_response();
    let headers = response.headers_mut();
    headers.insert(SET_COOKIE, issued.set_cookie);
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}
