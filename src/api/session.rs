// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session endpoints backed by the identity provider.
//!
//! `/auth/callback` is where the provider sends the browser after login. The
//! exchanged session is written to the session cookie and, when the caller
//! supplied a `state` correlation id, parked in the relay so an embedded
//! frame that never sees the cookie can collect it once.

use axum::{
    extract::{Query, State},
    http::{
        header::{HeaderValue, CACHE_CONTROL, LOCATION, SET_COOKIE},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::info;
use utoipa::IntoParams;

use crate::{
    auth::{extractor::request_token, redirect::safe_redirect, OptionalAuth, SESSION_COOKIE_NAME},
    error::ApiError,
    models::{AuthPayload, SessionResponse, UserProfile, VerifyTokenRequest},
    security::CsrfProtected,
    state::AppState,
};

pub const CALLBACK_PATH: &str = "/auth/callback";

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackQuery {
    /// Authorization code from the identity provider.
    pub code: Option<String>,
    /// Relay correlation id chosen by the embedded frame.
    pub state: Option<String>,
    /// Same-origin path to continue to after login.
    pub redirect: Option<String>,
}

fn session_cookie(token: &str, max_age: i64, secure: bool) -> Result<HeaderValue, ApiError> {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        max_age.max(0)
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).map_err(|_| ApiError::internal("session token is not a valid cookie value"))
}

#[utoipa::path(
    get,
    path = "/auth/session",
    tag = "Session",
    responses(
        (status = 200, description = "Current session", body = SessionResponse),
        (status = 401, description = "No valid session"),
        (status = 502, description = "Identity provider unavailable")
    )
)]
pub async fn current_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let token = request_token(&headers)?.ok_or_else(|| ApiError::unauthorized("No session"))?;
    let session = state
        .identity
        .get_session(&token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("No session"))?;

    let mut response = Json(SessionResponse {
        user: session.user,
        expires_at: session.credential.expires_at,
    })
    .into_response();
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}

#[utoipa::path(
    post,
    path = "/auth/verify",
    request_body = VerifyTokenRequest,
    tag = "Session",
    responses(
        (status = 200, description = "Token is valid", body = UserProfile),
        (status = 400, description = "token missing"),
        (status = 401, description = "Token invalid or expired"),
        (status = 429, description = "Too many requests")
    )
)]
pub async fn verify_token(
    State(state): State<AppState>,
    Json(request): Json<VerifyTokenRequest>,
) -> Result<Json<UserProfile>, ApiError> {
    let token = request
        .token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("token is required"))?;

    let user = state.identity.verify_token(token.trim()).await?;
    Ok(Json(UserProfile {
        user_id: user.user_id,
        email: user.email,
        display_name: user.display_name,
        tenant_id: user.tenant_id,
    }))
}

#[utoipa::path(
    get,
    path = "/auth/callback",
    params(CallbackQuery),
    tag = "Session",
    responses(
        (status = 303, description = "Session established; redirects to a same-origin path"),
        (status = 400, description = "code missing"),
        (status = 401, description = "Authorization code rejected"),
        (status = 429, description = "Too many requests"),
        (status = 500, description = "Session could not be relayed to the embedded frame"),
        (status = 502, description = "Identity provider unavailable")
    )
)]
pub async fn auth_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, ApiError> {
    let code = query
        .code
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("code is required"))?;

    let redirect_uri = state
        .config
        .app_origin
        .join(CALLBACK_PATH)
        .map_err(ApiError::internal)?;
    let session = state
        .identity
        .exchange_code(&code, Some(redirect_uri.as_str()))
        .await?;

    if let Some(correlation_id) = query.state.as_deref().filter(|s| !s.trim().is_empty()) {
        let payload = serde_json::to_value(AuthPayload {
            credential: session.credential.clone(),
            user: Some(session.user.clone()),
        })
        .map_err(ApiError::internal)?;
        // The embedded frame polls for this entry; without it the login stalls.
        state
            .relay
            .put(correlation_id, payload, state.config.relay_ttl)
            .await
            .map_err(super::relay::relay_error)?;
    }

    let max_age = session.credential.expires_at - chrono::Utc::now().timestamp();
    let cookie = session_cookie(
        &session.credential.access_token,
        max_age,
        state.config.cookie_secure,
    )?;
    let location = safe_redirect(&state.config.app_origin, query.redirect.as_deref());
    let location = HeaderValue::from_str(&location).map_err(ApiError::internal)?;

    info!(user_id = %session.user.user_id, "Session established");

    let mut response = StatusCode::SEE_OTHER.into_response();
    let headers = response.headers_mut();
    headers.insert(LOCATION, location);
    headers.insert(SET_COOKIE, cookie);
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}

/// Clear the session cookie. Requires a valid CSRF token.
#[utoipa::path(
    post,
    path = "/auth/signout",
    tag = "Session",
    params(("x-csrf-token" = String, Header, description = "Token from /csrf-token")),
    responses(
        (status = 204, description = "Signed out"),
        (status = 403, description = "CSRF token missing or invalid")
    )
)]
pub async fn sign_out(
    _csrf: CsrfProtected,
    OptionalAuth(user): OptionalAuth,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    match user {
        Some(user) => info!(user_id = %user.user_id, "Signed out"),
        None => info!("Signed out anonymous session"),
    }
    let cookie = session_cookie("", 0, state.config.cookie_secure)?;
    let mut response = StatusCode::NO_CONTENT.into_response();
    response.headers_mut().insert(SET_COOKIE, cookie);
    Ok(response)
}
