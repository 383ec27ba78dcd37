// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_SECURITY_POLICY, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info_span, warn, Span};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::middleware::identify_user,
    models::{
        AuthPayload, CsrfTokenResponse, RelayRetrieveResponse, RelayStoreRequest,
        RelayStoreResponse, SessionCredential, SessionResponse, UserProfile, VerifyTokenRequest,
    },
    security::{
        csrf::CSRF_HEADER_NAME,
        rate_limit::{enforce_rate_limit, RateLimitGate},
        RateLimitCategory,
    },
    state::AppState,
};

pub mod csrf;
pub mod health;
pub mod relay;
pub mod session;

pub fn router(state: AppState) -> Router {
    // Endpoints an attacker could use to guess or farm credentials.
    let auth_routes = Router::new()
        .route("/relay", get(relay::retrieve_relay).post(relay::store_relay))
        .route("/auth/verify", post(session::verify_token))
        .route(session::CALLBACK_PATH, get(session::auth_callback))
        .route_layer(from_fn_with_state(
            RateLimitGate::new(state.rate_limiter.clone(), RateLimitCategory::Auth)
                .with_trusted_proxies(&state.config.trusted_proxies),
            enforce_rate_limit,
        ));

    let api_routes = Router::new()
        .route("/csrf-token", get(csrf::issue_csrf_token))
        .route("/auth/session", get(session::current_session))
        .route("/auth/signout", post(session::sign_out))
        .route_layer(from_fn_with_state(
            RateLimitGate::new(state.rate_limiter.clone(), RateLimitCategory::Api)
                .with_trusted_proxies(&state.config.trusted_proxies),
            enforce_rate_limit,
        ));

    let mut app = Router::new()
        .merge(auth_routes)
        .merge(api_routes)
        .layer(from_fn_with_state(state.clone(), identify_user))
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .with_state(state.clone())
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()));

    if let Some(cors) = cors_layer(&state.config.allowed_parent_origins) {
        app = app.layer(cors);
    }
    if let Some(csp) = frame_ancestors(&state.config.allowed_parent_origins) {
        app = app.layer(SetResponseHeaderLayer::if_not_present(
            CONTENT_SECURITY_POLICY,
            csp,
        ));
    }

    app.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(PropagateRequestIdLayer::x_request_id()),
    )
}

/// Credentialed CORS for the configured host origins, none when unset.
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid parent origin");
                None
            }
        })
        .collect();
    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([
                CONTENT_TYPE,
                AUTHORIZATION,
                HeaderName::from_static(CSRF_HEADER_NAME),
            ])
            .allow_credentials(true),
    )
}

/// `Content-Security-Policy` limiting who may frame the app.
fn frame_ancestors(origins: &[String]) -> Option<HeaderValue> {
    let mut policy = String::from("frame-ancestors 'self'");
    for origin in origins {
        policy.push(' ');
        policy.push_str(origin);
    }
    HeaderValue::from_str(&policy).ok()
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

#[derive(OpenApi)]
#[openapi(
    paths(
        relay::store_relay,
        relay::retrieve_relay,
        csrf::issue_csrf_token,
        session::current_session,
        session::verify_token,
        session::auth_callback,
        session::sign_out,
        health::health,
        health::liveness
    ),
    components(
        schemas(
            AuthPayload,
            CsrfTokenResponse,
            RelayRetrieveResponse,
            RelayStoreRequest,
            RelayStoreResponse,
            SessionCredential,
            SessionResponse,
            UserProfile,
            VerifyTokenRequest,
            health::HealthResponse,
            health::ReadyResponse,
            health::HealthChecks
        )
    ),
    tags(
        (name = "Relay", description = "One-time credential relay between browsing contexts"),
        (name = "Security", description = "CSRF token issuance"),
        (name = "Session", description = "Identity provider sessions"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;
