// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractor for the caller's identity.
//!
//! ```rust,ignore
//! async fn my_handler(OptionalAuth(user): OptionalAuth) -> impl IntoResponse {
//!     // user is Option<AuthenticatedUser>
//! }
//! ```
//!
//! The token is read from `Authorization: Bearer <token>` or, failing that,
//! from the session cookie. Top-level tabs use the cookie; embedded frames
//! whose third-party cookies are blocked send the bearer header with the
//! credential they acquired through the bridge.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};

use super::{AuthError, AuthenticatedUser, SESSION_COOKIE_NAME};
use crate::security::cookie_value;
use crate::state::AppState;

/// Token presented by the request, if any.
///
/// A malformed `Authorization` header is an error; an absent one falls back
/// to the session cookie.
pub fn request_token(headers: &HeaderMap) -> Result<Option<String>, AuthError> {
    if let Some(header) = headers.get(AUTHORIZATION) {
        let value = header.to_str().map_err(|_| AuthError::InvalidAuthHeader)?;
        let token = value
            .trim()
            .strip_prefix("Bearer ")
            .or_else(|| value.trim().strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::InvalidAuthHeader)?;
        return Ok(Some(token.to_string()));
    }
    Ok(cookie_value(headers, SESSION_COOKIE_NAME).filter(|t| !t.is_empty()))
}

/// Caller identity, or `None` when no valid credential is present.
pub struct OptionalAuth(pub Option<AuthenticatedUser>);

impl FromRequestParts<AppState> for OptionalAuth {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        // Middleware may already have resolved the user.
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>().cloned() {
            return Ok(OptionalAuth(Some(user)));
        }

        let Ok(Some(token)) = request_token(&parts.headers) else {
            return Ok(OptionalAuth(None));
        };
        Ok(OptionalAuth(state.identity.verify_token(&token).await.ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::provider::test_support::unsigned_jwt;
    use axum::http::{header::COOKIE, HeaderValue, Request};

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/test");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    async fn extract(parts: &mut Parts) -> Option<AuthenticatedUser> {
        let OptionalAuth(user) = OptionalAuth::from_request_parts(parts, &AppState::default())
            .await
            .unwrap();
        user
    }

    #[tokio::test]
    async fn no_credentials_yield_none() {
        assert!(extract(&mut parts(&[])).await.is_none());
    }

    #[tokio::test]
    async fn bearer_token_is_verified() {
        let token = unsigned_jwt("user_123", 9_999_999_999);
        let header = format!("Bearer {token}");
        let user = extract(&mut parts(&[("authorization", header.as_str())])).await;
        assert_eq!(user.unwrap().user_id, "user_123");
    }

    #[tokio::test]
    async fn falls_back_to_session_cookie() {
        let token = unsigned_jwt("cookie_user", 9_999_999_999);
        let mut parts = parts(&[]);
        parts.headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("{SESSION_COOKIE_NAME}={token}")).unwrap(),
        );
        assert_eq!(extract(&mut parts).await.unwrap().user_id, "cookie_user");
    }

    #[tokio::test]
    async fn malformed_or_expired_credentials_yield_none() {
        assert!(extract(&mut parts(&[("authorization", "Basic abc")])).await.is_none());

        let expired = format!("Bearer {}", unsigned_jwt("user_old", 1));
        assert!(extract(&mut parts(&[("authorization", expired.as_str())])).await.is_none());
    }

    #[test]
    fn malformed_authorization_header_is_an_error() {
        let headers = parts(&[("authorization", "Basic abc")]).headers;
        assert!(matches!(request_token(&headers), Err(AuthError::InvalidAuthHeader)));
    }

    #[tokio::test]
    async fn prefers_user_resolved_by_middleware() {
        let mut parts = parts(&[]);
        parts
            .extensions
            .insert(AuthenticatedUser::for_tests("user_from_middleware"));
        assert_eq!(extract(&mut parts).await.unwrap().user_id, "user_from_middleware");
    }
}
