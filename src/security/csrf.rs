// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Double-submit CSRF protection.
//!
//! `issue` mints a 256-bit random token, returned both in the response body
//! and in an `HttpOnly; SameSite=Strict` cookie. A client script mirrors the
//! body value into the `x-csrf-token` header on mutating requests, and
//! `validate` compares header and cookie in constant time.
//!
//! Token values are never logged.

use std::time::Duration;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, HeaderValue},
};
use base64ct::{Base64UrlUnpadded, Encoding};
use ring::rand::{SecureRandom, SystemRandom};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::ApiError;
use crate::security::cookie_value;
use crate::state::AppState;

pub const CSRF_COOKIE_NAME: &str = "csrf_token";
pub const CSRF_HEADER_NAME: &str = "x-csrf-token";

/// Cookie lifetime (24 hours).
pub const CSRF_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const TOKEN_BYTES: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum CsrfError {
    #[error("random source unavailable")]
    Random,
    #[error("token could not be encoded as a cookie")]
    Cookie,
}

/// A freshly minted token and the `Set-Cookie` value binding it.
pub struct IssuedToken {
    pub token: String,
    pub set_cookie: HeaderValue,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken").finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct CsrfGuard {
    secure_cookie: bool,
    rng: SystemRandom,
}

impl CsrfGuard {
    pub fn new(secure_cookie: bool) -> Self {
        Self {
            secure_cookie,
            rng: SystemRandom::new(),
        }
    }

    /// Mint a token and its cookie.
    pub fn issue(&self) -> Result<IssuedToken, CsrfError> {
        let mut bytes = [0u8; TOKEN_BYTES];
        self.rng.fill(&mut bytes).map_err(|_| CsrfError::Random)?;
        let token = Base64UrlUnpadded::encode_string(&bytes);

        let mut cookie = format!(
            "{CSRF_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}",
            CSRF_TOKEN_TTL.as_secs()
        );
        if self.secure_cookie {
            cookie.push_str("; Secure");
        }
        let set_cookie = HeaderValue::from_str(&cookie).map_err(|_| CsrfError::Cookie)?;

        Ok(IssuedToken { token, set_cookie })
    }

    /// Check that header and cookie carry the same non-empty token.
    ///
    /// Fails closed when either part is missing. Never errors.
    pub fn validate(&self, headers: &HeaderMap) -> bool {
        let header = headers
            .get(CSRF_HEADER_NAME)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let cookie = cookie_value(headers, CSRF_COOKIE_NAME).filter(|v| !v.is_empty());

        match (header, cookie) {
            (Some(header), Some(cookie)) => tokens_match(header.as_bytes(), cookie.as_bytes()),
            _ => false,
        }
    }
}

/// Constant-time token comparison.
///
/// Length is not secret; contents are compared without early exit.
pub fn tokens_match(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Extractor that rejects requests failing CSRF validation with 403.
///
/// ```rust,ignore
/// async fn sign_out(_csrf: CsrfProtected, State(state): State<AppState>) { .. }
/// ```
pub struct CsrfProtected;

impl FromRequestParts<AppState> for CsrfProtected {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if state.csrf.validate(&parts.headers) {
            Ok(CsrfProtected)
        } else {
            warn!(path = %parts.uri.path(), "CSRF validation failed");
            Err(ApiError::forbidden("CSRF token missing or invalid"))
        }
    }
}
