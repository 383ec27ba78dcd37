// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response bodies for the bridge endpoints, plus the credential
//! and profile types shared by the server and the embedded client. Wire names
//! are camelCase to match the browser side.
//!
//! ## Model Categories
//!
//! - **Credentials**: [`SessionCredential`], the normalized [`UserProfile`]
//!   and the [`AuthPayload`] bundle passed between windows
//! - **Relay**: store / retrieve bodies for the one-time relay
//! - **CSRF**: token issuance response
//! - **Session**: verification and current-session responses

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

// =============================================================================
// Credentials
// =============================================================================

/// Access credential issued by the identity provider.
///
/// `Debug` redacts both tokens.
#[derive(Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionCredential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds) after which the access token is invalid.
    pub expires_at: i64,
}

impl SessionCredential {
    pub fn is_expired_at(&self, now_unix: i64) -> bool {
        self.expires_at <= now_unix
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp())
    }

    /// Usable credential: non-empty token that has not expired.
    pub fn is_usable(&self) -> bool {
        !self.access_token.trim().is_empty() && !self.is_expired()
    }
}

impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredential")
            .field("access_token", &"[redacted]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[redacted]"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Identity information normalized from any provider shape.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Tenant (CRM account / location) the user is acting in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// Credential bundle a login callback parks in the relay as `authData`.
///
/// Host windows use a different shape: an `AUTH_TOKEN` message carries the
/// flattened credential plus a host identity (see
/// [`crate::bridge::messaging::AuthTokenData`]).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub credential: SessionCredential,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
}

// =============================================================================
// Relay
// =============================================================================

/// Body of `POST /relay`.
///
/// Fields are optional at the serde level so that missing fields produce a
/// 400 from the handler rather than an extractor rejection.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct RelayStoreRequest {
    pub session_id: Option<String>,
    #[schema(value_type = Object)]
    pub auth_data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct RelayStoreResponse {
    pub success: bool,
}

/// Body of `GET /relay`. `authData` is present only when `found` is true.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RelayRetrieveResponse {
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub auth_data: Option<Value>,
}

impl RelayRetrieveResponse {
    pub fn found(auth_data: Value) -> Self {
        Self {
            found: true,
            auth_data: Some(auth_data),
        }
    }

    pub fn not_found() -> Self {
        Self {
            found: false,
            auth_data: None,
        }
    }
}

// =============================================================================
// CSRF
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CsrfTokenResponse {
    pub token: String,
}

// =============================================================================
// Session
// =============================================================================

/// Body of `POST /auth/verify`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct VerifyTokenRequest {
    pub token: Option<String>,
}

/// Session as seen by the client: credential plus who it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user: UserProfile,
    pub expires_at: i64,
}
