// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWT claims and authenticated user representation.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Claims extracted from an identity provider JWT.
///
/// Standard OIDC claims plus the tenant claim the CRM host adds. Unknown
/// claims are ignored.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct IdpClaims {
    /// Subject (user ID)
    pub sub: String,

    /// Issued at timestamp
    #[serde(default)]
    pub iat: i64,

    /// Expiration timestamp
    #[serde(default)]
    pub exp: i64,

    /// Issuer
    #[serde(default)]
    pub iss: String,

    /// Provider session ID
    #[serde(default)]
    pub sid: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    /// Tenant (CRM account) identifier
    #[serde(default, alias = "tenant_id", alias = "org_id")]
    pub tenant: Option<String>,
}

/// Authenticated user information extracted from a verified token.
///
/// This is the type handlers receive from the `OptionalAuth` extractor and the type
/// the rate limiter keys per-user quotas on.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// Canonical user ID (`sub` claim)
    pub user_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Session ID (if available)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Original issuer (used for validation, not serialized)
    #[serde(skip)]
    pub issuer: String,

    /// Token expiration (Unix timestamp, not serialized)
    #[serde(skip)]
    pub expires_at: i64,
}

impl AuthenticatedUser {
    pub fn from_claims(claims: IdpClaims) -> Self {
        Self {
            user_id: claims.sub,
            tenant_id: claims.tenant,
            email: claims.email,
            display_name: claims.name,
            session_id: claims.sid,
            issuer: claims.iss,
            expires_at: claims.exp,
        }
    }

    #[cfg(test)]
    pub fn for_tests(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            tenant_id: None,
            email: None,
            display_name: None,
            session_id: None,
            issuer: "test".to_string(),
            expires_at: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_claims_maps_identity_fields() {
        let claims: IdpClaims = serde_json::from_value(serde_json::json!({
            "sub": "user_123",
            "exp": 1700003600,
            "iss": "https://idp.example.com",
            "sid": "sess_abc",
            "email": "a@example.com",
            "org_id": "loc_9"
        }))
        .unwrap();

        let user = AuthenticatedUser::from_claims(claims);
        assert_eq!(user.user_id, "user_123");
        assert_eq!(user.tenant_id.as_deref(), Some("loc_9"));
        assert_eq!(user.session_id.as_deref(), Some("sess_abc"));
        assert_eq!(user.expires_at, 1700003600);
    }

    #[test]
    fn serialization_skips_validation_fields() {
        let user = AuthenticatedUser::for_tests("u1");
        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value, serde_json::json!({ "user_id": "u1" }));
    }
}
