// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity provider boundary.
//!
//! The bridge only consumes three provider operations: verify a token, look
//! up the session a token belongs to, and exchange an OAuth authorization
//! code. [`JwtIdentityProvider`] implements them against a JWKS endpoint and
//! an OAuth token endpoint.
//!
//! ## Verification Modes
//!
//! - **Production** (`IDP_JWKS_URL` set): signature, expiry, issuer and
//!   audience are verified against the provider's published keys.
//! - **Development** (no JWKS URL): structure and expiry only. Honoured in
//!   test builds and with the `dev` feature; otherwise every token is
//!   rejected.

use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, errors::ErrorKind, Validation};
use serde::Deserialize;
use tracing::{debug, info};

use super::claims::{AuthenticatedUser, IdpClaims};
use super::error::AuthError;
use super::jwks::JwksManager;
use super::profile::{ProfileSource, TokenEndpointUser};
use crate::config::IdentityConfig;
use crate::models::{SessionCredential, UserProfile};

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Timeout for calls to the identity provider.
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// A provider session: the credential and who it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSession {
    pub credential: SessionCredential,
    pub user: UserProfile,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify a token and return the user it was issued to.
    async fn verify_token(&self, token: &str) -> Result<AuthenticatedUser, AuthError>;

    /// Session for `token`, or `None` if the token is not a valid session.
    ///
    /// Only provider outages are errors.
    async fn get_session(&self, token: &str) -> Result<Option<ProviderSession>, AuthError>;

    /// Exchange an authorization code for a session.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<ProviderSession, AuthError>;

    /// Readiness of the provider's dependencies, `None` when not applicable.
    async fn readiness(&self) -> Option<bool> {
        None
    }
}

/// Token endpoint response (RFC 6749 §5.1 plus an optional user object).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    user: Option<TokenEndpointUser>,
}

/// JWKS-backed identity provider adapter.
#[derive(Clone)]
pub struct JwtIdentityProvider {
    jwks: Option<JwksManager>,
    config: IdentityConfig,
    client: reqwest::Client,
}

impl JwtIdentityProvider {
    pub fn new(config: IdentityConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()
            .unwrap_or_default();
        let jwks = config
            .jwks_url
            .as_ref()
            .map(|url| JwksManager::new(url.clone(), client.clone()));
        Self {
            jwks,
            config,
            client,
        }
    }

    /// Whether signatures are verified against a JWKS endpoint.
    pub fn is_production(&self) -> bool {
        self.jwks.is_some()
    }

    pub fn jwks(&self) -> Option<&JwksManager> {
        self.jwks.as_ref()
    }

    async fn decode_claims(&self, token: &str) -> Result<IdpClaims, AuthError> {
        match &self.jwks {
            Some(jwks) => self.decode_verified(token, jwks).await,
            None => decode_development(token),
        }
    }

    async fn decode_verified(&self, token: &str, jwks: &JwksManager) -> Result<IdpClaims, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError::MalformedToken)?;

        let (decoding_key, algorithm) = match &header.kid {
            Some(kid) => jwks.get_decoding_key(kid).await?,
            None => jwks.get_any_decoding_key().await?,
        };

        let mut validation = Validation::new(algorithm);
        validation.leeway = CLOCK_SKEW_LEEWAY;
        if let Some(issuer) = &self.config.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let data = decode::<IdpClaims>(token, &decoding_key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
                ErrorKind::InvalidAudience => AuthError::InvalidAudience,
                ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
                _ => AuthError::MalformedToken,
            }
        })?;
        Ok(data.claims)
    }
}

/// Structure-only decode for development.
fn decode_development(token: &str) -> Result<IdpClaims, AuthError> {
    if !cfg!(any(test, feature = "dev")) {
        return Err(AuthError::InternalError(
            "token verification is not configured".to_string(),
        ));
    }

    let data = jsonwebtoken::dangerous::insecure_decode::<IdpClaims>(token)
        .map_err(|_| AuthError::MalformedToken)?;
    let claims = data.claims;

    let now = chrono::Utc::now().timestamp();
    if claims.exp > 0 && claims.exp < now - CLOCK_SKEW_LEEWAY as i64 {
        return Err(AuthError::TokenExpired);
    }
    Ok(claims)
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn verify_token(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let claims = self.decode_claims(token).await?;
        Ok(AuthenticatedUser::from_claims(claims))
    }

    async fn get_session(&self, token: &str) -> Result<Option<ProviderSession>, AuthError> {
        match self.decode_claims(token).await {
            Ok(claims) => {
                let expires_at = claims.exp;
                Ok(Some(ProviderSession {
                    credential: SessionCredential {
                        access_token: token.to_string(),
                        refresh_token: None,
                        expires_at,
                    },
                    user: ProfileSource::Claims(claims).normalize(),
                }))
            }
            Err(e @ (AuthError::Upstream(_) | AuthError::InternalError(_))) => Err(e),
            Err(e) => {
                debug!(reason = e.error_code(), "Token does not map to a session");
                Ok(None)
            }
        }
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<ProviderSession, AuthError> {
        let token_url = self.config.token_url.as_deref().ok_or_else(|| {
            AuthError::InternalError("code exchange is not configured".to_string())
        })?;

        let mut form: Vec<(&str, &str)> = vec![("grant_type", "authorization_code"), ("code", code)];
        if let Some(client_id) = self.config.client_id.as_deref() {
            form.push(("client_id", client_id));
        }
        if let Some(secret) = self.config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }
        if let Some(uri) = redirect_uri {
            form.push(("redirect_uri", uri));
        }

        let response = self
            .client
            .post(token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::Upstream(format!("token endpoint: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AuthError::InvalidCode);
        }
        if !status.is_success() {
            return Err(AuthError::Upstream(format!(
                "HTTP {status} from token endpoint"
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Upstream(format!("token response: {e}")))?;

        let (user, token_exp) = match body.user {
            Some(user) => (ProfileSource::TokenEndpoint(user).normalize(), None),
            None => {
                let claims = self.decode_claims(&body.access_token).await?;
                let exp = (claims.exp > 0).then_some(claims.exp);
                (ProfileSource::Claims(claims).normalize(), exp)
            }
        };

        let now = chrono::Utc::now().timestamp();
        let expires_at = body
            .expires_in
            .map(|secs| now + secs)
            .or(token_exp)
            .unwrap_or(now + 3600);

        info!(user_id = %user.user_id, "Authorization code exchanged");

        Ok(ProviderSession {
            credential: SessionCredential {
                access_token: body.access_token,
                refresh_token: body.refresh_token,
                expires_at,
            },
            user,
        })
    }

    async fn readiness(&self) -> Option<bool> {
        let jwks = self.jwks.as_ref()?;
        if jwks.is_cached().await {
            return Some(true);
        }
        Some(jwks.refresh().await.is_ok())
    }
}
