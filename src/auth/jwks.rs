// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWKS (JSON Web Key Set) fetching and caching.
//!
//! - Keys are cached for a TTL (5 minutes by default).
//! - A token whose `kid` is unknown forces one refresh, which picks up key
//!   rotation without waiting for the TTL. Forced refreshes are spaced by a
//!   cooldown (30 seconds by default) so random `kid`s cannot drive fetches.
//! - If a refresh fails while a stale set is cached, the stale set is used.

use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::error::AuthError;

/// Default JWKS cache TTL (5 minutes).
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Minimum spacing between refreshes forced by an unknown `kid`.
const DEFAULT_REFRESH_COOLDOWN: Duration = Duration::from_secs(30);

struct CacheEntry {
    jwks: JwkSet,
    fetched_at: Instant,
}

/// Cached view of the identity provider's signing keys.
#[derive(Clone)]
pub struct JwksManager {
    jwks_url: String,
    cache_ttl: Duration,
    refresh_cooldown: Duration,
    cache: Arc<RwLock<Option<CacheEntry>>>,
    last_forced_refresh: Arc<RwLock<Option<Instant>>>,
    client: reqwest::Client,
}

impl JwksManager {
    pub fn new(jwks_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            cache_ttl: DEFAULT_CACHE_TTL,
            refresh_cooldown: DEFAULT_REFRESH_COOLDOWN,
            cache: Arc::new(RwLock::new(None)),
            last_forced_refresh: Arc::new(RwLock::new(None)),
            client,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.refresh_cooldown = cooldown;
        self
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Current key set, refreshed when older than the TTL.
    async fn get_jwks(&self) -> Result<JwkSet, AuthError> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = &*cache {
                if entry.fetched_at.elapsed() < self.cache_ttl {
                    return Ok(entry.jwks.clone());
                }
            }
        }
        self.refresh_or_stale().await
    }

    /// Refresh, falling back to a stale cached set if the fetch fails.
    async fn refresh_or_stale(&self) -> Result<JwkSet, AuthError> {
        match self.fetch_jwks().await {
            Ok(jwks) => {
                self.store(jwks.clone()).await;
                Ok(jwks)
            }
            Err(e) => {
                let cache = self.cache.read().await;
                match &*cache {
                    Some(entry) => {
                        warn!(error = %e, "JWKS refresh failed, using stale keys");
                        Ok(entry.jwks.clone())
                    }
                    None => Err(e),
                }
            }
        }
    }

    async fn store(&self, jwks: JwkSet) {
        let mut cache = self.cache.write().await;
        *cache = Some(CacheEntry {
            jwks,
            fetched_at: Instant::now(),
        });
    }

    async fn fetch_jwks(&self) -> Result<JwkSet, AuthError> {
        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| AuthError::Upstream(format!("JWKS fetch: {e}")))?;

        if !response.status().is_success() {
            return Err(AuthError::Upstream(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| AuthError::Upstream(format!("JWKS body: {e}")))
    }

    /// Claim the forced-refresh slot. False while the cooldown is running.
    async fn claim_forced_refresh(&self) -> bool {
        let mut last = self.last_forced_refresh.write().await;
        if last.is_some_and(|at| at.elapsed() < self.refresh_cooldown) {
            return false;
        }
        *last = Some(Instant::now());
        true
    }

    /// Decoding key for `kid`, refreshing once if the kid is unknown and no
    /// forced refresh ran within the cooldown.
    pub async fn get_decoding_key(&self, kid: &str) -> Result<(DecodingKey, Algorithm), AuthError> {
        let jwks = self.get_jwks().await?;
        if let Some(jwk) = find_key(&jwks, kid) {
            return jwk_to_decoding_key(jwk);
        }

        if !self.claim_forced_refresh().await {
            debug!(kid, "Unknown kid during refresh cooldown");
            return Err(AuthError::NoMatchingKey);
        }
        let refreshed = self.refresh_or_stale().await?;
        let jwk = find_key(&refreshed, kid).ok_or(AuthError::NoMatchingKey)?;
        jwk_to_decoding_key(jwk)
    }

    /// First usable key, for tokens without `kid`.
    pub async fn get_any_decoding_key(&self) -> Result<(DecodingKey, Algorithm), AuthError> {
        let jwks = self.get_jwks().await?;
        jwks.keys
            .iter()
            .find_map(|jwk| jwk_to_decoding_key(jwk).ok())
            .ok_or(AuthError::NoMatchingKey)
    }

    /// Whether a fresh key set is cached.
    pub async fn is_cached(&self) -> bool {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .is_some_and(|entry| entry.fetched_at.elapsed() < self.cache_ttl)
    }

    /// Force a refresh.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        let jwks = self.fetch_jwks().await?;
        self.store(jwks).await;
        Ok(())
    }
}

fn find_key<'a>(jwks: &'a JwkSet, kid: &str) -> Option<&'a Jwk> {
    jwks.keys
        .iter()
        .find(|k| k.common.key_id.as_deref() == Some(kid))
}

fn jwk_to_decoding_key(jwk: &Jwk) -> Result<(DecodingKey, Algorithm), AuthError> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => {
            let key = DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
                .map_err(|e| AuthError::InternalError(format!("RSA key: {e}")))?;
            let alg = match jwk.common.key_algorithm {
                Some(KeyAlgorithm::RS384) => Algorithm::RS384,
                Some(KeyAlgorithm::RS512) => Algorithm::RS512,
                Some(KeyAlgorithm::PS256) => Algorithm::PS256,
                _ => Algorithm::RS256,
            };
            Ok((key, alg))
        }
        AlgorithmParameters::EllipticCurve(ec) => {
            let key = DecodingKey::from_ec_components(&ec.x, &ec.y)
                .map_err(|e| AuthError::InternalError(format!("EC key: {e}")))?;
            let alg = match jwk.common.key_algorithm {
                Some(KeyAlgorithm::ES384) => Algorithm::ES384,
                _ => Algorithm::ES256,
            };
            Ok((key, alg))
        }
        _ => Err(AuthError::InternalError(
            "Unsupported key type in JWKS".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_jwks() -> serde_json::Value {
        serde_json::json!({
            "keys": [{
                "kty": "RSA",
                "kid": "key-1",
                "alg": "RS256",
                "n": "sXchDaQebHnPiGvyDOAT4saGEUetSyo9MKLOoWFsueri23bOdgWp4Dy1WlUzewbgBHod5pcM9H95GQRV3JDXboIRROSBigeC5yjU1hGzHHyXss8UDprecbAYxknTcQkhslANGRUZmdTOQ5qTRsLAt6BTYuyvVRdhS8exSZEy_c4gs_7svlJJQ4H9_NxsiIoLwAEk7-Q3UXERGYw_75IDrGA84-lA_-Ct4eTlXHBIY2EaV7t7LjJaynVJCpkv4LKjTTAumiGUIuQhrNhZLuF_RJLqHpM2kgWFLU7-VTdL1VbC2tejvcI2BlMkEpk1BzBZI0KQB0GaDWFLN-aEAw3vRw",
                "e": "AQAB"
            }]
        })
    }

    /// Serve `sample_jwks` locally, counting fetches.
    async fn counting_jwks_endpoint() -> (String, Arc<AtomicUsize>) {
        use axum::{routing::get, Json, Router};

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new().route(
            "/jwks",
            get(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Json(sample_jwks()) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/jwks"), hits)
    }

    fn manager() -> JwksManager {
        JwksManager::new(
            "https://idp.example.com/.well-known/jwks.json",
            reqwest::Client::new(),
        )
    }

    #[test]
    fn custom_cache_ttl() {
        let manager = manager().with_cache_ttl(Duration::from_secs(60));
        assert_eq!(manager.cache_ttl, Duration::from_secs(60));
        assert_eq!(
            manager.jwks_url(),
            "https://idp.example.com/.well-known/jwks.json"
        );
    }

    #[tokio::test]
    async fn cache_initially_empty() {
        assert!(!manager().is_cached().await);
    }

    #[tokio::test]
    async fn stored_keys_are_found_by_kid() {
        let manager = manager();
        let jwks: JwkSet = serde_json::from_value(sample_jwks()).unwrap();
        manager.store(jwks).await;

        assert!(manager.is_cached().await);
        let (_, alg) = manager.get_decoding_key("key-1").await.unwrap();
        assert_eq!(alg, Algorithm::RS256);
        assert!(manager.get_any_decoding_key().await.is_ok());
    }

    #[tokio::test]
    async fn unknown_kids_refetch_once_per_cooldown() {
        let (url, hits) = counting_jwks_endpoint().await;
        let manager = JwksManager::new(url, reqwest::Client::new());

        assert!(manager.get_decoding_key("key-1").await.is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        for i in 0..10 {
            let result = manager.get_decoding_key(&format!("rotated-{i}")).await;
            assert!(matches!(result, Err(AuthError::NoMatchingKey)));
        }
        // One forced refresh for the first unknown kid, none after.
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn forced_refresh_resumes_after_cooldown() {
        let (url, hits) = counting_jwks_endpoint().await;
        let manager =
            JwksManager::new(url, reqwest::Client::new()).with_refresh_cooldown(Duration::ZERO);

        assert!(manager.get_decoding_key("key-1").await.is_ok());
        for i in 0..3 {
            let _ = manager.get_decoding_key(&format!("rotated-{i}")).await;
        }
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }
}
