// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::auth::{IdentityProvider, JwtIdentityProvider};
use crate::config::AppConfig;
use crate::relay::{InMemoryRelayStore, RelayStore};
use crate::security::{CsrfGuard, InMemoryRateLimiter, RateLimiter};

/// Shared handler state. Every collaborator is injected so a deployment can
/// swap the in-process stores for shared ones.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub relay: Arc<dyn RelayStore>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub identity: Arc<dyn IdentityProvider>,
    pub csrf: CsrfGuard,
}

impl AppState {
    /// State with in-process stores and the JWT identity adapter.
    pub fn new(config: AppConfig) -> Self {
        let rate_limiter = Arc::new(InMemoryRateLimiter::new(config.rate_limits.clone()));
        let identity = Arc::new(JwtIdentityProvider::new(config.identity.clone()));
        Self {
            csrf: CsrfGuard::new(config.cookie_secure),
            relay: Arc::new(InMemoryRelayStore::new()),
            rate_limiter,
            identity,
            config: Arc::new(config),
        }
    }

    pub fn with_relay(mut self, relay: Arc<dyn RelayStore>) -> Self {
        self.relay = relay;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = limiter;
        self
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = identity;
        self
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(AppConfig::default())
    }
}
