// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names, default values, and the
//! [`AppConfig`] loaded from the environment at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `APP_ORIGIN` | Public origin of this app (redirect validation) | `http://localhost:8080` |
//! | `ALLOWED_PARENT_ORIGINS` | Comma-separated host origins allowed to embed the app | empty |
//! | `RELAY_TTL_SECS` | Lifetime of a relayed credential (at most 3600) | `300` |
//! | `RELAY_SWEEP_INTERVAL_SECS` | Interval of the expired-entry sweep (at most 3600) | `60` |
//! | `COOKIE_SECURE` | Add `Secure` to cookies | `true` |
//! | `TRUSTED_PROXIES` | Comma-separated proxy IPs whose forwarding headers are honoured | empty |
//! | `IFRAME_AUTH_TIMEOUT_MS` | Deadline for a parent `AUTH_TOKEN` message (at most 60000) | `3000` |
//! | `RATE_LIMIT_<CATEGORY>_MAX` | Requests per window for a category | per category |
//! | `RATE_LIMIT_<CATEGORY>_WINDOW_SECS` | Window length for a category (at most 86400) | per category |
//! | `IDP_JWKS_URL` | Identity provider JWKS endpoint | Required for production |
//! | `IDP_ISSUER` | Expected JWT issuer claim | Optional |
//! | `IDP_AUDIENCE` | Expected JWT audience claim | Optional |
//! | `IDP_TOKEN_URL` | OAuth token endpoint for code exchange | Optional |
//! | `IDP_CLIENT_ID` / `IDP_CLIENT_SECRET` | OAuth client credentials | Optional |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::net::IpAddr;
use std::time::Duration;

use tracing::warn;
use url::Url;

use crate::relay::MAX_RELAY_TTL;
use crate::security::rate_limit::{CategoryLimit, RateLimitCategory, RateLimitPolicy, MAX_WINDOW};

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const APP_ORIGIN_ENV: &str = "APP_ORIGIN";
pub const ALLOWED_PARENT_ORIGINS_ENV: &str = "ALLOWED_PARENT_ORIGINS";
pub const RELAY_TTL_ENV: &str = "RELAY_TTL_SECS";
pub const RELAY_SWEEP_INTERVAL_ENV: &str = "RELAY_SWEEP_INTERVAL_SECS";
pub const COOKIE_SECURE_ENV: &str = "COOKIE_SECURE";
pub const TRUSTED_PROXIES_ENV: &str = "TRUSTED_PROXIES";
pub const IFRAME_AUTH_TIMEOUT_ENV: &str = "IFRAME_AUTH_TIMEOUT_MS";
pub const IDP_JWKS_URL_ENV: &str = "IDP_JWKS_URL";
pub const IDP_ISSUER_ENV: &str = "IDP_ISSUER";
pub const IDP_AUDIENCE_ENV: &str = "IDP_AUDIENCE";
pub const IDP_TOKEN_URL_ENV: &str = "IDP_TOKEN_URL";
pub const IDP_CLIENT_ID_ENV: &str = "IDP_CLIENT_ID";
pub const IDP_CLIENT_SECRET_ENV: &str = "IDP_CLIENT_SECRET";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Default lifetime of a relay entry (5 minutes).
pub const DEFAULT_RELAY_TTL: Duration = Duration::from_secs(300);

/// Default interval between relay sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default deadline for the iframe to receive credentials from its host.
pub const DEFAULT_IFRAME_AUTH_TIMEOUT: Duration = Duration::from_millis(3000);

const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const MAX_IFRAME_AUTH_TIMEOUT: Duration = Duration::from_secs(60);

const DEFAULT_APP_ORIGIN: &str = "http://localhost:8080";

/// Identity provider settings.
///
/// With no `jwks_url` the provider runs in development mode (structure-only
/// token checks), which is only honoured in test builds or with the `dev`
/// feature.
#[derive(Debug, Clone, Default)]
pub struct IdentityConfig {
    pub jwks_url: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub token_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Application configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Origin the app is served from. Redirect targets must match it.
    pub app_origin: Url,
    /// Host origins whose `postMessage` events and embedding are trusted.
    pub allowed_parent_origins: Vec<String>,
    pub relay_ttl: Duration,
    pub sweep_interval: Duration,
    pub cookie_secure: bool,
    /// Peers allowed to name the client through `X-Forwarded-For`.
    pub trusted_proxies: Vec<IpAddr>,
    pub iframe_auth_timeout: Duration,
    pub rate_limits: RateLimitPolicy,
    pub identity: IdentityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            app_origin: Url::parse(DEFAULT_APP_ORIGIN).expect("default origin is a valid URL"),
            allowed_parent_origins: Vec::new(),
            relay_ttl: DEFAULT_RELAY_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            cookie_secure: true,
            trusted_proxies: Vec::new(),
            iframe_auth_timeout: DEFAULT_IFRAME_AUTH_TIMEOUT,
            rate_limits: RateLimitPolicy::default(),
            identity: IdentityConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Unparseable values fall back to their defaults with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let app_origin = match get(APP_ORIGIN_ENV) {
            Some(raw) => Url::parse(&raw).unwrap_or_else(|e| {
                warn!(variable = APP_ORIGIN_ENV, error = %e, "Invalid origin, using default");
                defaults.app_origin.clone()
            }),
            None => defaults.app_origin.clone(),
        };

        let allowed_parent_origins = get(ALLOWED_PARENT_ORIGINS_ENV)
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().trim_end_matches('/').to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let trusted_proxies = get(TRUSTED_PROXIES_ENV)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .filter_map(|s| match s.parse::<IpAddr>() {
                        Ok(ip) => Some(ip),
                        Err(e) => {
                            warn!(variable = TRUSTED_PROXIES_ENV, value = %s, error = %e, "Ignoring invalid proxy address");
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut rate_limits = RateLimitPolicy::default();
        for category in RateLimitCategory::ALL {
            let base = rate_limits.limit_for(category);
            let prefix = format!("RATE_LIMIT_{}", category.as_str().to_uppercase());
            let max_requests = parse_or(&get, &format!("{prefix}_MAX"), base.max_requests);
            let window_name = format!("{prefix}_WINDOW_SECS");
            let window_secs = parse_or(&get, &window_name, base.window.as_secs());
            let window = at_most(&window_name, Duration::from_secs(window_secs.max(1)), MAX_WINDOW);
            rate_limits.set(category, CategoryLimit::new(max_requests, window));
        }

        Self {
            host: get(HOST_ENV).unwrap_or(defaults.host),
            port: parse_or(&get, PORT_ENV, defaults.port),
            app_origin,
            allowed_parent_origins,
            relay_ttl: at_most(
                RELAY_TTL_ENV,
                Duration::from_secs(parse_or(&get, RELAY_TTL_ENV, defaults.relay_ttl.as_secs())),
                MAX_RELAY_TTL,
            ),
            sweep_interval: at_most(
                RELAY_SWEEP_INTERVAL_ENV,
                Duration::from_secs(
                    parse_or(&get, RELAY_SWEEP_INTERVAL_ENV, defaults.sweep_interval.as_secs())
                        .max(1),
                ),
                MAX_SWEEP_INTERVAL,
            ),
            cookie_secure: parse_or(&get, COOKIE_SECURE_ENV, defaults.cookie_secure),
            trusted_proxies,
            iframe_auth_timeout: at_most(
                IFRAME_AUTH_TIMEOUT_ENV,
                Duration::from_millis(parse_or(
                    &get,
                    IFRAME_AUTH_TIMEOUT_ENV,
                    defaults.iframe_auth_timeout.as_millis() as u64,
                )),
                MAX_IFRAME_AUTH_TIMEOUT,
            ),
            rate_limits,
            identity: IdentityConfig {
                jwks_url: get(IDP_JWKS_URL_ENV),
                issuer: get(IDP_ISSUER_ENV),
                audience: get(IDP_AUDIENCE_ENV),
                token_url: get(IDP_TOKEN_URL_ENV),
                client_id: get(IDP_CLIENT_ID_ENV),
                client_secret: get(IDP_CLIENT_SECRET_ENV),
            },
        }
    }

    /// Socket address string for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn at_most(name: &str, value: Duration, max: Duration) -> Duration {
    if value > max {
        warn!(variable = name, max_secs = max.as_secs(), "Value too large, clamping");
        return max;
    }
    value
}

fn parse_or<T, G>(get: &G, name: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, "Invalid value, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = AppConfig::from_lookup(|_| None);
        assert_eq!(config.port, 8080);
        assert_eq!(config.relay_ttl, DEFAULT_RELAY_TTL);
        assert_eq!(config.iframe_auth_timeout, Duration::from_millis(3000));
        assert!(config.cookie_secure);
        assert!(config.allowed_parent_origins.is_empty());
        assert!(config.identity.jwks_url.is_none());
    }

    #[test]
    fn parses_origins_and_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            (PORT_ENV, "9090"),
            (APP_ORIGIN_ENV, "https://app.example.com"),
            (
                ALLOWED_PARENT_ORIGINS_ENV,
                "https://crm.example.com/, https://other.example.com",
            ),
            (COOKIE_SECURE_ENV, "false"),
            ("RATE_LIMIT_AUTH_MAX", "3"),
            ("RATE_LIMIT_AUTH_WINDOW_SECS", "30"),
        ]));

        assert_eq!(config.port, 9090);
        assert_eq!(config.app_origin.as_str(), "https://app.example.com/");
        assert_eq!(
            config.allowed_parent_origins,
            vec!["https://crm.example.com", "https://other.example.com"]
        );
        assert!(!config.cookie_secure);

        let auth = config.rate_limits.limit_for(RateLimitCategory::Auth);
        assert_eq!(auth.max_requests, 3);
        assert_eq!(auth.window, Duration::from_secs(30));
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let config = AppConfig::from_lookup(lookup(&[
            (PORT_ENV, "not-a-port"),
            (RELAY_TTL_ENV, "-5"),
        ]));
        assert_eq!(config.port, 8080);
        assert_eq!(config.relay_ttl, DEFAULT_RELAY_TTL);
    }

    #[test]
    fn oversized_durations_are_clamped() {
        let config = AppConfig::from_lookup(lookup(&[
            (RELAY_TTL_ENV, "18446744073709551615"),
            (RELAY_SWEEP_INTERVAL_ENV, "18446744073709551615"),
            (IFRAME_AUTH_TIMEOUT_ENV, "18446744073709551615"),
            ("RATE_LIMIT_AUTH_WINDOW_SECS", "18446744073709551615"),
        ]));
        assert_eq!(config.relay_ttl, MAX_RELAY_TTL);
        assert_eq!(config.sweep_interval, MAX_SWEEP_INTERVAL);
        assert_eq!(config.iframe_auth_timeout, MAX_IFRAME_AUTH_TIMEOUT);
        assert_eq!(
            config.rate_limits.limit_for(RateLimitCategory::Auth).window,
            MAX_WINDOW
        );
    }

    #[test]
    fn trusted_proxies_skip_invalid_entries() {
        let config = AppConfig::from_lookup(lookup(&[(
            TRUSTED_PROXIES_ENV,
            "10.0.0.2, not-an-ip, ::1",
        )]));
        assert_eq!(
            config.trusted_proxies,
            vec![
                "10.0.0.2".parse::<IpAddr>().unwrap(),
                "::1".parse::<IpAddr>().unwrap()
            ]
        );
    }
}
