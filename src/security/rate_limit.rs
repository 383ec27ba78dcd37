// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Rate limiting primitives.
//!
//! Requests are counted per `(identifier, category)` in fixed windows. Each
//! category carries its own quota and window; `auth` is the tightest and is
//! keyed by network address, `download` and `transcribe` are keyed by the
//! authenticated user when one is known.
//!
//! The check is a single increment-and-compare under one lock, so parallel
//! handlers cannot both take the last slot of a window.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::time::Instant;
use tracing::{error, warn};

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;

/// Endpoint categories with independent quotas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitCategory {
    /// Sign-in, token verification and relay endpoints.
    Auth,
    Download,
    Transcribe,
    /// Generic API traffic.
    Api,
}

impl RateLimitCategory {
    pub const ALL: [RateLimitCategory; 4] = [
        RateLimitCategory::Auth,
        RateLimitCategory::Download,
        RateLimitCategory::Transcribe,
        RateLimitCategory::Api,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RateLimitCategory::Auth => "auth",
            RateLimitCategory::Download => "download",
            RateLimitCategory::Transcribe => "transcribe",
            RateLimitCategory::Api => "api",
        }
    }

    /// Whether requests are counted per network address even when a user is
    /// known.
    pub fn per_address(self) -> bool {
        matches!(self, RateLimitCategory::Auth)
    }
}

/// Longest window a category may use. Longer configured windows are clamped.
pub const MAX_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Quota for one category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CategoryLimit {
    pub max_requests: u32,
    pub window: Duration,
}

impl CategoryLimit {
    pub const fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

/// Quotas for every category.
#[derive(Clone, Debug)]
pub struct RateLimitPolicy {
    limits: HashMap<RateLimitCategory, CategoryLimit>,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        let limits = HashMap::from([
            (
                RateLimitCategory::Auth,
                CategoryLimit::new(10, Duration::from_secs(15 * 60)),
            ),
            (
                RateLimitCategory::Download,
                CategoryLimit::new(30, Duration::from_secs(60)),
            ),
            (
                RateLimitCategory::Transcribe,
                CategoryLimit::new(10, Duration::from_secs(60)),
            ),
            (
                RateLimitCategory::Api,
                CategoryLimit::new(120, Duration::from_secs(60)),
            ),
        ]);
        Self { limits }
    }
}

impl RateLimitPolicy {
    pub fn limit_for(&self, category: RateLimitCategory) -> CategoryLimit {
        self.limits
            .get(&category)
            .copied()
            .unwrap_or(CategoryLimit::new(60, Duration::from_secs(60)))
    }

    pub fn set(&mut self, category: RateLimitCategory, limit: CategoryLimit) {
        self.limits.insert(category, limit);
    }
}

/// Outcome of a rate-limit check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests left in the current window after this one.
    pub remaining: u32,
    /// End of the current window.
    pub reset_at: Instant,
}

impl RateLimitDecision {
    /// Time until the window resets.
    pub fn retry_after(&self) -> Duration {
        self.reset_at.saturating_duration_since(Instant::now())
    }
}

pub trait RateLimiter: Send + Sync {
    /// Count a request and decide whether it may proceed.
    fn check(&self, identifier: &str, category: RateLimitCategory) -> RateLimitDecision;

    /// Drop windows that have ended. Returns the number removed.
    fn purge_expired(&self) -> usize {
        0
    }
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check(&self, _identifier: &str, _category: RateLimitCategory) -> RateLimitDecision {
        RateLimitDecision {
            allowed: true,
            remaining: u32::MAX,
            reset_at: Instant::now(),
        }
    }
}

#[derive(Debug)]
struct WindowRecord {
    window_start: Instant,
    window: Duration,
    count: u32,
}

impl WindowRecord {
    fn reset_at(&self) -> Instant {
        window_end(self.window_start, self.window)
    }
}

fn window_end(start: Instant, window: Duration) -> Instant {
    start
        .checked_add(window.min(MAX_WINDOW))
        .unwrap_or(start)
}

/// Fixed-window limiter held in process memory.
#[derive(Debug)]
pub struct InMemoryRateLimiter {
    policy: RateLimitPolicy,
    records: Mutex<HashMap<(String, RateLimitCategory), WindowRecord>>,
}

impl InMemoryRateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }
}

impl RateLimiter for InMemoryRateLimiter {
    fn check(&self, identifier: &str, category: RateLimitCategory) -> RateLimitDecision {
        let limit = self.policy.limit_for(category);
        let window = limit.window.min(MAX_WINDOW);
        let now = Instant::now();

        let Ok(mut records) = self.records.lock() else {
            error!(category = category.as_str(), "Rate limiter lock poisoned");
            // Fail closed.
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at: window_end(now, window),
            };
        };

        let record = records
            .entry((identifier.to_string(), category))
            .or_insert(WindowRecord {
                window_start: now,
                window,
                count: 0,
            });

        if now >= record.reset_at() {
            record.window_start = now;
            record.window = window;
            record.count = 0;
        }

        if record.count >= limit.max_requests {
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at: record.reset_at(),
            };
        }

        record.count += 1;
        RateLimitDecision {
            allowed: true,
            remaining: limit.max_requests - record.count,
            reset_at: record.reset_at(),
        }
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let Ok(mut records) = self.records.lock() else {
            return 0;
        };
        let before = records.len();
        records.retain(|_, record| record.reset_at() > now);
        before - records.len()
    }
}

/// Build the counting identifier for a request.
///
/// Per-address categories always use the address. Other categories prefer
/// the authenticated user id so one user cannot starve another sharing an
/// address.
pub fn client_identifier(
    category: RateLimitCategory,
    user: Option<&AuthenticatedUser>,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxies: &[IpAddr],
) -> String {
    if !category.per_address() {
        if let Some(user) = user {
            return format!("user:{}", user.user_id);
        }
    }
    match client_address(headers, peer, trusted_proxies) {
        Some(addr) => format!("ip:{addr}"),
        None => "ip:unknown".to_string(),
    }
}

/// Resolve the client address.
///
/// Forwarding headers are only read when the connecting peer is a trusted
/// proxy. `X-Forwarded-For` is walked from the right, skipping trusted hops,
/// since only entries appended by our own proxies are reliable.
fn client_address(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxies: &[IpAddr],
) -> Option<String> {
    let peer_ip = peer.map(|p| p.ip())?;
    if !trusted_proxies.contains(&peer_ip) {
        return Some(peer_ip.to_string());
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.rsplit(',')
                .map(str::trim)
                .filter(|hop| !hop.is_empty())
                .find(|hop| {
                    hop.parse::<IpAddr>()
                        .map_or(true, |ip| !trusted_proxies.contains(&ip))
                })
        });
    if let Some(addr) = forwarded {
        return Some(addr.to_string());
    }
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(addr) = real_ip {
        return Some(addr.to_string());
    }
    Some(peer_ip.to_string())
}

/// Middleware state binding a limiter to one category.
#[derive(Clone)]
pub struct RateLimitGate {
    limiter: Arc<dyn RateLimiter>,
    category: RateLimitCategory,
    trusted_proxies: Arc<[IpAddr]>,
}

impl RateLimitGate {
    pub fn new(limiter: Arc<dyn RateLimiter>, category: RateLimitCategory) -> Self {
        Self {
            limiter,
            category,
            trusted_proxies: Arc::from(Vec::new()),
        }
    }

    /// Peers whose forwarding headers identify the real client.
    pub fn with_trusted_proxies(mut self, proxies: &[IpAddr]) -> Self {
        self.trusted_proxies = Arc::from(proxies);
        self
    }
}

/// Reject requests over quota with 429 and `Retry-After`.
///
/// ```rust,ignore
/// Router::new()
///     .route("/download", get(download))
///     .route_layer(axum::middleware::from_fn_with_state(
///         RateLimitGate::new(limiter, RateLimitCategory::Download),
///         enforce_rate_limit,
///     ));
/// ```
pub async fn enforce_rate_limit(
    State(gate): State<RateLimitGate>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identifier = client_identifier(
        gate.category,
        request.extensions().get::<AuthenticatedUser>(),
        request.headers(),
        peer,
        &gate.trusted_proxies,
    );

    let decision = gate.limiter.check(&identifier, gate.category);
    if !decision.allowed {
        warn!(
            category = gate.category.as_str(),
            identifier = %identifier,
            "Rate limit exceeded"
        );
        return ApiError::rate_limited(decision.retry_after()).into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn limiter(max: u32, window_secs: u64) -> InMemoryRateLimiter {
        let mut policy = RateLimitPolicy::default();
        policy.set(
            RateLimitCategory::Auth,
            CategoryLimit::new(max, Duration::from_secs(window_secs)),
        );
        InMemoryRateLimiter::new(policy)
    }

    #[tokio::test(start_paused = true)]
    async fn quota_then_reject_then_reset() {
        let limiter = limiter(3, 60);
        let window_end = Instant::now() + Duration::from_secs(60);

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check("ip:1.2.3.4", RateLimitCategory::Auth);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let rejected = limiter.check("ip:1.2.3.4", RateLimitCategory::Auth);
        assert!(!rejected.allowed);
        assert!(rejected.reset_at >= window_end);
        assert_eq!(rejected.retry_after(), Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(limiter.check("ip:1.2.3.4", RateLimitCategory::Auth).allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn identifiers_and_categories_are_independent() {
        let limiter = limiter(1, 60);
        assert!(limiter.check("ip:a", RateLimitCategory::Auth).allowed);
        assert!(!limiter.check("ip:a", RateLimitCategory::Auth).allowed);

        assert!(limiter.check("ip:b", RateLimitCategory::Auth).allowed);
        assert!(limiter.check("ip:a", RateLimitCategory::Download).allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_finished_windows() {
        let limiter = limiter(5, 10);
        limiter.check("ip:a", RateLimitCategory::Auth);
        limiter.check("ip:b", RateLimitCategory::Download);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(limiter.purge_expired(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_windows_are_clamped() {
        let mut policy = RateLimitPolicy::default();
        policy.set(
            RateLimitCategory::Auth,
            CategoryLimit::new(1, Duration::from_secs(u64::MAX)),
        );
        let limiter = InMemoryRateLimiter::new(policy);

        assert!(limiter.check("ip:a", RateLimitCategory::Auth).allowed);
        let rejected = limiter.check("ip:a", RateLimitCategory::Auth);
        assert!(!rejected.allowed);
        assert_eq!(rejected.retry_after(), MAX_WINDOW);

        // Other categories keep working.
        assert!(limiter.check("ip:a", RateLimitCategory::Download).allowed);
    }

    #[test]
    fn concurrent_checks_never_exceed_quota() {
        let limiter = Arc::new(InMemoryRateLimiter::new(RateLimitPolicy::default()));
        let quota = limiter
            .policy()
            .limit_for(RateLimitCategory::Transcribe)
            .max_requests;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..10)
                        .filter(|_| {
                            limiter
                                .check("user:u1", RateLimitCategory::Transcribe)
                                .allowed
                        })
                        .count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, quota as usize);
    }

    #[test]
    fn identifier_prefers_user_except_for_auth() {
        let user = AuthenticatedUser::for_tests("user_1");
        let peer: SocketAddr = "198.51.100.20:5000".parse().unwrap();

        assert_eq!(
            client_identifier(RateLimitCategory::Download, Some(&user), &HeaderMap::new(), Some(peer), &[]),
            "user:user_1"
        );
        assert_eq!(
            client_identifier(RateLimitCategory::Auth, Some(&user), &HeaderMap::new(), Some(peer), &[]),
            "ip:198.51.100.20"
        );
        assert_eq!(
            client_identifier(RateLimitCategory::Api, None, &HeaderMap::new(), None, &[]),
            "ip:unknown"
        );
    }

    #[test]
    fn forwarding_headers_from_untrusted_peers_are_ignored() {
        let peer: SocketAddr = "198.51.100.20:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("9.9.9.9"));
        headers.insert("x-real-ip", HeaderValue::from_static("8.8.8.8"));

        assert_eq!(
            client_identifier(RateLimitCategory::Auth, None, &headers, Some(peer), &[]),
            "ip:198.51.100.20"
        );
        // Headers alone never name the client.
        assert_eq!(
            client_identifier(RateLimitCategory::Auth, None, &headers, None, &[]),
            "ip:unknown"
        );
    }

    #[test]
    fn trusted_proxy_hops_are_skipped_from_the_right() {
        let proxy: IpAddr = "10.0.0.2".parse().unwrap();
        let inner: IpAddr = "10.0.0.3".parse().unwrap();
        let peer = SocketAddr::new(proxy, 443);

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("6.6.6.6, 203.0.113.9, 10.0.0.3"),
        );
        assert_eq!(
            client_identifier(RateLimitCategory::Auth, None, &headers, Some(peer), &[proxy, inner]),
            "ip:203.0.113.9"
        );

        let mut real_ip_only = HeaderMap::new();
        real_ip_only.insert("x-real-ip", HeaderValue::from_static("203.0.113.10"));
        assert_eq!(
            client_identifier(RateLimitCategory::Auth, None, &real_ip_only, Some(peer), &[proxy]),
            "ip:203.0.113.10"
        );

        assert_eq!(
            client_identifier(RateLimitCategory::Auth, None, &HeaderMap::new(), Some(peer), &[proxy]),
            "ip:10.0.0.2"
        );
    }

    #[test]
    fn noop_rate_limiter_allows() {
        assert!(NoopRateLimiter.check("x", RateLimitCategory::Auth).allowed);
    }
}
