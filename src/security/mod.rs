// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Request-Layer Defenses
//!
//! - `csrf` - double-submit CSRF tokens (cookie + `x-csrf-token` header)
//! - `rate_limit` - per-category fixed-window request quotas
//!
//! Both answer yes/no questions; handlers and extractors decide how to reject.

pub mod csrf;
pub mod rate_limit;

use axum::http::{header::COOKIE, HeaderMap};

pub use csrf::{CsrfGuard, CsrfProtected};
pub use rate_limit::{InMemoryRateLimiter, RateLimitCategory, RateLimiter};

/// Read a cookie value from the request `Cookie` header(s).
pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                continue;
            };
            if key.trim() == name {
                return Some(val.trim().to_string());
            }
        }
    }
    None
}
