// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Open-redirect protection for post-login redirects.
//!
//! A redirect target is accepted only when it resolves to the app's own
//! origin. Anything else falls back to `/`. Rejected targets are logged
//! truncated and never echoed back.

use tracing::warn;
use url::Url;

/// Fallback when a target is missing or rejected.
pub const DEFAULT_REDIRECT: &str = "/";

const LOGGED_TARGET_MAX: usize = 64;

/// Resolve `target` against `app_origin`, returning a same-origin location.
pub fn safe_redirect(app_origin: &Url, target: Option<&str>) -> String {
    let Some(raw) = target.map(str::trim).filter(|t| !t.is_empty()) else {
        return DEFAULT_REDIRECT.to_string();
    };

    // Protocol-relative and backslash tricks resolve to other hosts.
    if raw.starts_with("//") || raw.starts_with("/\\") || raw.contains('\\') {
        reject(raw);
        return DEFAULT_REDIRECT.to_string();
    }

    let resolved = match app_origin.join(raw) {
        Ok(url) => url,
        Err(_) => {
            reject(raw);
            return DEFAULT_REDIRECT.to_string();
        }
    };

    // Dot segments can normalize into a protocol-relative path.
    if resolved.origin() != app_origin.origin() || resolved.path().starts_with("//") {
        reject(raw);
        return DEFAULT_REDIRECT.to_string();
    }

    if raw.starts_with('/') {
        // Keep relative targets relative.
        let mut location = resolved.path().to_string();
        if let Some(query) = resolved.query() {
            location.push('?');
            location.push_str(query);
        }
        if let Some(fragment) = resolved.fragment() {
            location.push('#');
            location.push_str(fragment);
        }
        location
    } else {
        resolved.to_string()
    }
}

fn reject(raw: &str) {
    let truncated: String = raw.chars().take(LOGGED_TARGET_MAX).collect();
    warn!(target_prefix = %truncated, "Rejected redirect target outside app origin");
}
