// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication middleware for Axum.
//!
//! [`identify_user`] resolves the caller once per request and stores the
//! [`AuthenticatedUser`] in request extensions. It never rejects. The
//! `OptionalAuth` extractor and per-user rate limits read the same extension.
//!
//! ```rust,ignore
//! let app = Router::new()
//!     .route("/downloads", get(download))
//!     .layer(axum::middleware::from_fn_with_state(state.clone(), identify_user));
//! ```

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use super::extractor::request_token;
use crate::state::AppState;

/// Attach the authenticated user, when there is one, to the request.
pub async fn identify_user(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Ok(Some(token)) = request_token(request.headers()) {
        match state.identity.verify_token(&token).await {
            Ok(user) => {
                request.extensions_mut().insert(user);
            }
            Err(e) => debug!(reason = e.error_code(), "Request credential not accepted"),
        }
    }
    next.run(request).await
}
