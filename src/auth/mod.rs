// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Consumes the external identity provider and exposes the results to
//! handlers.
//!
//! ## Auth Flow
//!
//! 1. The browser authenticates with the identity provider (popup or
//!    redirect) and returns to `/auth/callback` with a code.
//! 2. The server exchanges the code, sets the session cookie, and parks the
//!    session in the relay under the caller's correlation id so an embedded
//!    frame that cannot read the cookie can collect it once.
//! 3. Later requests carry `Authorization: Bearer <token>` or the session
//!    cookie; [`middleware::identify_user`] verifies either through the
//!    provider.
//!
//! ## Security
//!
//! - JWT verification uses HTTPS-only JWKS fetching with a cached key set
//! - Clock skew tolerance is 60 seconds
//! - Redirect targets are restricted to the app origin

pub mod claims;
pub mod error;
pub mod extractor;
pub mod jwks;
pub mod middleware;
pub mod profile;
pub mod provider;
pub mod redirect;

pub use claims::AuthenticatedUser;
pub use error::AuthError;
pub use extractor::OptionalAuth;
pub use jwks::JwksManager;
pub use provider::{IdentityProvider, JwtIdentityProvider, ProviderSession};

/// Cookie holding the session access token for top-level contexts.
pub const SESSION_COOKIE_NAME: &str = "bridge_session";
