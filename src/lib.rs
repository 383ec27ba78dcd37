// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embed Auth Bridge - Session Continuity for Embedded Apps
//!
//! This crate gets a valid session from a host page into an app running in
//! its iframe (or back) without leaking credentials to untrusted origins.
//!
//! ## Modules
//!
//! - `api` - HTTP endpoints (Axum): relay, CSRF, session, health
//! - `auth` - Identity provider boundary and JWT verification
//! - `bridge` - Client side: storage tiers, postMessage channel, acquisition
//! - `relay` - One-time credential relay store and its sweeper
//! - `security` - CSRF double-submit guard and rate limiting

pub mod api;
pub mod auth;
pub mod bridge;
pub mod config;
pub mod error;
pub mod models;
pub mod relay;
pub mod security;
pub mod state;
