// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Credential Relay
//!
//! Short-lived, one-time-use key/payload storage used to hand a session from
//! one browsing context to another when the two cannot message each other
//! directly (for example across an OAuth redirect in a popup).
//!
//! ## Guarantees
//!
//! - A key maps to at most one live entry; `put` overwrites.
//! - `get` removes the entry it returns. Two concurrent readers of the same
//!   key never both observe the payload.
//! - Expired entries are invisible to `get` even before the sweeper reclaims
//!   them.
//! - Absent, consumed and expired keys all look the same to callers.
//!
//! The store is consumed through the [`RelayStore`] trait so a shared TTL
//! key-value engine can replace [`InMemoryRelayStore`] when the service runs
//! as more than one instance.

pub mod memory;
pub mod sweeper;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

pub use memory::InMemoryRelayStore;
pub use sweeper::RelaySweeper;

/// Upper bound on an entry's lifetime. Longer TTLs are clamped.
pub const MAX_RELAY_TTL: Duration = Duration::from_secs(60 * 60);

/// Relay store errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Relay input invalid: {0}")]
    InvalidInput(&'static str),
    #[error("Relay backend failure: {0}")]
    Backend(String),
}

/// Why a lookup returned nothing. Only used for internal logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    Absent,
    Expired,
}

/// One-time relay storage.
#[async_trait]
pub trait RelayStore: Send + Sync {
    /// Store `payload` under `key` for `ttl`, replacing any existing entry.
    async fn put(&self, key: &str, payload: Value, ttl: Duration) -> Result<(), RelayError>;

    /// Take the payload for `key` if it is present and unexpired.
    async fn get(&self, key: &str) -> Result<Option<Value>, RelayError>;

    /// Drop expired entries and return how many were removed.
    async fn sweep(&self) -> Result<usize, RelayError>;
}

/// Reject empty keys and `null` payloads.
pub(crate) fn validate_input(key: &str, payload: &Value) -> Result<(), RelayError> {
    if key.trim().is_empty() {
        return Err(RelayError::InvalidInput("key is required"));
    }
    if payload.is_null() {
        return Err(RelayError::InvalidInput("payload is required"));
    }
    Ok(())
}
