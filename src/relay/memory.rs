// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Single-process relay store.
//!
//! Entries live in a mutex-guarded map; `get` removes under the same lock it
//! checks expiry with, so a payload can be taken at most once. Entries do not
//! survive a restart and are not shared between instances.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{validate_input, MissReason, RelayError, RelayStore, MAX_RELAY_TTL};

struct RelayEntry {
    payload: Value,
    expires_at: Instant,
}

/// In-memory [`RelayStore`].
#[derive(Default)]
pub struct InMemoryRelayStore {
    entries: Mutex<HashMap<String, RelayEntry>>,
}

impl InMemoryRelayStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, RelayEntry>>, RelayError> {
        self.entries
            .lock()
            .map_err(|_| RelayError::Backend("relay map lock poisoned".to_string()))
    }

    fn take(&self, key: &str) -> Result<Result<Value, MissReason>, RelayError> {
        let mut entries = self.lock()?;
        let Some(entry) = entries.remove(key) else {
            return Ok(Err(MissReason::Absent));
        };
        if Instant::now() >= entry.expires_at {
            return Ok(Err(MissReason::Expired));
        }
        Ok(Ok(entry.payload))
    }
}

#[async_trait]
impl RelayStore for InMemoryRelayStore {
    async fn put(&self, key: &str, payload: Value, ttl: Duration) -> Result<(), RelayError> {
        validate_input(key, &payload)?;
        let ttl = ttl.min(MAX_RELAY_TTL);
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).unwrap_or(now);
        let replaced = self
            .lock()?
            .insert(key.to_string(), RelayEntry { payload, expires_at })
            .is_some();
        info!(
            key,
            ttl_secs = ttl.as_secs(),
            replaced,
            "Relay entry stored"
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, RelayError> {
        match self.take(key)? {
            Ok(payload) => {
                info!(key, "Relay entry retrieved");
                Ok(Some(payload))
            }
            Err(reason) => {
                debug!(key, ?reason, "Relay lookup missed");
                Ok(None)
            }
        }
    }

    async fn sweep(&self) -> Result<usize, RelayError> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        Ok(before - entries.len())
    }
}
