// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Relay Sweeper
//!
//! Background task that periodically reclaims expired relay entries and
//! stale rate-limit windows. Expiry is already enforced on read; the sweep
//! only bounds memory.
//!
//! ## Lifecycle
//!
//! Started once at process init with [`RelaySweeper::spawn`] and stopped
//! through its `CancellationToken` during graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::RelayStore;
use crate::config::DEFAULT_SWEEP_INTERVAL;
use crate::security::rate_limit::RateLimiter;

/// Periodic reclamation of expired relay entries.
pub struct RelaySweeper {
    relay: Arc<dyn RelayStore>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    interval: Duration,
}

impl RelaySweeper {
    pub fn new(relay: Arc<dyn RelayStore>) -> Self {
        Self {
            relay,
            rate_limiter: None,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Also purge stale rate-limit windows on each sweep.
    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawn the sweep loop on the current runtime.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Run the sweep loop until the cancellation token is triggered.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Relay sweeper starting"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Relay sweeper shutting down");
                    return;
                }
            }

            self.sweep_step().await;
        }
    }

    /// Execute one sweep.
    async fn sweep_step(&self) {
        match self.relay.sweep().await {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "Relay sweeper: reclaimed expired entries"),
            Err(e) => warn!(error = %e, "Relay sweeper: sweep failed"),
        }

        if let Some(limiter) = &self.rate_limiter {
            let purged = limiter.purge_expired();
            if purged > 0 {
                debug!(purged, "Relay sweeper: purged stale rate-limit windows");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::InMemoryRelayStore;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn sweeps_on_interval_and_stops_on_cancel() {
        let store = Arc::new(InMemoryRelayStore::new());
        store
            .put("k", json!({ "a": 1 }), Duration::from_secs(1))
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let handle = RelaySweeper::new(store.clone())
            .with_interval(Duration::from_secs(60))
            .spawn(shutdown.clone());

        assert_eq!(store.len(), 1);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(store.is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_first_tick_exits_promptly() {
        let store = Arc::new(InMemoryRelayStore::new());
        let shutdown = CancellationToken::new();
        let handle = RelaySweeper::new(store).spawn(shutdown.clone());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
