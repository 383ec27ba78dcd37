// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session acquisition for an embedded app.
//!
//! On mount the state starts at [`AcquisitionState::Checking`] and settles
//! exactly once on `Authenticated` or `Unauthenticated`. The first method to
//! succeed wins; events that arrive after the state settled are discarded by
//! [`StateCell::settle`], which refuses every transition out of a terminal
//! state.
//!
//! Each mount owns one task. Unmounting (or dropping the [`MountHandle`])
//! cancels it, which drops its listener and timer.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messaging::{
    AuthCompleteData, AuthTokenData, BridgeMessage, HostWindow, MessageChannel, MessageListener,
    OriginPolicy,
};
use super::storage::TokenStorage;
use crate::auth::{
    profile::{HostIdentity, ProfileSource},
    AuthError, IdentityProvider,
};
use crate::config::{AppConfig, DEFAULT_IFRAME_AUTH_TIMEOUT};
use crate::models::{SessionCredential, UserProfile};

/// Where a session came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionSource {
    ExistingSession,
    Storage,
    ParentMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredSession {
    pub source: AcquisitionSource,
    pub credential: SessionCredential,
    pub user: Option<UserProfile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionState {
    Checking,
    Authenticated(AcquiredSession),
    Unauthenticated,
}

impl AcquisitionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AcquisitionState::Checking)
    }

    fn label(&self) -> &'static str {
        match self {
            AcquisitionState::Checking => "checking",
            AcquisitionState::Authenticated(_) => "authenticated",
            AcquisitionState::Unauthenticated => "unauthenticated",
        }
    }
}

/// Existing-session check against the identity provider.
#[async_trait]
pub trait SessionProbe: Send + Sync {
    async fn existing_session(&self) -> Result<Option<AcquiredSession>, AuthError>;
}

/// Probe asking an [`IdentityProvider`] about a token the app already holds
/// (for example one read from a first-party cookie).
pub struct ProviderSessionProbe {
    provider: Arc<dyn IdentityProvider>,
    token: Option<String>,
}

impl ProviderSessionProbe {
    pub fn new(provider: Arc<dyn IdentityProvider>, token: Option<String>) -> Self {
        Self { provider, token }
    }
}

#[async_trait]
impl SessionProbe for ProviderSessionProbe {
    async fn existing_session(&self) -> Result<Option<AcquiredSession>, AuthError> {
        let Some(token) = self.token.as_deref() else {
            return Ok(None);
        };
        let session = self.provider.get_session(token).await?;
        Ok(session
            .filter(|s| s.credential.is_usable())
            .map(|s| AcquiredSession {
                source: AcquisitionSource::ExistingSession,
                credential: s.credential,
                user: Some(s.user),
            }))
    }
}

/// Monotonic state holder.
struct StateCell {
    tx: watch::Sender<AcquisitionState>,
}

impl StateCell {
    fn new() -> Self {
        let (tx, _) = watch::channel(AcquisitionState::Checking);
        Self { tx }
    }

    /// Move from `Checking` to `next`. Returns false, and leaves the state
    /// untouched, if the state has already settled.
    fn settle(&self, next: AcquisitionState) -> bool {
        let label = next.label();
        let applied = self.tx.send_if_modified(|current| {
            if current.is_terminal() || !next.is_terminal() {
                return false;
            }
            *current = next;
            true
        });
        if applied {
            info!(state = label, "Auth acquisition settled");
        } else {
            debug!(event = label, "Discarding late acquisition event");
        }
        applied
    }
}

/// Boot-time session acquisition for the embedded app.
#[derive(Clone)]
pub struct AuthAcquisition {
    channel: MessageChannel,
    storage: Arc<TokenStorage>,
    probe: Option<Arc<dyn SessionProbe>>,
    timeout: Duration,
}

impl AuthAcquisition {
    pub fn new(channel: MessageChannel, storage: Arc<TokenStorage>) -> Self {
        Self {
            channel,
            storage,
            probe: None,
            timeout: DEFAULT_IFRAME_AUTH_TIMEOUT,
        }
    }

    /// Acquisition for `window`, trusting the configured parent origins and
    /// waiting `IFRAME_AUTH_TIMEOUT_MS` for their credentials.
    pub fn from_config(
        window: Arc<dyn HostWindow>,
        storage: Arc<TokenStorage>,
        config: &AppConfig,
    ) -> Self {
        let channel = MessageChannel::new(window, OriginPolicy::new(&config.allowed_parent_origins));
        Self::new(channel, storage).with_timeout(config.iframe_auth_timeout)
    }

    pub fn with_probe(mut self, probe: Arc<dyn SessionProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Deadline for the parent to send credentials.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Start acquisition. Not-embedded windows settle immediately.
    pub fn mount(&self) -> MountHandle {
        let cell = Arc::new(StateCell::new());
        let state = cell.tx.subscribe();
        let cancel = CancellationToken::new();

        if !self.channel.is_embedded() {
            debug!("Top-level window, no bridging needed");
            cell.settle(AcquisitionState::Unauthenticated);
            return MountHandle {
                state,
                cancel,
                task: None,
                _cell: cell,
            };
        }

        let task = {
            let this = self.clone();
            let cell = cell.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => debug!("Auth acquisition cancelled"),
                    outcome = this.acquire() => {
                        cell.settle(outcome);
                    }
                }
            })
        };

        MountHandle {
            state,
            cancel,
            task: Some(task),
            _cell: cell,
        }
    }

    async fn acquire(&self) -> AcquisitionState {
        if let Some(probe) = &self.probe {
            match probe.existing_session().await {
                Ok(Some(session)) => return AcquisitionState::Authenticated(session),
                Ok(None) => debug!("No existing session"),
                Err(e) => warn!(error = %e, "Existing-session check failed"),
            }
        }

        if let Some(credential) = self.storage.load() {
            return AcquisitionState::Authenticated(AcquiredSession {
                source: AcquisitionSource::Storage,
                credential,
                user: None,
            });
        }

        self.await_parent().await
    }

    /// Wait for the parent to hand over credentials, up to the deadline.
    async fn await_parent(&self) -> AcquisitionState {
        let mut listener = self.channel.listen();
        let timer = self.channel.tracker().timer_guard();
        debug!(timeout_ms = self.timeout.as_millis() as u64, "Waiting for parent credentials");

        let outcome = tokio::select! {
            session = self.next_session(&mut listener) => session,
            _ = tokio::time::sleep(self.timeout) => {
                info!("No credentials from parent before deadline");
                None
            }
        };

        // Detach before settling so nothing arrives after the verdict.
        drop(listener);
        drop(timer);

        match outcome {
            Some(session) => {
                if let Err(e) = self.storage.save(&session.credential) {
                    warn!(error = %e, "Could not persist relayed credential");
                }
                let report = BridgeMessage::auth_complete(session.user.as_ref().map(HostIdentity::from));
                if let Err(e) = self.channel.send(&report) {
                    warn!(error = %e, "Could not report AUTH_COMPLETE to parent");
                }
                AcquisitionState::Authenticated(session)
            }
            None => AcquisitionState::Unauthenticated,
        }
    }

    async fn next_session(&self, listener: &mut MessageListener) -> Option<AcquiredSession> {
        while let Some(message) = listener.recv().await {
            match self.channel.handle_lifecycle(&message) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "Lifecycle reply failed");
                    continue;
                }
            }
            if let Some(session) = session_from_message(message) {
                return Some(session);
            }
        }
        // Window gone; let the deadline decide.
        std::future::pending().await
    }
}

/// Credential carried by a successful auth message.
fn session_from_message(message: BridgeMessage) -> Option<AcquiredSession> {
    let (credential, user) = match message {
        BridgeMessage::AuthToken {
            data: Some(AuthTokenData { credential, user }),
            error: None,
        } => (credential, user),
        BridgeMessage::AuthComplete {
            data:
                Some(AuthCompleteData {
                    success: true,
                    credential: Some(credential),
                    user,
                }),
            error: None,
        } => (credential, user),
        other => {
            debug!(kind = other.kind(), "Message carries no usable credential");
            return None;
        }
    };

    if !credential.is_usable() {
        debug!("Parent sent an expired credential");
        return None;
    }
    Some(AcquiredSession {
        source: AcquisitionSource::ParentMessage,
        credential,
        user: user.map(|u| ProfileSource::Host(u).normalize()),
    })
}

/// A mounted acquisition.
pub struct MountHandle {
    state: watch::Receiver<AcquisitionState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    _cell: Arc<StateCell>,
}

impl MountHandle {
    pub fn state(&self) -> AcquisitionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AcquisitionState> {
        self.state.clone()
    }

    /// Wait for the terminal state.
    pub async fn settled(&mut self) -> AcquisitionState {
        if let Ok(state) = self.state.wait_for(AcquisitionState::is_terminal).await {
            return state.clone();
        }
        self.state()
    }

    /// Cancel acquisition and wait for its task to release resources.
    pub async fn unmount(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Auth acquisition task failed");
            }
        }
    }
}

impl Drop for MountHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::session::test_support::{stub, GOOD_TOKEN};
    use crate::bridge::messaging::{HostWindow, IncomingEvent, InProcessWindow, OriginPolicy, TargetOrigin};
    use serde_json::{json, Value};
    use tokio::sync::broadcast;

    const HOST: &str = "https://crm.example.com";
    const APP: &str = "https://app.example.com";

    struct Fixture {
        child: Arc<InProcessWindow>,
        parent_rx: broadcast::Receiver<IncomingEvent>,
        storage: Arc<TokenStorage>,
        acquisition: AuthAcquisition,
    }

    fn embedded() -> Fixture {
        let parent = InProcessWindow::top_level(HOST);
        let child = InProcessWindow::embedded_in(&parent, APP);
        let parent_rx = parent.subscribe();
        let storage = Arc::new(TokenStorage::memory_only());
        let channel = MessageChannel::new(child.clone(), OriginPolicy::new([HOST]));
        let acquisition = AuthAcquisition::new(channel, storage.clone());
        Fixture {
            child,
            parent_rx,
            storage,
            acquisition,
        }
    }

    fn future_expiry() -> i64 {
        chrono::Utc::now().timestamp() + 600
    }

    fn auth_token(token: &str) -> Value {
        json!({
            "type": "AUTH_TOKEN",
            "data": {
                "accessToken": token,
                "expiresAt": future_expiry(),
                "user": { "userId": "u1", "userName": "Ada", "locationId": "loc_9" }
            }
        })
    }

    /// Let spawned tasks run until they block.
    async fn settle_tasks() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn top_level_window_is_unauthenticated_immediately() {
        let window = InProcessWindow::top_level(APP);
        let channel = MessageChannel::new(window, OriginPolicy::new([HOST]));
        let handle = AuthAcquisition::new(channel.clone(), Arc::new(TokenStorage::memory_only())).mount();

        assert_eq!(handle.state(), AcquisitionState::Unauthenticated);
        assert_eq!(channel.tracker().listeners(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn existing_session_wins_first() {
        let fx = embedded();
        let probe = ProviderSessionProbe::new(stub(), Some(GOOD_TOKEN.to_string()));
        let mut handle = fx.acquisition.clone().with_probe(Arc::new(probe)).mount();

        match handle.settled().await {
            AcquisitionState::Authenticated(session) => {
                assert_eq!(session.source, AcquisitionSource::ExistingSession);
                assert_eq!(session.credential.access_token, GOOD_TOKEN);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(fx.acquisition.channel.tracker().listeners(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stored_credential_is_used_when_no_session() {
        let fx = embedded();
        fx.storage
            .save(&SessionCredential {
                access_token: "stored".into(),
                refresh_token: None,
                expires_at: future_expiry(),
            })
            .unwrap();

        let probe = ProviderSessionProbe::new(stub(), Some("expired".to_string()));
        let mut handle = fx.acquisition.clone().with_probe(Arc::new(probe)).mount();

        match handle.settled().await {
            AcquisitionState::Authenticated(session) => {
                assert_eq!(session.source, AcquisitionSource::Storage);
                assert_eq!(session.credential.access_token, "stored");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn parent_message_authenticates_and_is_acknowledged() {
        let mut fx = embedded();
        let mut handle = fx.acquisition.mount();
        settle_tasks().await;
        assert_eq!(handle.state(), AcquisitionState::Checking);
        assert_eq!(fx.acquisition.channel.tracker().listeners(), 1);
        assert_eq!(fx.acquisition.channel.tracker().timers(), 1);

        fx.child.post_message(HOST, auth_token("from-parent"), &TargetOrigin::Any);

        match handle.settled().await {
            AcquisitionState::Authenticated(session) => {
                assert_eq!(session.source, AcquisitionSource::ParentMessage);
                let user = session.user.unwrap();
                assert_eq!(user.display_name.as_deref(), Some("Ada"));
                assert_eq!(user.tenant_id.as_deref(), Some("loc_9"));
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(fx.storage.load().unwrap().access_token, "from-parent");
        let report = fx.parent_rx.recv().await.unwrap();
        assert_eq!(report.origin, APP);
        assert_eq!(report.data["type"], "AUTH_COMPLETE");
        assert_eq!(report.data["data"]["success"], true);
        assert!(report.data["data"].get("credential").is_none());

        settle_tasks().await;
        assert_eq!(fx.acquisition.channel.tracker().listeners(), 0);
        assert_eq!(fx.acquisition.channel.tracker().timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn untrusted_origin_cannot_authenticate() {
        let fx = embedded();
        let mut handle = fx.acquisition.mount();
        settle_tasks().await;

        fx.child
            .post_message("https://evil.example.com", auth_token("stolen"), &TargetOrigin::Any);
        settle_tasks().await;
        assert_eq!(handle.state(), AcquisitionState::Checking);

        assert_eq!(handle.settled().await, AcquisitionState::Unauthenticated);
        assert!(fx.storage.load().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_terminal_and_late_messages_are_ignored() {
        let fx = embedded();
        let mut handle = fx.acquisition.clone().with_timeout(Duration::from_millis(3000)).mount();
        settle_tasks().await;

        tokio::time::advance(Duration::from_millis(2999)).await;
        settle_tasks().await;
        assert_eq!(handle.state(), AcquisitionState::Checking);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(handle.settled().await, AcquisitionState::Unauthenticated);

        fx.child.post_message(HOST, auth_token("late"), &TargetOrigin::Any);
        settle_tasks().await;
        assert_eq!(handle.state(), AcquisitionState::Unauthenticated);
        assert!(fx.storage.load().is_none());
        assert_eq!(fx.acquisition.channel.tracker().listeners(), 0);
        assert_eq!(fx.acquisition.channel.tracker().timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn configured_origins_and_deadline_are_applied() {
        let config = AppConfig {
            allowed_parent_origins: vec![HOST.to_string()],
            iframe_auth_timeout: Duration::from_millis(500),
            ..AppConfig::default()
        };
        let parent = InProcessWindow::top_level(HOST);
        let child = InProcessWindow::embedded_in(&parent, APP);
        let acquisition = AuthAcquisition::from_config(
            child.clone(),
            Arc::new(TokenStorage::memory_only()),
            &config,
        );
        assert_eq!(acquisition.timeout, Duration::from_millis(500));

        let mut handle = acquisition.mount();
        settle_tasks().await;
        tokio::time::advance(Duration::from_millis(499)).await;
        settle_tasks().await;
        assert_eq!(handle.state(), AcquisitionState::Checking);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(handle.settled().await, AcquisitionState::Unauthenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn configured_parent_can_authenticate() {
        let config = AppConfig {
            allowed_parent_origins: vec![HOST.to_string()],
            ..AppConfig::default()
        };
        let parent = InProcessWindow::top_level(HOST);
        let child = InProcessWindow::embedded_in(&parent, APP);
        let mut handle = AuthAcquisition::from_config(
            child.clone(),
            Arc::new(TokenStorage::memory_only()),
            &config,
        )
        .mount();
        settle_tasks().await;

        child.post_message(HOST, auth_token("configured"), &TargetOrigin::Any);
        assert!(matches!(handle.settled().await, AcquisitionState::Authenticated(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn close_request_is_answered_while_waiting() {
        let mut fx = embedded();
        let handle = fx.acquisition.mount();
        settle_tasks().await;

        fx.child.post_message(HOST, json!({ "type": "CLOSE_IFRAME" }), &TargetOrigin::Any);
        settle_tasks().await;

        let reply = fx.parent_rx.recv().await.unwrap();
        assert_eq!(reply.data, json!({ "type": "IFRAME_CLOSED" }));
        assert_eq!(handle.state(), AcquisitionState::Checking);
        handle.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_auth_complete_keeps_waiting() {
        let fx = embedded();
        let mut handle = fx.acquisition.mount();
        settle_tasks().await;

        fx.child.post_message(
            HOST,
            json!({ "type": "AUTH_COMPLETE", "data": { "success": false }, "error": "denied" }),
            &TargetOrigin::Any,
        );
        settle_tasks().await;
        assert_eq!(handle.state(), AcquisitionState::Checking);

        fx.child.post_message(HOST, auth_token("second-try"), &TargetOrigin::Any);
        assert!(matches!(handle.settled().await, AcquisitionState::Authenticated(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_mounts_leave_no_listeners_or_timers() {
        let fx = embedded();
        let tracker = fx.acquisition.channel.tracker().clone();

        for _ in 0..25 {
            let handle = fx.acquisition.mount();
            settle_tasks().await;
            assert_eq!(tracker.listeners(), 1);
            handle.unmount().await;
            assert_eq!(tracker.listeners(), 0);
            assert_eq!(tracker.timers(), 0);
        }

        // Dropping without unmount also releases everything.
        for _ in 0..25 {
            drop(fx.acquisition.mount());
        }
        settle_tasks().await;
        assert_eq!(tracker.listeners(), 0);
        assert_eq!(tracker.timers(), 0);
    }

    #[test]
    fn settled_state_rejects_further_transitions() {
        let cell = StateCell::new();
        let rx = cell.tx.subscribe();
        assert!(!cell.settle(AcquisitionState::Checking));
        assert!(cell.settle(AcquisitionState::Unauthenticated));
        assert!(!cell.settle(AcquisitionState::Authenticated(AcquiredSession {
            source: AcquisitionSource::ParentMessage,
            credential: SessionCredential {
                access_token: "late".into(),
                refresh_token: None,
                expires_at: i64::MAX,
            },
            user: None,
        })));
        assert_eq!(*rx.borrow(), AcquisitionState::Unauthenticated);
    }
}
