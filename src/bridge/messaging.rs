// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cross-window messaging between the embedded app and its host page.
//!
//! Messages are JSON objects `{ type, data?, error? }`:
//!
//! | Type | Direction | Meaning |
//! |------|-----------|---------|
//! | `AUTH_TOKEN` | parent → child | carries a session credential |
//! | `AUTH_COMPLETE` | child → parent (or parent → child) | auth outcome and optional identity |
//! | `CLOSE_IFRAME` | parent → child | host is about to close the frame |
//! | `IFRAME_CLOSED` | child → parent | acknowledgement of `CLOSE_IFRAME` |
//! | `REMOVE_IFRAME` | child → parent | ask the host to remove the frame |
//!
//! The child only ever posts to its direct parent. Incoming events are
//! trusted only when their origin is on the [`OriginPolicy`] allow-list;
//! anything else is dropped without a reply.

use std::{
    collections::HashSet,
    fmt,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::auth::profile::HostIdentity;
use crate::models::SessionCredential;

const INBOX_CAPACITY: usize = 32;

// =============================================================================
// Protocol
// =============================================================================

/// `data` of an `AUTH_TOKEN` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokenData {
    #[serde(flatten)]
    pub credential: SessionCredential,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<HostIdentity>,
}

/// `data` of an `AUTH_COMPLETE` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthCompleteData {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<SessionCredential>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<HostIdentity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeMessage {
    AuthToken {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<AuthTokenData>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    AuthComplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<AuthCompleteData>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    CloseIframe,
    IframeClosed,
    RemoveIframe,
}

impl BridgeMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeMessage::AuthToken { .. } => "AUTH_TOKEN",
            BridgeMessage::AuthComplete { .. } => "AUTH_COMPLETE",
            BridgeMessage::CloseIframe => "CLOSE_IFRAME",
            BridgeMessage::IframeClosed => "IFRAME_CLOSED",
            BridgeMessage::RemoveIframe => "REMOVE_IFRAME",
        }
    }

    /// Whether the message includes an access credential.
    pub fn carries_credential(&self) -> bool {
        match self {
            BridgeMessage::AuthToken { data, .. } => data.is_some(),
            BridgeMessage::AuthComplete { data, .. } => {
                data.as_ref().is_some_and(|d| d.credential.is_some())
            }
            _ => false,
        }
    }

    /// Successful `AUTH_COMPLETE` report to the parent.
    pub fn auth_complete(user: Option<HostIdentity>) -> Self {
        BridgeMessage::AuthComplete {
            data: Some(AuthCompleteData {
                success: true,
                credential: None,
                user,
            }),
            error: None,
        }
    }
}

// =============================================================================
// Origins
// =============================================================================

/// `targetOrigin` of an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOrigin {
    Exact(String),
    /// `"*"`: deliver regardless of the recipient's origin.
    Any,
}

impl TargetOrigin {
    pub fn as_str(&self) -> &str {
        match self {
            TargetOrigin::Exact(origin) => origin,
            TargetOrigin::Any => "*",
        }
    }

    pub fn matches(&self, origin: &str) -> bool {
        match self {
            TargetOrigin::Exact(expected) => normalize_origin(expected) == normalize_origin(origin),
            TargetOrigin::Any => true,
        }
    }
}

impl fmt::Display for TargetOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn normalize_origin(origin: &str) -> &str {
    origin.trim().trim_end_matches('/')
}

/// Allow-list of origins whose messages are trusted. Empty trusts nobody.
#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    allowed: Arc<HashSet<String>>,
}

impl OriginPolicy {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = origins
            .into_iter()
            .map(|o| normalize_origin(o.as_ref()).to_string())
            .filter(|o| !o.is_empty() && o != "*")
            .collect();
        Self {
            allowed: Arc::new(allowed),
        }
    }

    pub fn allows(&self, origin: &str) -> bool {
        self.allowed.contains(normalize_origin(origin))
    }

    /// The single allowed origin, when there is exactly one.
    pub fn sole_origin(&self) -> Option<&str> {
        if self.allowed.len() == 1 {
            self.allowed.iter().next().map(String::as_str)
        } else {
            None
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("window has no parent")]
    NotEmbedded,
    #[error("refusing to send {0} with a wildcard target origin")]
    WildcardForCredential(&'static str),
    #[error("message serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

// =============================================================================
// Resource accounting
// =============================================================================

#[derive(Debug, Default)]
struct ResourceCounts {
    listeners: AtomicUsize,
    timers: AtomicUsize,
}

/// Live listener and timer counts, shared by everything a channel creates.
#[derive(Debug, Clone, Default)]
pub struct ResourceTracker {
    counts: Arc<ResourceCounts>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listeners(&self) -> usize {
        self.counts.listeners.load(Ordering::SeqCst)
    }

    pub fn timers(&self) -> usize {
        self.counts.timers.load(Ordering::SeqCst)
    }

    fn listener_guard(&self) -> TrackedResource {
        self.counts.listeners.fetch_add(1, Ordering::SeqCst);
        TrackedResource {
            counts: self.counts.clone(),
            kind: ResourceKind::Listener,
        }
    }

    /// Count a pending timer until the returned guard drops.
    pub fn timer_guard(&self) -> TrackedResource {
        self.counts.timers.fetch_add(1, Ordering::SeqCst);
        TrackedResource {
            counts: self.counts.clone(),
            kind: ResourceKind::Timer,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ResourceKind {
    Listener,
    Timer,
}

/// Decrements its counter on drop.
#[derive(Debug)]
pub struct TrackedResource {
    counts: Arc<ResourceCounts>,
    kind: ResourceKind,
}

impl Drop for TrackedResource {
    fn drop(&mut self) {
        let counter = match self.kind {
            ResourceKind::Listener => &self.counts.listeners,
            ResourceKind::Timer => &self.counts.timers,
        };
        counter.fetch_sub(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Windows
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(u64);

impl WindowId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        WindowId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A received `message` event: sender origin plus raw data.
#[derive(Debug, Clone)]
pub struct IncomingEvent {
    pub origin: String,
    pub data: Value,
}

/// The browsing context the app runs in.
pub trait HostWindow: Send + Sync {
    fn id(&self) -> WindowId;

    /// Same as [`id`](Self::id) for a top-level window.
    fn parent_id(&self) -> WindowId;

    /// Post `data` to the direct parent.
    fn post_to_parent(&self, data: Value, target: &TargetOrigin) -> Result<(), ChannelError>;

    /// Receive `message` events addressed to this window.
    fn subscribe(&self) -> broadcast::Receiver<IncomingEvent>;
}

/// In-process window tree.
///
/// Delivery follows `postMessage`: a message whose target origin does not
/// match the recipient is dropped, and a message sent while nobody listens
/// is lost.
pub struct InProcessWindow {
    id: WindowId,
    origin: String,
    inbox: broadcast::Sender<IncomingEvent>,
    parent: Option<Arc<InProcessWindow>>,
}

impl InProcessWindow {
    pub fn top_level(origin: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::build(origin.into(), None))
    }

    pub fn embedded_in(parent: &Arc<InProcessWindow>, origin: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::build(origin.into(), Some(parent.clone())))
    }

    fn build(origin: String, parent: Option<Arc<InProcessWindow>>) -> Self {
        let (inbox, _) = broadcast::channel(INBOX_CAPACITY);
        Self {
            id: WindowId::next(),
            origin,
            inbox,
            parent,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Deliver a message to this window as if posted by `source_origin`.
    pub fn post_message(&self, source_origin: &str, data: Value, target: &TargetOrigin) {
        if !target.matches(&self.origin) {
            trace!(target = %target, "Target origin mismatch, message dropped");
            return;
        }
        let event = IncomingEvent {
            origin: source_origin.to_string(),
            data,
        };
        if self.inbox.send(event).is_err() {
            trace!("No listener attached, message dropped");
        }
    }
}

impl HostWindow for InProcessWindow {
    fn id(&self) -> WindowId {
        self.id
    }

    fn parent_id(&self) -> WindowId {
        self.parent.as_ref().map_or(self.id, |p| p.id)
    }

    fn post_to_parent(&self, data: Value, target: &TargetOrigin) -> Result<(), ChannelError> {
        let parent = self.parent.as_ref().ok_or(ChannelError::NotEmbedded)?;
        parent.post_message(&self.origin, data, target);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<IncomingEvent> {
        self.inbox.subscribe()
    }
}

/// True when the window's parent is a different window.
pub fn is_embedded(window: &dyn HostWindow) -> bool {
    window.id() != window.parent_id()
}

// =============================================================================
// Channel
// =============================================================================

/// Typed messaging with the parent window.
#[derive(Clone)]
pub struct MessageChannel {
    window: Arc<dyn HostWindow>,
    policy: OriginPolicy,
    parent_target: TargetOrigin,
    allow_wildcard_for_credentials: bool,
    tracker: ResourceTracker,
}

impl MessageChannel {
    /// Channel trusting `policy`. Messages target the sole allowed origin, or
    /// `*` when the allow-list has several entries.
    pub fn new(window: Arc<dyn HostWindow>, policy: OriginPolicy) -> Self {
        let parent_target = policy
            .sole_origin()
            .map_or(TargetOrigin::Any, |o| TargetOrigin::Exact(o.to_string()));
        Self {
            window,
            policy,
            parent_target,
            allow_wildcard_for_credentials: false,
            tracker: ResourceTracker::new(),
        }
    }

    pub fn with_parent_target(mut self, target: TargetOrigin) -> Self {
        self.parent_target = target;
        self
    }

    /// Accept the risk of posting credentials with a `*` target origin.
    ///
    /// Any page that navigates the parent frame can then read the token.
    pub fn allow_wildcard_for_credentials(mut self) -> Self {
        warn!("Credential messages may be posted with a wildcard target origin");
        self.allow_wildcard_for_credentials = true;
        self
    }

    pub fn with_tracker(mut self, tracker: ResourceTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    pub fn is_embedded(&self) -> bool {
        is_embedded(self.window.as_ref())
    }

    /// Post `message` to the parent window.
    pub fn send(&self, message: &BridgeMessage) -> Result<(), ChannelError> {
        if !self.is_embedded() {
            return Err(ChannelError::NotEmbedded);
        }
        if self.parent_target == TargetOrigin::Any
            && message.carries_credential()
            && !self.allow_wildcard_for_credentials
        {
            return Err(ChannelError::WildcardForCredential(message.kind()));
        }
        let data = serde_json::to_value(message)?;
        debug!(kind = message.kind(), target = %self.parent_target, "Posting to parent");
        self.window.post_to_parent(data, &self.parent_target)
    }

    /// Attach a listener. It detaches when dropped.
    pub fn listen(&self) -> MessageListener {
        MessageListener {
            receiver: self.window.subscribe(),
            policy: self.policy.clone(),
            _guard: self.tracker.listener_guard(),
        }
    }

    /// Answer lifecycle requests from the parent. Returns whether `message`
    /// was a lifecycle message.
    pub fn handle_lifecycle(&self, message: &BridgeMessage) -> Result<bool, ChannelError> {
        match message {
            BridgeMessage::CloseIframe => {
                self.send(&BridgeMessage::IframeClosed)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Ask the parent to remove this frame.
    pub fn request_removal(&self) -> Result<(), ChannelError> {
        self.send(&BridgeMessage::RemoveIframe)
    }
}

/// An attached `message` listener.
pub struct MessageListener {
    receiver: broadcast::Receiver<IncomingEvent>,
    policy: OriginPolicy,
    _guard: TrackedResource,
}

impl MessageListener {
    /// Next trusted, well-formed message. `None` once the window is gone.
    pub async fn recv(&mut self) -> Option<BridgeMessage> {
        loop {
            let event = match self.receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Message listener lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            };

            if !self.policy.allows(&event.origin) {
                trace!(origin = %event.origin, "Ignoring message from untrusted origin");
                continue;
            }
            match serde_json::from_value::<BridgeMessage>(event.data) {
                Ok(message) => return Some(message),
                Err(e) => debug!(error = %e, "Ignoring unrecognized message"),
            }
        }
    }
}
