// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Embedded Client Bridge
//!
//! Client-side half of the bridge, run by the app when it boots inside a
//! host page's iframe.
//!
//! ## Modules
//!
//! - `storage` - credential persistence across memory, tab and durable tiers
//! - `messaging` - typed `postMessage` protocol with the parent window
//! - `acquisition` - the boot-time state machine that finds a session
//!
//! ## Flow
//!
//! ```text
//! mount ──► embedded? ──no──► Unauthenticated
//!              │yes
//!              ▼
//!     existing session? ──yes──► Authenticated
//!              │no
//!              ▼
//!       stored credential? ──yes──► Authenticated
//!              │no
//!              ▼
//!   AUTH_TOKEN before deadline? ──yes──► Authenticated (+ AUTH_COMPLETE)
//!              │no
//!              ▼
//!        Unauthenticated
//! ```

pub mod acquisition;
pub mod messaging;
pub mod storage;

pub use acquisition::{
    AcquiredSession, AcquisitionSource, AcquisitionState, AuthAcquisition, MountHandle,
    ProviderSessionProbe, SessionProbe,
};
pub use messaging::{
    BridgeMessage, ChannelError, HostWindow, InProcessWindow, MessageChannel, MessageListener,
    OriginPolicy, ResourceTracker, TargetOrigin,
};
pub use storage::{FileBackend, KeyValueBackend, MemoryBackend, StorageError, StorageScope, TokenStorage};
