// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Credential storage with tiered fallback.
//!
//! Tiers are consulted fastest first:
//!
//! 1. **Memory** - owned by this [`TokenStorage`], gone on reload
//! 2. **Session** - tab-scoped, survives reload, not shared across tabs
//! 3. **Durable** - survives restarts; only used when the backend reports
//!    partitioned storage, so the credential is not readable from other
//!    top-level sites embedding the same origin
//!
//! Writes go to every tier. A failing tier is logged and skipped.

use std::{
    collections::HashMap,
    fs::{self, File},
    io::{BufWriter, ErrorKind, Write},
    path::PathBuf,
    sync::{Arc, Mutex},
};

use tracing::{debug, info, warn};

use crate::models::SessionCredential;

/// Key the credential is stored under in every tier.
pub const CREDENTIAL_KEY: &str = "bridge.credential";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("credential serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("no storage tier accepted the write")]
    AllTiersFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageScope {
    Memory,
    Session,
    Durable,
}

impl StorageScope {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageScope::Memory => "memory",
            StorageScope::Session => "session",
            StorageScope::Durable => "durable",
        }
    }
}

/// String key-value store backing one tier.
pub trait KeyValueBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Whether the platform offers this kind of storage to an embedded frame.
    fn is_supported(&self) -> bool {
        true
    }
}

/// Map-backed store.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".into()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".into()))?;
        entries.remove(key);
        Ok(())
    }
}

/// One JSON file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
    partitioned: bool,
}

impl FileBackend {
    /// Partitioned file store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            partitioned: true,
        }
    }

    /// Mark the store as shared between top-level sites. Such a store is
    /// never used as a credential tier.
    pub fn unpartitioned(mut self) -> Self {
        self.partitioned = false;
        self
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
            && !key.starts_with('.');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)?) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir)?;

        // Write to a temp file, then rename
        let temp_path = path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&temp_path)?);
            writer.write_all(value.as_bytes())?;
            writer.flush()?;
        }
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)?) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn is_supported(&self) -> bool {
        self.partitioned
    }
}

struct Tier {
    scope: StorageScope,
    backend: Arc<dyn KeyValueBackend>,
}

/// Ordered credential store.
pub struct TokenStorage {
    tiers: Vec<Tier>,
}

impl TokenStorage {
    /// Memory tier plus the tab-scoped `session` backend.
    pub fn new(session: Arc<dyn KeyValueBackend>) -> Self {
        Self {
            tiers: vec![
                Tier {
                    scope: StorageScope::Memory,
                    backend: Arc::new(MemoryBackend::new()),
                },
                Tier {
                    scope: StorageScope::Session,
                    backend: session,
                },
            ],
        }
    }

    /// Memory tier only.
    pub fn memory_only() -> Self {
        Self {
            tiers: vec![Tier {
                scope: StorageScope::Memory,
                backend: Arc::new(MemoryBackend::new()),
            }],
        }
    }

    /// Append a durable tier if the backend supports partitioned storage.
    pub fn with_durable(mut self, backend: Arc<dyn KeyValueBackend>) -> Self {
        if backend.is_supported() {
            self.tiers.push(Tier {
                scope: StorageScope::Durable,
                backend,
            });
        } else {
            info!("Durable storage is not partitioned, skipping tier");
        }
        self
    }

    /// Active tiers in lookup order.
    pub fn scopes(&self) -> Vec<StorageScope> {
        self.tiers.iter().map(|t| t.scope).collect()
    }

    /// Write the credential to every tier.
    ///
    /// Succeeds if at least one tier accepted it.
    pub fn save(&self, credential: &SessionCredential) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(credential)?;
        let mut stored = 0;
        for tier in &self.tiers {
            match tier.backend.set(CREDENTIAL_KEY, &encoded) {
                Ok(()) => stored += 1,
                Err(e) => warn!(tier = tier.scope.as_str(), error = %e, "Credential write failed"),
            }
        }
        if stored == 0 {
            return Err(StorageError::AllTiersFailed);
        }
        debug!(tiers = stored, "Credential saved");
        Ok(())
    }

    /// First usable credential, searching tiers in order.
    ///
    /// Expired or unreadable entries are removed from the tier holding them.
    /// A hit below the memory tier is copied into memory.
    pub fn load(&self) -> Option<SessionCredential> {
        for (index, tier) in self.tiers.iter().enumerate() {
            let raw = match tier.backend.get(CREDENTIAL_KEY) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!(tier = tier.scope.as_str(), error = %e, "Credential read failed");
                    continue;
                }
            };

            match serde_json::from_str::<SessionCredential>(&raw) {
                Ok(credential) if credential.is_usable() => {
                    debug!(tier = tier.scope.as_str(), "Credential loaded");
                    if index > 0 {
                        self.promote(&raw);
                    }
                    return Some(credential);
                }
                Ok(_) => debug!(tier = tier.scope.as_str(), "Discarding expired credential"),
                Err(e) => warn!(tier = tier.scope.as_str(), error = %e, "Discarding unreadable credential"),
            }
            if let Err(e) = tier.backend.remove(CREDENTIAL_KEY) {
                warn!(tier = tier.scope.as_str(), error = %e, "Credential removal failed");
            }
        }
        None
    }

    /// Remove the credential from every tier.
    pub fn clear(&self) -> Result<(), StorageError> {
        let mut failed = 0;
        for tier in &self.tiers {
            if let Err(e) = tier.backend.remove(CREDENTIAL_KEY) {
                warn!(tier = tier.scope.as_str(), error = %e, "Credential removal failed");
                failed += 1;
            }
        }
        if failed == self.tiers.len() {
            return Err(StorageError::AllTiersFailed);
        }
        Ok(())
    }

    fn promote(&self, raw: &str) {
        if let Some(memory) = self.tiers.first() {
            if let Err(e) = memory.backend.set(CREDENTIAL_KEY, raw) {
                debug!(error = %e, "Could not cache credential in memory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn credential(token: &str, expires_in: i64) -> SessionCredential {
        SessionCredential {
            access_token: token.to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: chrono::Utc::now().timestamp() + expires_in,
        }
    }

    /// Backend that rejects every operation.
    struct DeniedBackend;

    impl KeyValueBackend for DeniedBackend {
        fn get(&self, _: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable("permission denied".into()))
        }
        fn set(&self, _: &str, _: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("quota exceeded".into()))
        }
        fn remove(&self, _: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("permission denied".into()))
        }
    }

    #[test]
    fn save_then_load_round_trip() {
        let storage = TokenStorage::new(Arc::new(MemoryBackend::new()));
        let saved = credential("access", 600);
        storage.save(&saved).unwrap();
        assert_eq!(storage.load(), Some(saved));
    }

    #[test]
    fn session_tier_survives_reload() {
        let session: Arc<dyn KeyValueBackend> = Arc::new(MemoryBackend::new());
        let saved = credential("access", 600);
        TokenStorage::new(session.clone()).save(&saved).unwrap();

        // A new TokenStorage has an empty memory tier.
        let reloaded = TokenStorage::new(session);
        assert_eq!(reloaded.load(), Some(saved));
    }

    #[test]
    fn expired_credentials_are_skipped_and_removed() {
        let session = Arc::new(MemoryBackend::new());
        let storage = TokenStorage::new(session.clone());
        let fresh = credential("fresh", 600);
        let stale = serde_json::to_string(&credential("stale", -10)).unwrap();

        // Memory holds a stale credential, session a fresh one.
        storage.tiers[0].backend.set(CREDENTIAL_KEY, &stale).unwrap();
        session
            .set(CREDENTIAL_KEY, &serde_json::to_string(&fresh).unwrap())
            .unwrap();

        assert_eq!(storage.load(), Some(fresh.clone()));
        // Promotion replaced the stale memory entry.
        let cached = storage.tiers[0].backend.get(CREDENTIAL_KEY).unwrap().unwrap();
        assert_eq!(serde_json::from_str::<SessionCredential>(&cached).unwrap(), fresh);
    }

    #[test]
    fn only_expired_credentials_yield_none() {
        let session = Arc::new(MemoryBackend::new());
        let storage = TokenStorage::new(session.clone());
        storage.save(&credential("old", -1)).unwrap();

        assert_eq!(storage.load(), None);
        assert_eq!(session.get(CREDENTIAL_KEY).unwrap(), None);
    }

    #[test]
    fn empty_token_is_not_usable() {
        let storage = TokenStorage::memory_only();
        storage.save(&credential("  ", 600)).unwrap();
        assert_eq!(storage.load(), None);
    }

    #[test]
    fn failing_tier_does_not_abort_others() {
        let storage = TokenStorage::new(Arc::new(DeniedBackend));
        let saved = credential("access", 600);
        storage.save(&saved).unwrap();
        assert_eq!(storage.load(), Some(saved));
        storage.clear().unwrap();
        assert_eq!(storage.load(), None);
    }

    #[test]
    fn save_fails_only_when_every_tier_fails() {
        let storage = TokenStorage {
            tiers: vec![Tier {
                scope: StorageScope::Session,
                backend: Arc::new(DeniedBackend),
            }],
        };
        assert!(matches!(
            storage.save(&credential("access", 600)),
            Err(StorageError::AllTiersFailed)
        ));
    }

    #[test]
    fn durable_tier_persists_to_disk() {
        let dir = TempDir::new().unwrap();
        let saved = credential("access", 600);

        let storage = TokenStorage::memory_only().with_durable(Arc::new(FileBackend::new(dir.path())));
        assert_eq!(storage.scopes(), vec![StorageScope::Memory, StorageScope::Durable]);
        storage.save(&saved).unwrap();
        assert!(dir.path().join("bridge.credential.json").exists());

        let restarted =
            TokenStorage::memory_only().with_durable(Arc::new(FileBackend::new(dir.path())));
        assert_eq!(restarted.load(), Some(saved));

        restarted.clear().unwrap();
        assert!(!dir.path().join("bridge.credential.json").exists());
    }

    #[test]
    fn unpartitioned_durable_storage_is_not_used() {
        let dir = TempDir::new().unwrap();
        let storage = TokenStorage::memory_only()
            .with_durable(Arc::new(FileBackend::new(dir.path()).unpartitioned()));
        assert_eq!(storage.scopes(), vec![StorageScope::Memory]);
    }

    #[test]
    fn file_backend_rejects_path_like_keys() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path());
        assert!(matches!(
            backend.set("../escape", "x"),
            Err(StorageError::InvalidKey(_))
        ));
        assert_eq!(backend.get("missing").unwrap(), None);
        backend.remove("missing").unwrap();
    }
}
