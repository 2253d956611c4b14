//! The credential-store seam.
//!
//! Persisted credential data and the authentication-key pool live outside
//! the session, behind [CredentialStore]. Usage counters are shared across
//! every session over the same credential, so implementations must update
//! them atomically; the in-memory store serializes all access behind one
//! lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use time::OffsetDateTime;

use crate::definitions::{CredentialName, EntryIdentifier, Namespace};

/// Identifier of a key in a credential's authentication-key pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AuthKeyId(pub u32);

/// One usage-limited authentication key.
#[derive(Clone, Debug)]
pub struct AuthKeyInfo {
    pub id: AuthKeyId,
    pub usage_count: u32,
    pub max_usage_count: u32,
    pub expiration: Option<OffsetDateTime>,
}

impl AuthKeyInfo {
    pub fn new(id: u32, max_usage_count: u32) -> Self {
        Self {
            id: AuthKeyId(id),
            usage_count: 0,
            max_usage_count,
            expiration: None,
        }
    }

    pub fn with_expiration(mut self, expiration: OffsetDateTime) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn is_exhausted(&self) -> bool {
        self.usage_count >= self.max_usage_count
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expiration.is_some_and(|expiration| expiration <= now)
    }
}

/// Access policy attached to an entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AccessProfile {
    /// Released to any reader the request authorizes.
    #[default]
    Open,
    /// Released only when the holder proved presence for this session.
    PresenceGated,
}

/// A single named data element.
#[derive(Clone, Debug)]
pub struct Entry {
    pub value: ciborium::Value,
    pub access: AccessProfile,
}

impl Entry {
    pub fn open(value: ciborium::Value) -> Self {
        Self {
            value,
            access: AccessProfile::Open,
        }
    }

    pub fn presence_gated(value: ciborium::Value) -> Self {
        Self {
            value,
            access: AccessProfile::PresenceGated,
        }
    }
}

/// Persisted form of a credential as loaded from the store.
#[derive(Clone, Debug)]
pub struct CredentialData {
    pub name: CredentialName,
    pub namespaces: BTreeMap<Namespace, BTreeMap<EntryIdentifier, Entry>>,
    pub auth_keys: Vec<AuthKeyInfo>,
}

impl CredentialData {
    pub fn new(name: impl Into<CredentialName>) -> Self {
        Self {
            name: name.into(),
            namespaces: BTreeMap::new(),
            auth_keys: Vec::new(),
        }
    }

    pub fn with_entry(mut self, namespace: &str, identifier: &str, entry: Entry) -> Self {
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(identifier.to_string(), entry);
        self
    }

    pub fn with_auth_key(mut self, key: AuthKeyInfo) -> Self {
        self.auth_keys.push(key);
        self
    }

    pub(crate) fn entry(&self, namespace: &str, identifier: &str) -> Option<&Entry> {
        self.namespaces
            .get(namespace)
            .and_then(|entries| entries.get(identifier))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The store backend failed.
    #[error("credential store failure: {0}")]
    Backend(#[from] anyhow::Error),
    /// The named credential has no such key in its pool.
    #[error("credential {0:?} has no authentication key {1:?}")]
    UnknownKey(CredentialName, AuthKeyId),
}

/// Store of persisted credentials, shared by every session over them.
pub trait CredentialStore {
    /// Load the persisted credential; `None` when the name is unknown.
    fn load_data(&self, name: &str) -> Result<Option<CredentialData>, StorageError>;

    /// Bump the usage counter of one authentication key. Must be atomic
    /// with respect to concurrent sessions over the same credential.
    fn increment_key_usage(&self, name: &str, key: AuthKeyId) -> Result<(), StorageError>;
}

/// In-memory [CredentialStore].
#[derive(Default)]
pub struct InMemoryCredentialStore {
    credentials: Mutex<HashMap<CredentialName, CredentialData>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a credential.
    pub fn provision(&self, data: CredentialData) {
        let mut credentials = self.lock();
        credentials.insert(data.name.clone(), data);
    }

    /// Current usage counter of one authentication key.
    pub fn key_usage_count(&self, name: &str, key: AuthKeyId) -> Option<u32> {
        self.lock().get(name).and_then(|data| {
            data.auth_keys
                .iter()
                .find(|info| info.id == key)
                .map(|info| info.usage_count)
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CredentialName, CredentialData>> {
        self.credentials.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn load_data(&self, name: &str) -> Result<Option<CredentialData>, StorageError> {
        Ok(self.lock().get(name).cloned())
    }

    fn increment_key_usage(&self, name: &str, key: AuthKeyId) -> Result<(), StorageError> {
        let mut credentials = self.lock();
        let info = credentials
            .get_mut(name)
            .and_then(|data| data.auth_keys.iter_mut().find(|info| info.id == key))
            .ok_or_else(|| StorageError::UnknownKey(name.to_string(), key))?;
        info.usage_count += 1;
        Ok(())
    }
}
