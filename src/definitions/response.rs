use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::definitions::request::{EntryIdentifier, Namespace};

/// Entry values released for one signing category, with a per-entry
/// condition for everything that was requested but not returned.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievedEntries {
    pub entries: BTreeMap<Namespace, BTreeMap<EntryIdentifier, ciborium::Value>>,
    pub errors: BTreeMap<Namespace, BTreeMap<EntryIdentifier, EntryError>>,
}

impl RetrievedEntries {
    /// Value of a single released entry.
    pub fn entry(&self, namespace: &str, identifier: &str) -> Option<&ciborium::Value> {
        self.entries
            .get(namespace)
            .and_then(|entries| entries.get(identifier))
    }

    /// Why a requested entry was not released.
    pub fn error(&self, namespace: &str, identifier: &str) -> Option<EntryError> {
        self.errors
            .get(namespace)
            .and_then(|errors| errors.get(identifier))
            .copied()
    }

    pub(crate) fn insert_entry(
        &mut self,
        namespace: &str,
        identifier: &str,
        value: ciborium::Value,
    ) {
        self.entries
            .entry(namespace.to_string())
            .or_default()
            .insert(identifier.to_string(), value);
    }

    pub(crate) fn insert_error(&mut self, namespace: &str, identifier: &str, error: EntryError) {
        self.errors
            .entry(namespace.to_string())
            .or_default()
            .insert(identifier.to_string(), error);
    }
}

/// Why a requested entry was not returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryError {
    /// The credential holds no entry under the requested identifier.
    NoSuchEntry,
    /// The entry is presence-gated and no satisfied proof of presence exists
    /// for this session.
    PresenceNotVerified,
}

/// Composite outcome of a single credential retrieval: the device-signed and
/// issuer-signed entry sets released under one proof of possession.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CredentialDataResult {
    pub device_signed: RetrievedEntries,
    pub issuer_signed: RetrievedEntries,
}
