//! Per-credential retrieval: lazy load, authentication-key consumption and
//! two-pass entry extraction within one session.

use p256::ecdsa::VerifyingKey;
use time::OffsetDateTime;

use super::freshness::FreshnessGate;
use super::reader_auth::verify_reader_signature;
use super::{Error, KeyUnavailability};
use crate::cbor;
use crate::definitions::{
    ByteStr, CipherSuite, CredentialDataRequest, CredentialName, EntryError, EntryNamespaces,
    RetrievedEntries,
};
use crate::secure::GuardedCipher;
use crate::storage::{AccessProfile, AuthKeyId, AuthKeyInfo, CredentialData, CredentialStore};

/// Retrieval state for one credential within one session.
///
/// Cached by the owning session, so the authentication key selected on the
/// first retrieval, and its usage accounting, cover every later retrieval of
/// the same credential.
pub(crate) struct CredentialRetriever {
    name: CredentialName,
    data: CredentialData,
    transcript: Option<ByteStr>,
    allow_exhausted_keys: bool,
    allow_expired_keys: bool,
    increment_use_count: bool,
    auth_key: Option<AuthKeyId>,
}

impl CredentialRetriever {
    /// Loads `name` from the store and binds it to the session transcript
    /// and the request's key-usage policy. `None` when the store does not
    /// know the credential.
    pub(crate) fn load<S: CredentialStore>(
        store: &S,
        name: &str,
        cipher_suite: CipherSuite,
        request: &CredentialDataRequest,
        transcript: Option<ByteStr>,
    ) -> Result<Option<Self>, Error> {
        let Some(data) = store.load_data(name)? else {
            tracing::debug!(credential = name, "credential not found in store");
            return Ok(None);
        };
        tracing::debug!(credential = name, suite = ?cipher_suite, "loaded credential data");
        Ok(Some(Self {
            name: name.to_string(),
            data,
            transcript,
            allow_exhausted_keys: request.allow_exhausted_keys,
            allow_expired_keys: request.allow_expired_keys,
            increment_use_count: request.increment_use_count,
            auth_key: None,
        }))
    }

    /// Extracts one category of entries for `request`.
    ///
    /// The first call on a retriever selects (and, per policy, consumes) an
    /// authentication key; later calls reuse that selection.
    pub(crate) fn get_entries<C, S>(
        &mut self,
        store: &S,
        request: &CredentialDataRequest,
        names: &EntryNamespaces,
        reader_key: Option<&VerifyingKey>,
        freshness: &mut FreshnessGate<C>,
    ) -> Result<RetrievedEntries, Error>
    where
        C: GuardedCipher,
        S: CredentialStore,
    {
        self.check_reader_authentication(request, reader_key)?;
        self.ensure_auth_key(store)?;

        let mut result = RetrievedEntries::default();
        for (namespace, identifiers) in names {
            for identifier in identifiers {
                match self.data.entry(namespace, identifier) {
                    None => result.insert_error(namespace, identifier, EntryError::NoSuchEntry),
                    Some(entry) => match entry.access {
                        AccessProfile::Open => {
                            result.insert_entry(namespace, identifier, entry.value.clone())
                        }
                        AccessProfile::PresenceGated if freshness.is_satisfied() => {
                            result.insert_entry(namespace, identifier, entry.value.clone())
                        }
                        AccessProfile::PresenceGated => result.insert_error(
                            namespace,
                            identifier,
                            EntryError::PresenceNotVerified,
                        ),
                    },
                }
            }
        }
        Ok(result)
    }

    /// Structural validation of the request message and verification of the
    /// reader signature, ahead of any key consumption.
    fn check_reader_authentication(
        &self,
        request: &CredentialDataRequest,
        reader_key: Option<&VerifyingKey>,
    ) -> Result<(), Error> {
        let Some(message) = request.request_message.as_ref() else {
            if request.reader_signature.is_some() {
                // A signature with nothing signed cannot be verified.
                return Err(Error::InvalidRequestMessage);
            }
            return Ok(());
        };
        // The message is opaque to this layer, but it must at least be
        // well-formed CBOR.
        cbor::from_slice::<ciborium::Value>(message.as_ref())
            .map_err(|_| Error::InvalidRequestMessage)?;
        if let Some(signature) = request.reader_signature.as_ref() {
            let reader_key = reader_key.ok_or(Error::EphemeralPublicKeyNotFound)?;
            let transcript = self
                .transcript
                .as_ref()
                .ok_or(Error::SessionTranscriptNotSet)?;
            verify_reader_signature(message, transcript, signature, reader_key)?;
        }
        Ok(())
    }

    fn ensure_auth_key<S: CredentialStore>(&mut self, store: &S) -> Result<(), Error> {
        if self.auth_key.is_some() {
            return Ok(());
        }
        let selected = select_auth_key(
            &self.data.auth_keys,
            OffsetDateTime::now_utc(),
            self.allow_exhausted_keys,
            self.allow_expired_keys,
        )
        .map_err(Error::NoKeyAvailable)?;
        if self.increment_use_count {
            store.increment_key_usage(&self.name, selected)?;
        }
        tracing::debug!(credential = %self.name, key = selected.0, "selected authentication key");
        self.auth_key = Some(selected);
        Ok(())
    }
}

/// Picks the eligible key with the lowest usage count: exhausted keys are
/// skipped unless `allow_exhausted`, expired keys unless `allow_expired`.
fn select_auth_key(
    pool: &[AuthKeyInfo],
    now: OffsetDateTime,
    allow_exhausted: bool,
    allow_expired: bool,
) -> Result<AuthKeyId, KeyUnavailability> {
    if pool.is_empty() {
        return Err(KeyUnavailability::NoKeys);
    }
    let eligible = pool
        .iter()
        .filter(|key| allow_exhausted || !key.is_exhausted())
        .filter(|key| allow_expired || !key.is_expired(now))
        .min_by_key(|key| key.usage_count);
    match eligible {
        Some(key) => Ok(key.id),
        None if !allow_exhausted && pool.iter().all(AuthKeyInfo::is_exhausted) => {
            Err(KeyUnavailability::Exhausted)
        }
        None => Err(KeyUnavailability::Expired),
    }
}
