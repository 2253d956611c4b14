//! One [PresentationSession] per reader interaction: the ephemeral key pair,
//! the write-once transcript binding, cached credential retrievers and the
//! proof-of-presence gate.

use std::sync::Arc;

use p256::ecdsa::VerifyingKey;
use p256::PublicKey;

use super::credential::CredentialRetriever;
use super::freshness::FreshnessGate;
use super::Error;
use crate::definitions::{
    ByteStr, CipherSuite, CredentialDataRequest, CredentialDataResult, CredentialName,
};
use crate::secure::{EphemeralKeyPair, ProofOfPresence, SecureArea};
use crate::storage::CredentialStore;

/// A single holder–reader interaction.
///
/// One session owns the ephemeral key exchange, the transcript binding, a
/// cache of per-credential retrievers and the proof-of-presence gate. It is
/// built for a single logical owner; wrap it in external synchronisation to
/// share it across threads.
pub struct PresentationSession<Sec: SecureArea, Store: CredentialStore> {
    secure_area: Arc<Sec>,
    store: Arc<Store>,
    cipher_suite: CipherSuite,
    ephemeral_key: Option<EphemeralKeyPair>,
    reader_key: Option<VerifyingKey>,
    transcript: Option<ByteStr>,
    // Insertion order is kept; nothing is evicted for the session's
    // lifetime.
    credentials: Vec<(CredentialName, CredentialRetriever)>,
    freshness: FreshnessGate<Sec::Cipher>,
}

impl<Sec: SecureArea, Store: CredentialStore> PresentationSession<Sec, Store> {
    /// New session for one reader interaction, over shared collaborators.
    pub fn new(secure_area: Arc<Sec>, store: Arc<Store>, cipher_suite: CipherSuite) -> Self {
        tracing::info!(suite = ?cipher_suite, "starting presentation session");
        Self {
            secure_area,
            store,
            cipher_suite,
            ephemeral_key: None,
            reader_key: None,
            transcript: None,
            credentials: Vec::new(),
            freshness: FreshnessGate::new(),
        }
    }

    /// The session's ephemeral key pair, generated on first call and stable
    /// for the session's lifetime.
    pub fn ephemeral_key_pair(&mut self) -> Result<&EphemeralKeyPair, Error> {
        if self.ephemeral_key.is_none() {
            let key_pair = self.secure_area.generate_session_key_pair()?;
            return Ok(self.ephemeral_key.insert(key_pair));
        }
        match &self.ephemeral_key {
            Some(key_pair) => Ok(key_pair),
            // Unreachable as the variant has already been checked.
            None => unreachable!(),
        }
    }

    /// Accepts the reader's ephemeral public key, exactly once.
    pub fn set_reader_ephemeral_public_key(&mut self, key: PublicKey) -> Result<(), Error> {
        if self.reader_key.is_some() {
            return Err(Error::ReaderKeyAlreadySet);
        }
        self.reader_key = Some(VerifyingKey::from(key));
        Ok(())
    }

    /// Stores an immutable copy of the session transcript, exactly once.
    pub fn set_session_transcript(&mut self, transcript: &[u8]) -> Result<(), Error> {
        if self.transcript.is_some() {
            return Err(Error::TranscriptAlreadySet);
        }
        self.transcript = Some(ByteStr::from(transcript));
        Ok(())
    }

    /// Releases entries of the named credential.
    ///
    /// `Ok(None)` means the store does not know the credential — a normal
    /// outcome, not a fault. The first retrieval of a name instantiates and
    /// caches its retriever; the request's policy flags and the transcript
    /// binding are fixed at that point. Both the device-signed and the
    /// issuer-signed pass validate against the same authentication key: a
    /// presentation releases both categories under one proof of possession.
    pub fn get_credential_data(
        &mut self,
        credential_name: &str,
        request: &CredentialDataRequest,
    ) -> Result<Option<CredentialDataResult>, Error> {
        if !self
            .credentials
            .iter()
            .any(|(name, _)| name == credential_name)
        {
            let Some(retriever) = CredentialRetriever::load(
                self.store.as_ref(),
                credential_name,
                self.cipher_suite,
                request,
                self.transcript.clone(),
            )?
            else {
                return Ok(None);
            };
            self.credentials
                .push((credential_name.to_string(), retriever));
        }

        let Self {
            credentials,
            freshness,
            store,
            reader_key,
            ..
        } = self;
        let retriever = match credentials
            .iter_mut()
            .find(|(name, _)| name == credential_name)
        {
            Some((_, retriever)) => retriever,
            // Unreachable as the retriever was inserted above.
            None => unreachable!(),
        };

        let device_signed = retriever.get_entries(
            store.as_ref(),
            request,
            &request.device_signed_entries,
            reader_key.as_ref(),
            freshness,
        )?;
        // The second pass reuses the key selected by the first: both entry
        // categories are released under a single proof of possession.
        let issuer_signed = retriever.get_entries(
            store.as_ref(),
            request,
            &request.issuer_signed_entries,
            reader_key.as_ref(),
            freshness,
        )?;

        Ok(Some(CredentialDataResult {
            device_signed,
            issuer_signed,
        }))
    }

    /// A new single-use proof of presence for this session.
    ///
    /// Each call replaces the previous proof and drops its memoized verdict.
    pub fn proof_of_presence(&mut self) -> Result<ProofOfPresence<Sec::Cipher>, Error> {
        Ok(self.freshness.issue(self.secure_area.as_ref())?)
    }

    /// Whether the most recently issued proof of presence was exercised by a
    /// successful authentication ceremony. `false` when no proof was ever
    /// issued.
    pub fn is_presence_satisfied(&mut self) -> bool {
        self.freshness.is_satisfied()
    }
}

#[cfg(test)]
mod test {
    use ciborium::Value;

    use super::*;
    use crate::definitions::{EntryError, EntryNamespaces};
    use crate::presentation::KeyUnavailability;
    use crate::secure::SoftwareSecureArea;
    use crate::storage::{AuthKeyId, AuthKeyInfo, CredentialData, Entry, InMemoryCredentialStore};

    const CREDENTIAL: &str = "driving-licence";
    const NAMESPACE: &str = "org.iso.18013.5.1";

    fn store_with_credential() -> Arc<InMemoryCredentialStore> {
        let store = InMemoryCredentialStore::new();
        store.provision(
            CredentialData::new(CREDENTIAL)
                .with_entry(
                    NAMESPACE,
                    "family_name",
                    Entry::open(Value::Text("Mustermann".to_string())),
                )
                .with_entry(
                    NAMESPACE,
                    "given_name",
                    Entry::open(Value::Text("Erika".to_string())),
                )
                .with_entry(NAMESPACE, "age_over_21", Entry::open(Value::Bool(true)))
                .with_entry(
                    NAMESPACE,
                    "portrait",
                    Entry::presence_gated(Value::Bytes(vec![0xff, 0xd8])),
                )
                .with_auth_key(AuthKeyInfo::new(0, 10)),
        );
        Arc::new(store)
    }

    fn session(
        store: &Arc<InMemoryCredentialStore>,
    ) -> PresentationSession<SoftwareSecureArea, InMemoryCredentialStore> {
        PresentationSession::new(
            Arc::new(SoftwareSecureArea::new()),
            Arc::clone(store),
            CipherSuite::default(),
        )
    }

    fn entries(identifiers: &[&str]) -> EntryNamespaces {
        [(
            NAMESPACE.to_string(),
            identifiers.iter().map(|id| id.to_string()).collect(),
        )]
        .into_iter()
        .collect()
    }

    fn request() -> CredentialDataRequest {
        CredentialDataRequest {
            device_signed_entries: entries(&["age_over_21", "family_name"]),
            issuer_signed_entries: entries(&["given_name"]),
            ..Default::default()
        }
    }

    #[test]
    fn ephemeral_key_pair_is_stable() {
        let store = store_with_credential();
        let mut session = session(&store);
        let first = session.ephemeral_key_pair().unwrap().public_key();
        let second = session.ephemeral_key_pair().unwrap().public_key();
        assert_eq!(first, second);
    }

    #[test]
    fn reader_key_is_write_once() {
        let store = store_with_credential();
        let mut session = session(&store);
        let key = EphemeralKeyPair::random().public_key();
        session.set_reader_ephemeral_public_key(key).unwrap();
        assert!(matches!(
            session.set_reader_ephemeral_public_key(key),
            Err(Error::ReaderKeyAlreadySet)
        ));
    }

    #[test]
    fn transcript_is_write_once() {
        let store = store_with_credential();
        let mut session = session(&store);
        session.set_session_transcript(b"transcript").unwrap();
        assert!(matches!(
            session.set_session_transcript(b"transcript"),
            Err(Error::TranscriptAlreadySet)
        ));
    }

    #[test]
    fn missing_credential_is_an_absence() {
        let store = store_with_credential();
        let mut session = session(&store);
        let result = session.get_credential_data("passport", &request()).unwrap();
        assert!(result.is_none());

        // Absence is not cached: provisioning afterwards is observable.
        store.provision(CredentialData::new("passport").with_auth_key(AuthKeyInfo::new(0, 10)));
        let result = session.get_credential_data("passport", &request()).unwrap();
        assert!(result.is_some());
    }

    #[test]
    fn releases_requested_entries_by_category() {
        let store = store_with_credential();
        let mut session = session(&store);
        let result = session
            .get_credential_data(CREDENTIAL, &request())
            .unwrap()
            .unwrap();
        assert_eq!(
            result.device_signed.entry(NAMESPACE, "age_over_21"),
            Some(&Value::Bool(true))
        );
        assert_eq!(
            result.device_signed.entry(NAMESPACE, "family_name"),
            Some(&Value::Text("Mustermann".to_string()))
        );
        assert_eq!(
            result.issuer_signed.entry(NAMESPACE, "given_name"),
            Some(&Value::Text("Erika".to_string()))
        );
        assert_eq!(result.issuer_signed.entry(NAMESPACE, "age_over_21"), None);
    }

    #[test]
    fn usage_counter_increments_once_for_both_passes() {
        let store = store_with_credential();
        let mut session = session(&store);
        session.get_credential_data(CREDENTIAL, &request()).unwrap();
        assert_eq!(store.key_usage_count(CREDENTIAL, AuthKeyId(0)), Some(1));
    }

    #[test]
    fn cached_retriever_reuses_the_selected_key() {
        let store = store_with_credential();
        let mut session = session(&store);
        session.get_credential_data(CREDENTIAL, &request()).unwrap();
        session.get_credential_data(CREDENTIAL, &request()).unwrap();
        assert_eq!(store.key_usage_count(CREDENTIAL, AuthKeyId(0)), Some(1));
    }

    #[test]
    fn usage_counter_is_untouched_without_the_increment_flag() {
        let store = store_with_credential();
        let mut session = session(&store);
        let request = CredentialDataRequest {
            increment_use_count: false,
            ..request()
        };
        session.get_credential_data(CREDENTIAL, &request).unwrap();
        assert_eq!(store.key_usage_count(CREDENTIAL, AuthKeyId(0)), Some(0));
    }

    #[test]
    fn exhausted_pool_is_a_named_failure() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let mut exhausted = AuthKeyInfo::new(0, 5);
        exhausted.usage_count = 5;
        store.provision(
            CredentialData::new(CREDENTIAL)
                .with_entry(NAMESPACE, "age_over_21", Entry::open(Value::Bool(true)))
                .with_auth_key(exhausted),
        );
        let mut session = session(&store);
        let request = CredentialDataRequest {
            allow_exhausted_keys: false,
            ..request()
        };
        assert!(matches!(
            session.get_credential_data(CREDENTIAL, &request),
            Err(Error::NoKeyAvailable(KeyUnavailability::Exhausted))
        ));
    }

    #[test]
    fn presence_gated_entry_is_held_back_until_the_ceremony() {
        let store = store_with_credential();
        let mut session = session(&store);
        let request = CredentialDataRequest {
            device_signed_entries: entries(&["portrait"]),
            ..Default::default()
        };

        let result = session
            .get_credential_data(CREDENTIAL, &request)
            .unwrap()
            .unwrap();
        assert_eq!(result.device_signed.entry(NAMESPACE, "portrait"), None);
        assert_eq!(
            result.device_signed.error(NAMESPACE, "portrait"),
            Some(EntryError::PresenceNotVerified)
        );

        // A fresh proof clears the memoized verdict; once the ceremony
        // completes, the entry is released.
        let proof = session.proof_of_presence().unwrap();
        SoftwareSecureArea::confirm_presence(&proof);
        let result = session
            .get_credential_data(CREDENTIAL, &request)
            .unwrap()
            .unwrap();
        assert_eq!(
            result.device_signed.entry(NAMESPACE, "portrait"),
            Some(&Value::Bytes(vec![0xff, 0xd8]))
        );
    }

    #[test]
    fn unknown_entry_is_reported_not_faulted() {
        let store = store_with_credential();
        let mut session = session(&store);
        let request = CredentialDataRequest {
            device_signed_entries: entries(&["shoe_size"]),
            ..Default::default()
        };
        let result = session
            .get_credential_data(CREDENTIAL, &request)
            .unwrap()
            .unwrap();
        assert_eq!(
            result.device_signed.error(NAMESPACE, "shoe_size"),
            Some(EntryError::NoSuchEntry)
        );
    }

    #[test]
    fn presence_defaults_to_not_satisfied() {
        let store = store_with_credential();
        let mut session = session(&store);
        assert!(!session.is_presence_satisfied());
    }

    #[test]
    fn unconfirmed_proof_is_not_satisfied() {
        let store = store_with_credential();
        let mut session = session(&store);
        session.proof_of_presence().unwrap();
        assert!(!session.is_presence_satisfied());

        // The verdict is per proof: a confirmed replacement flips it.
        let proof = session.proof_of_presence().unwrap();
        SoftwareSecureArea::confirm_presence(&proof);
        assert!(session.is_presence_satisfied());
        assert!(session.is_presence_satisfied());
    }

    #[test]
    fn signed_request_needs_the_reader_key() {
        let store = store_with_credential();
        let mut session = session(&store);
        session.set_session_transcript(b"transcript").unwrap();
        let request = CredentialDataRequest {
            request_message: Some(ByteStr::from(
                crate::cbor::to_vec(&Value::Text("request".to_string())).unwrap(),
            )),
            reader_signature: Some(ByteStr::from(vec![0u8; 64])),
            ..request()
        };
        assert!(matches!(
            session.get_credential_data(CREDENTIAL, &request),
            Err(Error::EphemeralPublicKeyNotFound)
        ));
    }

    #[test]
    fn malformed_request_message_is_a_named_failure() {
        let store = store_with_credential();
        let mut session = session(&store);
        let request = CredentialDataRequest {
            request_message: Some(ByteStr::from(vec![0xff, 0xff])),
            ..request()
        };
        assert!(matches!(
            session.get_credential_data(CREDENTIAL, &request),
            Err(Error::InvalidRequestMessage)
        ));
    }
}
