use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::definitions::helpers::ByteStr;

pub type CredentialName = String;
pub type Namespace = String;
pub type EntryIdentifier = String;
/// Entry identifiers grouped by namespace.
pub type EntryNamespaces = BTreeMap<Namespace, Vec<EntryIdentifier>>;

/// Cipher suites a presentation session can be created with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherSuite {
    /// ECDHE with HKDF-SHA-256, ECDSA and AES-256-GCM.
    #[default]
    EcdheHkdfEcdsaAes256GcmSha256,
}

/// A reader's request for entries of a single credential.
///
/// The request message and reader signature are produced by the protocol
/// layer and passed through opaquely; the policy flags control how the
/// credential's authentication-key pool is consumed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CredentialDataRequest {
    /// Message the reader signed, owned by the protocol layer.
    pub request_message: Option<ByteStr>,
    /// Entries to release under device signing.
    pub device_signed_entries: EntryNamespaces,
    /// Entries to release under issuer signing.
    pub issuer_signed_entries: EntryNamespaces,
    /// Reader signature over the request message and session transcript.
    pub reader_signature: Option<ByteStr>,
    /// Select an authentication key even if the whole pool is exhausted.
    pub allow_exhausted_keys: bool,
    /// Select an authentication key even if it is past its expiration.
    pub allow_expired_keys: bool,
    /// Bump the selected authentication key's persistent usage counter.
    pub increment_use_count: bool,
}

impl Default for CredentialDataRequest {
    fn default() -> Self {
        Self {
            request_message: None,
            device_signed_entries: EntryNamespaces::new(),
            issuer_signed_entries: EntryNamespaces::new(),
            reader_signature: None,
            allow_exhausted_keys: true,
            allow_expired_keys: false,
            increment_use_count: true,
        }
    }
}
