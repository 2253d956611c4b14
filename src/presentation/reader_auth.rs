//! Reader authentication: the signature a reader produces over its request,
//! bound to the session transcript for replay protection.

use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use serde::Serialize;

use super::Error;
use crate::cbor;
use crate::definitions::ByteStr;

/// Payload the reader signs: ties the opaque request message to the session
/// transcript. Serializes as the CBOR array
/// `["ReaderAuthentication", transcript, request message]`.
#[derive(Clone, Debug, Serialize)]
pub struct ReaderAuthentication(&'static str, ByteStr, ByteStr);

impl ReaderAuthentication {
    pub fn new(session_transcript: ByteStr, request_message: ByteStr) -> Self {
        Self("ReaderAuthentication", session_transcript, request_message)
    }

    /// Canonical CBOR bytes the signature is computed over.
    pub fn signature_payload(&self) -> Result<Vec<u8>, cbor::CborError> {
        cbor::to_vec(self)
    }
}

/// Verifies the reader's ECDSA signature over `request_message`, with the
/// session transcript as associated data.
pub(crate) fn verify_reader_signature(
    request_message: &ByteStr,
    session_transcript: &ByteStr,
    signature: &ByteStr,
    reader_key: &VerifyingKey,
) -> Result<(), Error> {
    let payload = ReaderAuthentication::new(session_transcript.clone(), request_message.clone())
        .signature_payload()
        .map_err(|_| Error::InvalidRequestMessage)?;
    let signature =
        Signature::from_slice(signature.as_ref()).map_err(|_| Error::InvalidReaderSignature)?;
    reader_key.verify(&payload, &signature).map_err(|_| {
        tracing::warn!("reader signature failed verification");
        Error::InvalidReaderSignature
    })
}
