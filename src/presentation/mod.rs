//! The protocol-state core: one [PresentationSession] per reader
//! interaction.

pub mod reader_auth;
pub mod session;

mod credential;
mod freshness;

use crate::secure::SecureAreaError;
use crate::storage::StorageError;

pub use crate::secure::ProofOfPresence;
pub use session::PresentationSession;

/// Errors surfaced by a presentation session.
///
/// [Error::ReaderKeyAlreadySet] and [Error::TranscriptAlreadySet] are usage
/// faults: the caller broke the write-once contract. [Error::SecureArea] and
/// [Error::Storage] are platform faults the session cannot proceed without.
/// Everything else is a protocol failure the reader-facing layer answers per
/// kind; a missing credential is not an error at all.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The reader's ephemeral public key was already set on this session.
    #[error("reader ephemeral public key already set")]
    ReaderKeyAlreadySet,
    /// The session transcript was already set on this session.
    #[error("session transcript already set")]
    TranscriptAlreadySet,
    /// Every authentication key in the credential's pool was ineligible.
    #[error("no usable authentication key: {0}")]
    NoKeyAvailable(KeyUnavailability),
    /// The reader's signature over the request message did not verify.
    #[error("reader signature did not verify")]
    InvalidReaderSignature,
    /// The request message is missing or not structurally valid.
    #[error("request message is malformed")]
    InvalidRequestMessage,
    /// A reader signature was supplied before the reader's ephemeral public
    /// key was set.
    #[error("reader ephemeral public key was never set")]
    EphemeralPublicKeyNotFound,
    /// A reader signature was supplied before the session transcript was
    /// set.
    #[error("session transcript was never set")]
    SessionTranscriptNotSet,
    /// The secure key store is unavailable or misconfigured.
    #[error("secure area failure: {0}")]
    SecureArea(#[from] SecureAreaError),
    /// The credential store failed.
    #[error("credential store failure: {0}")]
    Storage(#[from] StorageError),
}

/// Why no authentication key could be selected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum KeyUnavailability {
    /// The credential's key pool is empty.
    #[error("the credential has no authentication keys")]
    NoKeys,
    /// Every key is exhausted and the request does not allow exhausted
    /// keys.
    #[error("all authentication keys are exhausted")]
    Exhausted,
    /// Every remaining candidate is expired and the request does not allow
    /// expired keys.
    #[error("all usable authentication keys are expired")]
    Expired,
}
