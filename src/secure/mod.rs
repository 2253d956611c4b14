//! The secure-key-store seam.
//!
//! Asymmetric session keys and ceremony-gated symmetric operations are
//! delegated to an external key store through the [SecureArea] trait. A
//! pure-software implementation lives in [software].

pub mod software;

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;

pub use software::{SoftwareGuardedCipher, SoftwareSecureArea};

/// Session-scoped P-256 key pair used to derive a shared, transcript-bound
/// secret with the reader.
pub struct EphemeralKeyPair {
    secret: SecretKey,
}

impl EphemeralKeyPair {
    /// Generate a fresh key pair from the OS entropy source.
    pub fn random() -> Self {
        Self {
            secret: SecretKey::random(&mut OsRng),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret.public_key()
    }

    /// Private half, for the protocol layer's key agreement.
    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    /// Derives the shared secret with the reader's ephemeral key.
    pub fn shared_secret(&self, reader_key: &PublicKey) -> p256::ecdh::SharedSecret {
        p256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), reader_key.as_affine())
    }
}

impl fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material stays out of logs.
        f.debug_struct("EphemeralKeyPair")
            .field("public_key", &self.public_key())
            .finish()
    }
}

/// Reference to a key held by a secure area.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyHandle {
    alias: String,
}

impl KeyHandle {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }
}

/// The guarded key was not unlocked by an authentication ceremony.
#[derive(Debug, thiserror::Error)]
#[error("guarded key is locked, an authentication ceremony is required")]
pub struct CipherLocked;

/// Failures of the external secure key store.
#[derive(Debug, thiserror::Error)]
pub enum SecureAreaError {
    /// Key generation failed on the host platform.
    #[error("unable to generate key: {0}")]
    KeyGeneration(anyhow::Error),
    /// A cipher over a stored key could not be initialised.
    #[error("unable to initialise guarded cipher: {0}")]
    CipherInit(anyhow::Error),
}

/// A symmetric encrypt operation whose completion requires a prior
/// authentication ceremony on the underlying key.
pub trait GuardedCipher {
    /// Encrypts `plaintext`, consuming the authorization granted by the most
    /// recent ceremony. Fails with [CipherLocked] when no ceremony unlocked
    /// the key for this operation.
    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CipherLocked>;
}

/// External secure key storage.
pub trait SecureArea {
    type Cipher: GuardedCipher;

    /// Generate the ephemeral key pair for a presentation session.
    fn generate_session_key_pair(&self) -> Result<EphemeralKeyPair, SecureAreaError>;

    /// Get or create the persistent key under `alias` that demands a fresh
    /// authentication ceremony for every use. An existing entry found
    /// without ceremony gating is deleted and regenerated, so the returned
    /// key is never less protected than requested.
    fn presence_bound_key(&self, alias: &str) -> Result<KeyHandle, SecureAreaError>;

    /// New cipher over `key`, locked until a ceremony unlocks it.
    fn new_guarded_cipher(&self, key: &KeyHandle) -> Result<Self::Cipher, SecureAreaError>;
}

/// Single-use handle to a presence-gated cryptographic operation.
///
/// The holder application hands this to its authenticator flow, which
/// unlocks the underlying key on a successful ceremony; the owning session
/// later exercises the operation once to learn whether that happened.
pub struct ProofOfPresence<C> {
    cipher: Arc<Mutex<C>>,
}

impl<C> Clone for ProofOfPresence<C> {
    fn clone(&self) -> Self {
        Self {
            cipher: Arc::clone(&self.cipher),
        }
    }
}

impl<C> fmt::Debug for ProofOfPresence<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProofOfPresence")
    }
}

impl<C: GuardedCipher> ProofOfPresence<C> {
    pub(crate) fn new(cipher: C) -> Self {
        Self {
            cipher: Arc::new(Mutex::new(cipher)),
        }
    }

    pub(crate) fn with_cipher<T>(&self, f: impl FnOnce(&mut C) -> T) -> T {
        let mut cipher = self.cipher.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut cipher)
    }

    /// Performs the guarded operation. The ciphertext is discarded, only
    /// whether the key was unlocked matters.
    pub(crate) fn exercise(&self) -> bool {
        self.with_cipher(|cipher| cipher.encrypt(&[0u8; 16]).is_ok())
    }
}
