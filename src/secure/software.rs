//! Pure-software secure area.
//!
//! Keys live in process memory and the authentication ceremony is stood in
//! for by the embedding application's authenticator callback,
//! [SoftwareSecureArea::confirm_presence]. Hardware-backed key stores plug
//! in through the same [SecureArea] trait.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use aes_gcm::aead::Aead;
use aes_gcm::{Aes128Gcm, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{
    CipherLocked, EphemeralKeyPair, GuardedCipher, KeyHandle, ProofOfPresence, SecureArea,
    SecureAreaError,
};

#[derive(Zeroize, ZeroizeOnDrop)]
struct StoredKey {
    material: [u8; 16],
    #[zeroize(skip)]
    auth_per_use: bool,
}

/// In-memory key store with ceremony-gated AES-GCM ciphers.
#[derive(Default)]
pub struct SoftwareSecureArea {
    keys: Mutex<HashMap<String, StoredKey>>,
}

impl SoftwareSecureArea {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `proof` as approved, standing in for the platform authenticator
    /// completing its ceremony. The approval covers a single cipher
    /// operation.
    pub fn confirm_presence(proof: &ProofOfPresence<SoftwareGuardedCipher>) {
        proof.with_cipher(|cipher| cipher.approved = true);
    }

    fn lock_keys(&self) -> MutexGuard<'_, HashMap<String, StoredKey>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn insert_ungated(&self, alias: &str) -> [u8; 16] {
        let mut material = [0u8; 16];
        OsRng.fill_bytes(&mut material);
        self.lock_keys().insert(
            alias.to_string(),
            StoredKey {
                material,
                auth_per_use: false,
            },
        );
        material
    }

    #[cfg(test)]
    fn key_material(&self, alias: &str) -> Option<[u8; 16]> {
        self.lock_keys().get(alias).map(|key| key.material)
    }
}

impl SecureArea for SoftwareSecureArea {
    type Cipher = SoftwareGuardedCipher;

    fn generate_session_key_pair(&self) -> Result<EphemeralKeyPair, SecureAreaError> {
        Ok(EphemeralKeyPair::random())
    }

    fn presence_bound_key(&self, alias: &str) -> Result<KeyHandle, SecureAreaError> {
        let mut keys = self.lock_keys();
        let gated = keys.get(alias).map(|key| key.auth_per_use);
        if gated == Some(false) {
            // A stale entry without ceremony gating must not satisfy a gated
            // request.
            keys.remove(alias);
            tracing::warn!(alias, "replacing ungated entry with a gated key");
        }
        if gated != Some(true) {
            let mut material = [0u8; 16];
            OsRng.fill_bytes(&mut material);
            keys.insert(
                alias.to_string(),
                StoredKey {
                    material,
                    auth_per_use: true,
                },
            );
            tracing::debug!(alias, "created presence-bound key");
        }
        Ok(KeyHandle::new(alias))
    }

    fn new_guarded_cipher(&self, key: &KeyHandle) -> Result<Self::Cipher, SecureAreaError> {
        let keys = self.lock_keys();
        let stored = keys.get(key.alias()).ok_or_else(|| {
            SecureAreaError::CipherInit(anyhow::anyhow!("no key under alias {:?}", key.alias()))
        })?;
        Ok(SoftwareGuardedCipher {
            key: stored.material,
            approved: false,
        })
    }
}

/// AES-128-GCM cipher that refuses to operate until a ceremony approval is
/// granted; the approval is consumed by the operation.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SoftwareGuardedCipher {
    key: [u8; 16],
    #[zeroize(skip)]
    approved: bool,
}

impl GuardedCipher for SoftwareGuardedCipher {
    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CipherLocked> {
        if !self.approved {
            return Err(CipherLocked);
        }
        self.approved = false;
        let cipher = Aes128Gcm::new_from_slice(&self.key).map_err(|_| CipherLocked)?;
        let mut nonce = [0u8; 12];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CipherLocked)?;
        let mut out = nonce.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn locked_until_ceremony() {
        let area = SoftwareSecureArea::new();
        let key = area.presence_bound_key("test-key").unwrap();
        let mut cipher = area.new_guarded_cipher(&key).unwrap();
        assert!(cipher.encrypt(b"probe").is_err());

        cipher.approved = true;
        assert!(cipher.encrypt(b"probe").is_ok());
        // The approval covered a single operation.
        assert!(cipher.encrypt(b"probe").is_err());
    }

    #[test]
    fn ungated_entry_is_regenerated() {
        let area = SoftwareSecureArea::new();
        let stale = area.insert_ungated("shared-key");
        area.presence_bound_key("shared-key").unwrap();
        let current = area.key_material("shared-key").unwrap();
        assert_ne!(stale, current);
    }

    #[test]
    fn gated_entry_is_reused() {
        let area = SoftwareSecureArea::new();
        area.presence_bound_key("shared-key").unwrap();
        let first = area.key_material("shared-key").unwrap();
        area.presence_bound_key("shared-key").unwrap();
        assert_eq!(Some(first), area.key_material("shared-key"));
    }

    #[test]
    fn confirm_presence_unlocks_a_proof() {
        let area = SoftwareSecureArea::new();
        let key = area.presence_bound_key("test-key").unwrap();
        let proof = ProofOfPresence::new(area.new_guarded_cipher(&key).unwrap());
        assert!(!proof.exercise());

        let proof = ProofOfPresence::new(area.new_guarded_cipher(&key).unwrap());
        SoftwareSecureArea::confirm_presence(&proof);
        assert!(proof.exercise());
    }
}
