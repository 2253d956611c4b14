//! Proof-of-presence lifecycle for a session.

use crate::secure::{GuardedCipher, ProofOfPresence, SecureArea, SecureAreaError};

/// Keystore alias of the key shared by all presentations for presence
/// gating. Distinct from any per-credential authentication key.
pub(crate) const PRESENCE_KEY_ALIAS: &str = "identity-session-presence-auth-key";

/// Tracks the most recently issued proof of presence and the memoized
/// outcome of exercising it.
pub(crate) struct FreshnessGate<C> {
    current: Option<ProofOfPresence<C>>,
    satisfied: Option<bool>,
}

impl<C: GuardedCipher> FreshnessGate<C> {
    pub(crate) fn new() -> Self {
        Self {
            current: None,
            satisfied: None,
        }
    }

    /// Issues a new single-use proof, dropping the memoized verdict of any
    /// prior one.
    pub(crate) fn issue<A>(&mut self, area: &A) -> Result<ProofOfPresence<C>, SecureAreaError>
    where
        A: SecureArea<Cipher = C>,
    {
        let key = area.presence_bound_key(PRESENCE_KEY_ALIAS)?;
        let proof = ProofOfPresence::new(area.new_guarded_cipher(&key)?);
        self.current = Some(proof.clone());
        self.satisfied = None;
        tracing::debug!("issued new proof of presence");
        Ok(proof)
    }

    /// Whether the current proof was exercised by a successful ceremony.
    ///
    /// Evaluated at most once per issued proof; with no proof ever issued
    /// the answer is `false`.
    pub(crate) fn is_satisfied(&mut self) -> bool {
        if let Some(satisfied) = self.satisfied {
            return satisfied;
        }
        let satisfied = match &self.current {
            None => false,
            Some(proof) => proof.exercise(),
        };
        self.satisfied = Some(satisfied);
        satisfied
    }
}
