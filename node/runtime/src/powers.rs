use std::fmt::Display;

use umbral_pre::{PublicKey, SecretKey, SecretKeyFactory, Signature, Signer};

/// A character was asked to exercise a capability it was not constructed
/// with (e.g. a stranger asked for a private key). Programmer error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerUpError(pub String);

impl std::error::Error for PowerUpError {}

impl Display for PowerUpError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "PowerUpError: {}", self.0)
    }
}

/// The stamp: signs protocol payloads on behalf of a character.
#[derive(Clone)]
pub struct SigningPower {
    signer: Signer,
}

impl SigningPower {
    pub fn new(signer: Signer) -> Self {
        Self { signer }
    }

    pub fn random() -> Self {
        Self::new(Signer::new(SecretKey::random()))
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signer.sign(message)
    }

    pub fn verifying_key(&self) -> PublicKey {
        self.signer.verifying_key()
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }
}

/// Holds the secret half of a character's encryption keypair.
#[derive(Clone)]
pub struct DecryptingPower {
    secret_key: SecretKey,
}

impl DecryptingPower {
    pub fn new(secret_key: SecretKey) -> Self {
        Self { secret_key }
    }

    pub fn random() -> Self {
        Self::new(SecretKey::random())
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret_key.public_key()
    }

    // Never leaves the character; callers decrypt through the wrappers
    // in `reencrypt`.
    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }
}

/// Derives per-label policy keypairs for a delegator.
#[derive(Clone)]
pub struct DelegatingPower {
    factory: SecretKeyFactory,
}

impl DelegatingPower {
    pub fn new(factory: SecretKeyFactory) -> Self {
        Self { factory }
    }

    pub fn random() -> Self {
        Self::new(SecretKeyFactory::random())
    }

    /// Deterministic: the same (factory, label) always yields the same
    /// policy keypair.
    pub fn derive_policy_key(&self, label: &[u8]) -> (SecretKey, PublicKey) {
        let policy_sk = self.factory.make_key(label);
        let policy_pk = policy_sk.public_key();
        (policy_sk, policy_pk)
    }
}

/// Explicit capability record populated at character construction.
/// Strangers (characters known only through their public halves) carry
/// no powers at all.
#[derive(Clone, Default)]
pub struct CharacterPowers {
    signing: Option<SigningPower>,
    decrypting: Option<DecryptingPower>,
    delegating: Option<DelegatingPower>,
}

impl CharacterPowers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signing(mut self, power: SigningPower) -> Self {
        self.signing = Some(power);
        self
    }

    pub fn with_decrypting(mut self, power: DecryptingPower) -> Self {
        self.decrypting = Some(power);
        self
    }

    pub fn with_delegating(mut self, power: DelegatingPower) -> Self {
        self.delegating = Some(power);
        self
    }

    pub fn signing(&self) -> Result<&SigningPower, PowerUpError> {
        self.signing
            .as_ref()
            .ok_or_else(|| PowerUpError("character has no signing power".to_string()))
    }

    pub fn decrypting(&self) -> Result<&DecryptingPower, PowerUpError> {
        self.decrypting
            .as_ref()
            .ok_or_else(|| PowerUpError("character has no decrypting power".to_string()))
    }

    pub fn delegating(&self) -> Result<&DelegatingPower, PowerUpError> {
        self.delegating
            .as_ref()
            .ok_or_else(|| PowerUpError("character has no delegating power".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_key_derivation_is_deterministic() {
        let power = DelegatingPower::random();
        let (_, pk1) = power.derive_policy_key(b"some/label");
        let (_, pk2) = power.derive_policy_key(b"some/label");
        let (_, other) = power.derive_policy_key(b"other/label");
        assert_eq!(pk1, pk2);
        assert_ne!(pk1, other);
    }

    #[test]
    fn test_stranger_has_no_powers() {
        let stranger = CharacterPowers::new();
        assert!(stranger.signing().is_err());
        assert!(stranger.decrypting().is_err());
        assert!(stranger.delegating().is_err());
    }

    #[test]
    fn test_sign_and_verify() {
        let power = SigningPower::random();
        let signature = power.sign(b"interface info");
        assert!(signature.verify(&power.verifying_key(), b"interface info"));
        assert!(!signature.verify(&power.verifying_key(), b"tampered"));
    }
}
