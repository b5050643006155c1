use color_eyre::{Result, eyre};
use umbral_pre::{SecretKey, SecretKeyFactory, Signer};
pub use umbral_pre::{
    Capsule,
    CapsuleFrag,
    KeyFrag,
    PublicKey,
    Signature,
    VerifiedCapsuleFrag,
    VerifiedKeyFrag,
};

use crate::digest::keccak256;
use crate::powers::{CharacterPowers, DecryptingPower, DelegatingPower, SigningPower};

/// The full private key material of a character: stamp, decryption key
/// and the delegating root from which policy keys are derived.
#[derive(Clone)]
pub struct PreKeyMaterial {
    pub signing: SigningPower,
    pub decrypting: DecryptingPower,
    pub delegating: DelegatingPower,
}

impl PreKeyMaterial {
    pub fn random() -> Self {
        Self {
            signing: SigningPower::random(),
            decrypting: DecryptingPower::random(),
            delegating: DelegatingPower::random(),
        }
    }

    /// Deterministic key material, all three powers derived from one seed.
    /// The seed is stretched to the factory's required entropy size.
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        let randomness = stretch_seed(seed, SecretKeyFactory::seed_size());
        let factory = SecretKeyFactory::from_secure_randomness(&randomness)
            .map_err(|e| eyre::anyhow!("invalid key seed: {}", e))?;

        let signing = SigningPower::new(Signer::new(factory.make_key(b"signing")));
        let decrypting = DecryptingPower::new(factory.make_key(b"decrypting"));
        let delegating = DelegatingPower::new(factory);

        Ok(Self { signing, decrypting, delegating })
    }

    /// The full capability record of a character that owns this
    /// material.
    pub fn into_powers(self) -> CharacterPowers {
        CharacterPowers::new()
            .with_signing(self.signing)
            .with_decrypting(self.decrypting)
            .with_delegating(self.delegating)
    }
}

// Keccak in counter mode, enough for test seeds and boot-time identities.
fn stretch_seed(seed: &[u8], size: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(size);
    let mut counter: u8 = 0;
    while out.len() < size {
        out.extend_from_slice(&keccak256(&[seed, &[counter]]));
        counter += 1;
    }
    out.truncate(size);
    out
}

/// Generate the n re-encryption key fragments of a policy.
///
/// Any `threshold` of the returned kfrags suffice to re-encrypt a capsule
/// for the receiving key. Delegating and receiving keys are signed into
/// each kfrag so proxies can verify provenance before storing one.
pub fn generate_policy_kfrags(
    delegating_sk: &SecretKey,
    receiving_pk: &PublicKey,
    signer: &Signer,
    threshold: usize,
    shares: usize,
) -> Result<Box<[VerifiedKeyFrag]>> {
    if threshold < 1 || threshold > shares {
        return Err(eyre::anyhow!(
            "invalid policy parameters: threshold {} of {} shares",
            threshold,
            shares
        ));
    }

    let verified_kfrags = umbral_pre::generate_kfrags(
        delegating_sk,
        receiving_pk,
        signer,
        threshold,
        shares,
        true, // sign_delegating_key
        true, // sign_receiving_key
    );

    Ok(verified_kfrags)
}

pub fn encrypt_for(policy_pk: &PublicKey, plaintext: &[u8]) -> Result<(Capsule, Box<[u8]>)> {
    umbral_pre::encrypt(policy_pk, plaintext).map_err(|e| eyre::anyhow!(e.to_string()))
}

/// Pure re-encryption of a capsule under one verified kfrag.
pub fn reencrypt_capsule(capsule: &Capsule, kfrag: VerifiedKeyFrag) -> VerifiedCapsuleFrag {
    umbral_pre::reencrypt(capsule, kfrag)
}

/// Check a kfrag received over the wire against the policy keys.
/// Returns `None` when the correctness proof rejects.
pub fn verify_kfrag(
    kfrag: &KeyFrag,
    verifying_pk: &PublicKey,
    delegating_pk: &PublicKey,
    receiving_pk: &PublicKey,
) -> Option<VerifiedKeyFrag> {
    kfrag
        .clone()
        .verify(verifying_pk, Some(delegating_pk), Some(receiving_pk))
        .ok()
}

/// Check a cfrag returned by a proxy against the capsule's correctness
/// keys. Returns `None` when the correctness proof rejects, in which case
/// the caller assembles misbehavior evidence from its own copies.
pub fn verify_cfrag(
    cfrag: &CapsuleFrag,
    capsule: &Capsule,
    verifying_pk: &PublicKey,
    delegating_pk: &PublicKey,
    receiving_pk: &PublicKey,
) -> Option<VerifiedCapsuleFrag> {
    cfrag
        .clone()
        .verify(capsule, verifying_pk, delegating_pk, receiving_pk)
        .ok()
}

/// Open a capsule with at least `threshold` verified cfrags attached and
/// decrypt the ciphertext.
pub fn decrypt_reencrypted(
    receiving_sk: &SecretKey,
    delegating_pk: &PublicKey,
    capsule: &Capsule,
    verified_cfrags: impl IntoIterator<Item = VerifiedCapsuleFrag>,
    ciphertext: &[u8],
) -> Result<Box<[u8]>> {
    umbral_pre::decrypt_reencrypted(
        receiving_sk,
        delegating_pk,
        capsule,
        verified_cfrags,
        ciphertext,
    )
    .map_err(|e| eyre::anyhow!(e.to_string()))
}

pub fn decrypt_original(
    receiving_sk: &SecretKey,
    capsule: &Capsule,
    ciphertext: &[u8],
) -> Result<Box<[u8]>> {
    umbral_pre::decrypt_original(receiving_sk, capsule, ciphertext)
        .map_err(|e| eyre::anyhow!(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reencryption_round_trip() -> Result<()> {
        let plaintext = b"to be or not to be";

        let alice = PreKeyMaterial::random();
        let bob = PreKeyMaterial::random();

        let (policy_sk, policy_pk) = alice.delegating.derive_policy_key(b"test/label");
        let (capsule, ciphertext) = encrypt_for(&policy_pk, plaintext)?;

        let kfrags = generate_policy_kfrags(
            &policy_sk,
            &bob.decrypting.public_key(),
            alice.signing.signer(),
            2,
            3,
        )?;
        assert_eq!(kfrags.len(), 3);

        // Simulate network transfer through two proxies.
        let cfrags = kfrags
            .iter()
            .take(2)
            .map(|kfrag| reencrypt_capsule(&capsule, kfrag.clone()).unverify())
            .collect::<Vec<CapsuleFrag>>();

        let verified = cfrags
            .iter()
            .map(|cfrag| {
                verify_cfrag(
                    cfrag,
                    &capsule,
                    &alice.signing.verifying_key(),
                    &policy_pk,
                    &bob.decrypting.public_key(),
                )
                .expect("cfrag from an honest proxy verifies")
            })
            .collect::<Vec<VerifiedCapsuleFrag>>();

        let decrypted = decrypt_reencrypted(
            bob.decrypting.secret_key(),
            &policy_pk,
            &capsule,
            verified,
            &ciphertext,
        )?;
        assert_eq!(&decrypted as &[u8], plaintext);

        Ok(())
    }

    #[test]
    fn test_below_threshold_cannot_decrypt() -> Result<()> {
        let alice = PreKeyMaterial::random();
        let bob = PreKeyMaterial::random();

        let (policy_sk, policy_pk) = alice.delegating.derive_policy_key(b"test/label");
        let (capsule, ciphertext) = encrypt_for(&policy_pk, b"secret")?;

        let kfrags = generate_policy_kfrags(
            &policy_sk,
            &bob.decrypting.public_key(),
            alice.signing.signer(),
            2,
            3,
        )?;

        let one_cfrag = vec![reencrypt_capsule(&capsule, kfrags[0].clone())];
        let result = decrypt_reencrypted(
            bob.decrypting.secret_key(),
            &policy_pk,
            &capsule,
            one_cfrag,
            &ciphertext,
        );
        assert!(result.is_err());

        Ok(())
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let alice = PreKeyMaterial::random();
        let bob = PreKeyMaterial::random();
        let (policy_sk, _) = alice.delegating.derive_policy_key(b"label");

        let zero = generate_policy_kfrags(
            &policy_sk,
            &bob.decrypting.public_key(),
            alice.signing.signer(),
            0,
            3,
        );
        assert!(zero.is_err());

        let above = generate_policy_kfrags(
            &policy_sk,
            &bob.decrypting.public_key(),
            alice.signing.signer(),
            4,
            3,
        );
        assert!(above.is_err());
    }

    #[test]
    fn test_seeded_material_is_deterministic() -> Result<()> {
        let a = PreKeyMaterial::from_seed(b"node-seed-1")?;
        let b = PreKeyMaterial::from_seed(b"node-seed-1")?;
        let c = PreKeyMaterial::from_seed(b"node-seed-2")?;

        assert_eq!(a.signing.verifying_key(), b.signing.verifying_key());
        assert_eq!(a.decrypting.public_key(), b.decrypting.public_key());
        assert_ne!(a.signing.verifying_key(), c.signing.verifying_key());
        Ok(())
    }
}
