use serde::{Deserialize, Serialize};
use umbral_pre::{KeyFrag, PublicKey, VerifiedKeyFrag};

use runtime::reencrypt::verify_kfrag;

use crate::error::ProtocolError;
use crate::types::Hrac;

/// What a delegator delivers to a proxy for an accepted arrangement.
/// Carries the policy keys so the proxy can verify the kfrag's
/// provenance before storing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KFragPayload {
    pub hrac: Hrac,
    pub kfrag: KeyFrag,
    pub delegating_key: PublicKey,
    pub receiving_key: PublicKey,
    pub verifying_key: PublicKey,
}

impl KFragPayload {
    pub fn new(
        hrac: Hrac,
        verified: &VerifiedKeyFrag,
        delegating_key: PublicKey,
        receiving_key: PublicKey,
        verifying_key: PublicKey,
    ) -> Self {
        Self {
            hrac,
            kfrag: verified.clone().unverify(),
            delegating_key,
            receiving_key,
            verifying_key,
        }
    }

    /// Re-verify the kfrag against the keys it claims to serve.
    pub fn verify(&self) -> Result<VerifiedKeyFrag, ProtocolError> {
        verify_kfrag(
            &self.kfrag,
            &self.verifying_key,
            &self.delegating_key,
            &self.receiving_key,
        )
        .ok_or_else(|| {
            ProtocolError::Crypto("kfrag does not verify against its policy keys".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime::PreKeyMaterial;
    use runtime::reencrypt::generate_policy_kfrags;

    #[test]
    fn test_payload_verifies_honest_kfrag() -> color_eyre::Result<()> {
        let alice = PreKeyMaterial::random();
        let bob = PreKeyMaterial::random();
        let (policy_sk, policy_pk) = alice.delegating.derive_policy_key(b"label");
        let bob_pk = bob.decrypting.public_key();
        let alice_vk = alice.signing.verifying_key();
        let hrac = Hrac::new(&alice_vk, &bob.signing.verifying_key(), b"label");

        let kfrags =
            generate_policy_kfrags(&policy_sk, &bob_pk, alice.signing.signer(), 2, 3)?;

        let payload = KFragPayload::new(hrac, &kfrags[0], policy_pk, bob_pk, alice_vk);
        assert!(payload.verify().is_ok());
        Ok(())
    }

    #[test]
    fn test_payload_rejects_mismatched_policy_keys() -> color_eyre::Result<()> {
        let alice = PreKeyMaterial::random();
        let bob = PreKeyMaterial::random();
        let mallory = PreKeyMaterial::random();
        let (policy_sk, _) = alice.delegating.derive_policy_key(b"label");
        let bob_pk = bob.decrypting.public_key();
        let alice_vk = alice.signing.verifying_key();
        let hrac = Hrac::new(&alice_vk, &bob.signing.verifying_key(), b"label");

        let kfrags =
            generate_policy_kfrags(&policy_sk, &bob_pk, alice.signing.signer(), 2, 3)?;

        // claim the kfrag delegates from mallory's policy key
        let payload = KFragPayload::new(
            hrac,
            &kfrags[0],
            mallory.decrypting.public_key(),
            bob_pk,
            alice_vk,
        );
        assert!(payload.verify().is_err());
        Ok(())
    }
}
