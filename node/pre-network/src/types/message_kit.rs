use serde::{Deserialize, Serialize};
use umbral_pre::{Capsule, PublicKey, Signature, Signer};

use runtime::reencrypt::encrypt_for;

use crate::error::ProtocolError;

/// What a data source hands out: the PRE ciphertext plus everything a
/// delegatee needs to check provenance and set correctness keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageKit {
    pub capsule: Capsule,
    pub ciphertext: Box<[u8]>,
    pub policy_encrypting_key: PublicKey,
    pub sender_verifying_key: PublicKey,
    pub signature: Signature,
}

impl MessageKit {
    fn signed_payload(policy_encrypting_key: &PublicKey, ciphertext: &[u8]) -> Vec<u8> {
        let mut message = policy_encrypting_key.to_compressed_bytes().to_vec();
        message.extend_from_slice(ciphertext);
        message
    }

    pub fn new(
        signer: &Signer,
        policy_encrypting_key: &PublicKey,
        plaintext: &[u8],
    ) -> Result<Self, ProtocolError> {
        let (capsule, ciphertext) = encrypt_for(policy_encrypting_key, plaintext)
            .map_err(|e| ProtocolError::Crypto(e.to_string()))?;
        let signature = signer.sign(&Self::signed_payload(policy_encrypting_key, &ciphertext));
        Ok(Self {
            capsule,
            ciphertext,
            policy_encrypting_key: *policy_encrypting_key,
            sender_verifying_key: signer.verifying_key(),
            signature,
        })
    }

    /// Check the kit against the data source it is claimed to come
    /// from. The embedded sender key is advisory only; trust comes
    /// from the caller-supplied key, so a self-consistent kit under a
    /// stranger's keypair does not pass.
    pub fn verify(&self, sender_verifying_key: &PublicKey) -> bool {
        if self.sender_verifying_key != *sender_verifying_key {
            return false;
        }
        self.signature.verify(
            sender_verifying_key,
            &Self::signed_payload(&self.policy_encrypting_key, &self.ciphertext),
        )
    }
}
