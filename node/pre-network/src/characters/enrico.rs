use color_eyre::Result;
use umbral_pre::PublicKey;

use runtime::SigningPower;

use crate::characters::{Character, PublicKeys};
use crate::types::MessageKit;

/// The data source: encrypts under a policy's public key and signs
/// every kit it produces.
pub struct Enrico {
    signing: SigningPower,
    policy_encrypting_key: PublicKey,
}

impl Enrico {
    pub fn new(policy_encrypting_key: PublicKey) -> Self {
        Self {
            signing: SigningPower::random(),
            policy_encrypting_key,
        }
    }

    pub fn with_signing(policy_encrypting_key: PublicKey, signing: SigningPower) -> Self {
        Self { signing, policy_encrypting_key }
    }

    pub fn verifying_key(&self) -> PublicKey {
        self.signing.verifying_key()
    }

    pub fn policy_encrypting_key(&self) -> PublicKey {
        self.policy_encrypting_key
    }

    pub fn encrypt_message(&self, plaintext: &[u8]) -> Result<MessageKit> {
        let kit = MessageKit::new(self.signing.signer(), &self.policy_encrypting_key, plaintext)?;
        Ok(kit)
    }
}

impl Character for Enrico {
    fn public_keys(&self) -> PublicKeys {
        PublicKeys {
            verifying_key: self.verifying_key(),
            encrypting_key: None,
        }
    }
}
