pub mod alice;
pub mod bob;
pub mod enrico;
pub mod ursula;

use serde::{Deserialize, Serialize};
use umbral_pre::{PublicKey, Signature};

use crate::error::ProtocolError;

pub use alice::{Alice, EnactedPolicy, PolicyMode, ProxySampler, RevocationFailure};
pub use bob::{Bob, BunkMapPolicy};
pub use enrico::Enrico;
pub use ursula::Ursula;

/// The public half of any character.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PublicKeys {
    pub verifying_key: PublicKey,
    pub encrypting_key: Option<PublicKey>,
}

/// The capability set every character shares.
pub trait Character {
    fn public_keys(&self) -> PublicKeys;
}

/// Check a signature claimed to come from `sender_verifying_key`.
pub fn verify_from(
    sender_verifying_key: &PublicKey,
    message: &[u8],
    signature: &Signature,
) -> Result<(), ProtocolError> {
    if !signature.verify(sender_verifying_key, message) {
        return Err(ProtocolError::InvalidSignature(
            "message was not signed by the claimed sender".to_string(),
        ));
    }
    Ok(())
}
