use std::fmt::Display;

use serde::{Deserialize, Serialize};
use umbral_pre::PublicKey;

use runtime::keccak256;

/// Hashed policy identifier:
/// keccak(delegator_verifying_key ‖ delegatee_stamp ‖ label).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hrac([u8; 32]);

impl Hrac {
    pub fn new(
        delegator_verifying_key: &PublicKey,
        delegatee_verifying_key: &PublicKey,
        label: &[u8],
    ) -> Self {
        let delegator = delegator_verifying_key.to_compressed_bytes();
        let delegatee = delegatee_verifying_key.to_compressed_bytes();
        Hrac(keccak256(&[delegator.as_ref(), delegatee.as_ref(), label]))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Display for Hrac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Treasure map locator: hex(keccak(delegator_verifying_key ‖ hrac)).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapId(String);

impl MapId {
    pub fn new(delegator_verifying_key: &PublicKey, hrac: &Hrac) -> Self {
        let delegator = delegator_verifying_key.to_compressed_bytes();
        MapId(hex::encode(keccak256(&[
            delegator.as_ref(),
            hrac.as_bytes(),
        ])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MapId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
