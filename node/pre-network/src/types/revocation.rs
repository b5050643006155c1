use std::collections::HashMap;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use umbral_pre::{PublicKey, Signature, Signer};

use crate::types::{ArrangementId, TreasureMap};

const REVOCATION_PREFIX: &[u8] = b"REVOKE-";

/// A signed order to a proxy to destroy the kfrag held under one
/// arrangement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revocation {
    pub arrangement_id: ArrangementId,
    pub signature: Signature,
}

impl Revocation {
    fn signed_payload(arrangement_id: &ArrangementId) -> Vec<u8> {
        let mut message = REVOCATION_PREFIX.to_vec();
        message.extend_from_slice(arrangement_id.as_bytes());
        message
    }

    pub fn new(signer: &Signer, arrangement_id: ArrangementId) -> Self {
        let signature = signer.sign(&Self::signed_payload(&arrangement_id));
        Self { arrangement_id, signature }
    }

    pub fn verify(&self, delegator_verifying_key: &PublicKey) -> bool {
        self.signature.verify(
            delegator_verifying_key,
            &Self::signed_payload(&self.arrangement_id),
        )
    }
}

/// One revocation per treasure map destination, generated alongside the
/// policy. Holds addresses only; the policy owns everything else.
#[derive(Debug, Clone)]
pub struct RevocationKit {
    revocations: HashMap<Address, Revocation>,
}

impl RevocationKit {
    pub fn new(signer: &Signer, treasure_map: &TreasureMap) -> Self {
        let revocations = treasure_map
            .destinations
            .iter()
            .map(|(address, arrangement_id)| {
                (*address, Revocation::new(signer, *arrangement_id))
            })
            .collect();
        Self { revocations }
    }

    pub fn revokable_addresses(&self) -> Vec<Address> {
        self.revocations.keys().copied().collect()
    }

    pub fn get(&self, address: &Address) -> Option<&Revocation> {
        self.revocations.get(address)
    }

    pub fn len(&self) -> usize {
        self.revocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revocations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use runtime::PreKeyMaterial;

    use crate::types::Hrac;

    #[test]
    fn test_kit_covers_every_destination() -> color_eyre::Result<()> {
        let mut rng = StdRng::seed_from_u64(5);
        let alice = PreKeyMaterial::random();
        let vk = alice.signing.verifying_key();
        let hrac = Hrac::new(&vk, &vk, b"label");

        let destinations: Vec<(Address, ArrangementId)> = (0..4u8)
            .map(|i| (Address::repeat_byte(i + 1), ArrangementId::random(&mut rng)))
            .collect();
        let map = TreasureMap::new(2, hrac, destinations.clone())?;

        let kit = RevocationKit::new(alice.signing.signer(), &map);
        assert_eq!(kit.len(), 4);
        for (address, arrangement_id) in &destinations {
            let revocation = kit.get(address).expect("destination covered");
            assert_eq!(&revocation.arrangement_id, arrangement_id);
            assert!(revocation.verify(&vk));
        }
        Ok(())
    }

    #[test]
    fn test_revocation_rejects_foreign_signer() {
        let mut rng = StdRng::seed_from_u64(6);
        let alice = PreKeyMaterial::random();
        let mallory = PreKeyMaterial::random();

        let revocation = Revocation::new(
            alice.signing.signer(),
            ArrangementId::random(&mut rng),
        );
        assert!(revocation.verify(&alice.signing.verifying_key()));
        assert!(!revocation.verify(&mallory.signing.verifying_key()));
    }
}
