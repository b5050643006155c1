use std::fmt::Display;

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::types::Hrac;

/// Random 32-byte identifier binding a kfrag to one proxy within a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrangementId([u8; 32]);

impl ArrangementId {
    pub fn random(rng: &mut impl RngCore) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        ArrangementId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Display for ArrangementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// A proposal from a delegator to one proxy: carry one share of the
/// policy until `expiration`, for `value`. Both fields stay empty in
/// federated mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arrangement {
    pub hrac: Hrac,
    pub ursula_address: Address,
    pub arrangement_id: ArrangementId,
    pub expiration: Option<DateTime<Utc>>,
    pub value: Option<u64>,
}

impl Arrangement {
    pub fn new(
        rng: &mut impl RngCore,
        hrac: Hrac,
        ursula_address: Address,
        expiration: Option<DateTime<Utc>>,
        value: Option<u64>,
    ) -> Self {
        Self {
            hrac,
            ursula_address,
            arrangement_id: ArrangementId::random(rng),
            expiration,
            value,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiration {
            Some(expiration) => expiration <= now,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_arrangement_ids_are_unique_within_policy() {
        let mut rng = StdRng::seed_from_u64(7);
        let ids = (0..64)
            .map(|_| ArrangementId::random(&mut rng))
            .collect::<std::collections::HashSet<ArrangementId>>();
        assert_eq!(ids.len(), 64);
    }

    #[test]
    fn test_expiration_check() {
        let mut rng = StdRng::seed_from_u64(7);
        let now = Utc::now();
        let hrac_material = runtime::PreKeyMaterial::random();
        let vk = hrac_material.signing.verifying_key();
        let hrac = Hrac::new(&vk, &vk, b"label");

        let open_ended = Arrangement::new(&mut rng, hrac, Address::ZERO, None, None);
        assert!(!open_ended.is_expired(now));

        let expired = Arrangement::new(
            &mut rng,
            hrac,
            Address::ZERO,
            Some(now - chrono::Duration::hours(1)),
            Some(10),
        );
        assert!(expired.is_expired(now));
    }
}
