use std::collections::HashMap;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use umbral_pre::{Capsule, CapsuleFrag, PublicKey, Signature, Signer};

use runtime::keccak256;

use crate::error::ProtocolError;
use crate::types::ArrangementId;

/// Stable identifier of a capsule, used to key per-proxy request
/// history.
pub fn capsule_fingerprint(capsule: &Capsule) -> Result<String, ProtocolError> {
    let bytes = serde_json::to_vec(capsule)
        .map_err(|e| ProtocolError::Crypto(format!("unserializable capsule: {}", e)))?;
    Ok(hex::encode(keccak256(&[&bytes])))
}

/// A signed request from a delegatee to one proxy: re-encrypt these
/// capsules under the kfrag stored for `arrangement_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOrder {
    pub arrangement_id: ArrangementId,
    pub capsules: Vec<Capsule>,
    pub ursula_address: Address,
    pub delegatee_verifying_key: PublicKey,
    pub signature: Signature,
}

impl WorkOrder {
    fn signed_payload(
        arrangement_id: &ArrangementId,
        capsules: &[Capsule],
    ) -> Result<Vec<u8>, ProtocolError> {
        let mut message = arrangement_id.as_bytes().to_vec();
        let capsule_bytes = serde_json::to_vec(capsules)
            .map_err(|e| ProtocolError::Crypto(format!("unserializable capsules: {}", e)))?;
        message.extend_from_slice(&capsule_bytes);
        Ok(message)
    }

    pub fn new(
        signer: &Signer,
        arrangement_id: ArrangementId,
        capsules: Vec<Capsule>,
        ursula_address: Address,
    ) -> Result<Self, ProtocolError> {
        let signature = signer.sign(&Self::signed_payload(&arrangement_id, &capsules)?);
        Ok(Self {
            arrangement_id,
            capsules,
            ursula_address,
            delegatee_verifying_key: signer.verifying_key(),
            signature,
        })
    }

    pub fn verify(&self) -> Result<bool, ProtocolError> {
        let payload = Self::signed_payload(&self.arrangement_id, &self.capsules)?;
        Ok(self.signature.verify(&self.delegatee_verifying_key, &payload))
    }
}

/// Per-proxy request history, one entry per (proxy, capsule) pair:
/// a pair is requested at most once until its result is observed.
#[derive(Debug, Default)]
pub struct WorkOrderHistory {
    by_ursula: HashMap<Address, HashMap<String, WorkOrder>>,
}

impl WorkOrderHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, ursula: &Address, fingerprint: &str) -> bool {
        self.by_ursula
            .get(ursula)
            .is_some_and(|orders| orders.contains_key(fingerprint))
    }

    pub fn record(&mut self, ursula: Address, fingerprint: String, work_order: WorkOrder) {
        self.by_ursula
            .entry(ursula)
            .or_default()
            .insert(fingerprint, work_order);
    }

    pub fn orders_for(&self, ursula: &Address) -> Option<&HashMap<String, WorkOrder>> {
        self.by_ursula.get(ursula)
    }
}

/// What a delegatee walks away with when a proxy misbehaves: the exact
/// capsule and cfrag plus the offender, suitable for external
/// adjudication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndisputableEvidence {
    pub capsule: Capsule,
    pub cfrag: CapsuleFrag,
    pub offending_address: Address,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use runtime::PreKeyMaterial;
    use runtime::reencrypt::encrypt_for;

    #[test]
    fn test_work_order_signature() -> Result<(), ProtocolError> {
        let mut rng = StdRng::seed_from_u64(11);
        let bob = PreKeyMaterial::random();
        let alice = PreKeyMaterial::random();
        let (_, policy_pk) = alice.delegating.derive_policy_key(b"label");
        let (capsule, _) = encrypt_for(&policy_pk, b"hi").map_err(|e| {
            ProtocolError::Crypto(e.to_string())
        })?;

        let order = WorkOrder::new(
            bob.signing.signer(),
            ArrangementId::random(&mut rng),
            vec![capsule],
            Address::repeat_byte(1),
        )?;
        assert!(order.verify()?);

        let mut forged = order.clone();
        forged.arrangement_id = ArrangementId::random(&mut rng);
        assert!(!forged.verify()?);
        Ok(())
    }

    #[test]
    fn test_history_keys_per_proxy_and_capsule() -> Result<(), ProtocolError> {
        let mut rng = StdRng::seed_from_u64(12);
        let bob = PreKeyMaterial::random();
        let alice = PreKeyMaterial::random();
        let (_, policy_pk) = alice.delegating.derive_policy_key(b"label");

        let (capsule_a, _) = encrypt_for(&policy_pk, b"a")
            .map_err(|e| ProtocolError::Crypto(e.to_string()))?;
        let (capsule_b, _) = encrypt_for(&policy_pk, b"b")
            .map_err(|e| ProtocolError::Crypto(e.to_string()))?;
        let fp_a = capsule_fingerprint(&capsule_a)?;
        let fp_b = capsule_fingerprint(&capsule_b)?;
        assert_ne!(fp_a, fp_b);

        let ursula = Address::repeat_byte(1);
        let other = Address::repeat_byte(2);
        let order = WorkOrder::new(
            bob.signing.signer(),
            ArrangementId::random(&mut rng),
            vec![capsule_a],
            ursula,
        )?;

        let mut history = WorkOrderHistory::new();
        history.record(ursula, fp_a.clone(), order);

        assert!(history.contains(&ursula, &fp_a));
        // a different capsule against the same proxy is still fair game
        assert!(!history.contains(&ursula, &fp_b));
        // and so is the same capsule against a different proxy
        assert!(!history.contains(&other, &fp_a));
        Ok(())
    }
}
