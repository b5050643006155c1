use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use umbral_pre::{Capsule, PublicKey, SecretKey, Signature, Signer};

use runtime::reencrypt::{decrypt_original, encrypt_for};

use crate::error::ProtocolError;
use crate::types::{ArrangementId, Hrac};

/// Manifest binding a policy to its proxies: one arrangement id per
/// destination, plus the re-encryption threshold. Destinations keep
/// their insertion order; that order is canonical for retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreasureMap {
    pub threshold: usize,
    pub hrac: Hrac,
    pub destinations: Vec<(Address, ArrangementId)>,
}

impl TreasureMap {
    pub fn new(
        threshold: usize,
        hrac: Hrac,
        destinations: Vec<(Address, ArrangementId)>,
    ) -> Result<Self, ProtocolError> {
        if threshold == 0 {
            return Err(ProtocolError::InvalidArguments(
                "threshold must be non-zero".to_string(),
            ));
        }
        if destinations.len() < threshold {
            return Err(ProtocolError::InvalidArguments(format!(
                "threshold {} cannot exceed the {} assigned destinations",
                threshold,
                destinations.len()
            )));
        }
        Ok(Self { threshold, hrac, destinations })
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.destinations.iter().map(|(address, _)| address)
    }

    /// Sign with the delegator's stamp and encrypt to the delegatee.
    pub fn encrypt(
        &self,
        signer: &Signer,
        recipient_encrypting_key: &PublicKey,
    ) -> Result<EncryptedTreasureMap, ProtocolError> {
        EncryptedTreasureMap::new(signer, recipient_encrypting_key, self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct AuthorizedTreasureMap {
    signature: Signature,
    treasure_map: TreasureMap,
}

impl AuthorizedTreasureMap {
    fn signed_payload(
        recipient_key: &PublicKey,
        treasure_map: &TreasureMap,
    ) -> Result<Vec<u8>, ProtocolError> {
        let mut message = recipient_key.to_compressed_bytes().to_vec();
        let map_bytes = serde_json::to_vec(treasure_map)
            .map_err(|e| ProtocolError::Crypto(format!("unserializable treasure map: {}", e)))?;
        message.extend_from_slice(&map_bytes);
        Ok(message)
    }

    fn new(
        signer: &Signer,
        recipient_key: &PublicKey,
        treasure_map: &TreasureMap,
    ) -> Result<Self, ProtocolError> {
        let message = Self::signed_payload(recipient_key, treasure_map)?;
        Ok(Self {
            signature: signer.sign(&message),
            treasure_map: treasure_map.clone(),
        })
    }

    fn verify(
        &self,
        recipient_key: &PublicKey,
        publisher_verifying_key: &PublicKey,
    ) -> Result<TreasureMap, ProtocolError> {
        let message = Self::signed_payload(recipient_key, &self.treasure_map)?;
        if !self.signature.verify(publisher_verifying_key, &message) {
            return Err(ProtocolError::InvalidSignature(
                "treasure map was not signed by the expected delegator".to_string(),
            ));
        }
        Ok(self.treasure_map.clone())
    }
}

/// A treasure map in transit: orientable only by the delegatee it was
/// encrypted to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedTreasureMap {
    capsule: Capsule,
    ciphertext: Box<[u8]>,
}

impl EncryptedTreasureMap {
    fn new(
        signer: &Signer,
        recipient_key: &PublicKey,
        treasure_map: &TreasureMap,
    ) -> Result<Self, ProtocolError> {
        let authorized = AuthorizedTreasureMap::new(signer, recipient_key, treasure_map)?;
        let plaintext = serde_json::to_vec(&authorized)
            .map_err(|e| ProtocolError::Crypto(format!("unserializable treasure map: {}", e)))?;
        let (capsule, ciphertext) = encrypt_for(recipient_key, &plaintext)
            .map_err(|e| ProtocolError::Crypto(e.to_string()))?;
        Ok(Self { capsule, ciphertext })
    }

    /// Orientation: decrypt with the delegatee's key and check the
    /// delegator's signature. Any other delegatee's key (or a tampered
    /// payload) fails `InvalidSignature`.
    pub fn orient(
        &self,
        recipient_sk: &SecretKey,
        publisher_verifying_key: &PublicKey,
    ) -> Result<TreasureMap, ProtocolError> {
        let plaintext = decrypt_original(recipient_sk, &self.capsule, &self.ciphertext)
            .map_err(|_| {
                ProtocolError::InvalidSignature(
                    "treasure map is not addressed to this delegatee".to_string(),
                )
            })?;
        let authorized = serde_json::from_slice::<AuthorizedTreasureMap>(&plaintext)
            .map_err(|e| {
                ProtocolError::InvalidSignature(format!("malformed treasure map payload: {}", e))
            })?;
        authorized.verify(&recipient_sk.public_key(), publisher_verifying_key)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self)
            .map_err(|e| ProtocolError::Crypto(format!("unserializable treasure map: {}", e)))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::InvalidSignature(format!("malformed treasure map: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use runtime::PreKeyMaterial;

    fn sample_map(rng: &mut StdRng, alice: &PreKeyMaterial, bob: &PreKeyMaterial) -> TreasureMap {
        let hrac = Hrac::new(
            &alice.signing.verifying_key(),
            &bob.signing.verifying_key(),
            b"map/label",
        );
        let destinations = (0..3u8)
            .map(|i| {
                (
                    Address::repeat_byte(i + 1),
                    ArrangementId::random(rng),
                )
            })
            .collect();
        TreasureMap::new(2, hrac, destinations).expect("valid parameters")
    }

    #[test]
    fn test_orientation_round_trip() -> color_eyre::Result<()> {
        let mut rng = StdRng::seed_from_u64(1);
        let alice = PreKeyMaterial::random();
        let bob = PreKeyMaterial::random();

        let map = sample_map(&mut rng, &alice, &bob);
        let encrypted = map.encrypt(alice.signing.signer(), &bob.decrypting.public_key())?;

        let oriented = encrypted.orient(
            bob.decrypting.secret_key(),
            &alice.signing.verifying_key(),
        )?;
        assert_eq!(oriented.threshold, map.threshold);
        assert_eq!(oriented.destinations, map.destinations);
        Ok(())
    }

    #[test]
    fn test_wrong_delegatee_cannot_orient() -> color_eyre::Result<()> {
        let mut rng = StdRng::seed_from_u64(2);
        let alice = PreKeyMaterial::random();
        let bob = PreKeyMaterial::random();
        let mallory = PreKeyMaterial::random();

        let map = sample_map(&mut rng, &alice, &bob);
        let encrypted = map.encrypt(alice.signing.signer(), &bob.decrypting.public_key())?;

        let result = encrypted.orient(
            mallory.decrypting.secret_key(),
            &alice.signing.verifying_key(),
        );
        assert!(matches!(result, Err(ProtocolError::InvalidSignature(_))));
        Ok(())
    }

    #[test]
    fn test_wrong_publisher_key_fails_signature() -> color_eyre::Result<()> {
        let mut rng = StdRng::seed_from_u64(3);
        let alice = PreKeyMaterial::random();
        let bob = PreKeyMaterial::random();
        let mallory = PreKeyMaterial::random();

        let map = sample_map(&mut rng, &alice, &bob);
        let encrypted = map.encrypt(alice.signing.signer(), &bob.decrypting.public_key())?;

        let result = encrypted.orient(
            bob.decrypting.secret_key(),
            &mallory.signing.verifying_key(),
        );
        assert!(matches!(result, Err(ProtocolError::InvalidSignature(_))));
        Ok(())
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let alice = PreKeyMaterial::random();
        let hrac = Hrac::new(
            &alice.signing.verifying_key(),
            &alice.signing.verifying_key(),
            b"label",
        );
        assert!(TreasureMap::new(0, hrac, vec![]).is_err());
    }
}
