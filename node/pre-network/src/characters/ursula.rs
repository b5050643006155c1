use std::collections::HashMap;
use std::fmt::Display;

use alloy_primitives::Address;
use chrono::Utc;
use color_eyre::{Result, eyre};
use umbral_pre::{CapsuleFrag, PublicKey, VerifiedKeyFrag};

use runtime::{CharacterPowers, DecryptingPower, SigningPower};
use runtime::reencrypt::reencrypt_capsule;

use crate::types::{
    Arrangement, ArrangementId, EncryptedTreasureMap, KFragPayload, MapId, NOT_SIGNED,
    NodeRecord, RestInterface, Revocation, WorkOrder, address_from_verifying_key,
};

/// Published treasure maps larger than this are refused.
pub const MAX_TREASURE_MAP_BYTES: usize = 50 * 1024;

/// Failures a proxy handler reports back over the REST surface.
/// The transport maps each variant to its status code.
#[derive(Debug, Clone)]
pub enum HandlerError {
    Malformed(String),
    NotFound(String),
    Conflict(String),
    TooLarge(String),
}

impl std::error::Error for HandlerError {}

impl Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            HandlerError::Malformed(msg) => write!(f, "malformed request: {}", msg),
            HandlerError::NotFound(msg) => write!(f, "not found: {}", msg),
            HandlerError::Conflict(msg) => write!(f, "conflict: {}", msg),
            HandlerError::TooLarge(msg) => write!(f, "too large: {}", msg),
        }
    }
}

struct StoredKFrag {
    verified: VerifiedKeyFrag,
    verifying_key: PublicKey,
}

/// The proxy's working set: kfrags keyed by arrangement, published
/// maps, and every work order it has served (kept for dispute).
#[derive(Default)]
struct UrsulaDatastore {
    pending_arrangements: HashMap<ArrangementId, Arrangement>,
    kfrags: HashMap<ArrangementId, StoredKFrag>,
    treasure_maps: HashMap<MapId, Vec<u8>>,
    work_orders_witnessed: Vec<WorkOrder>,
}

/// The proxy character. Serves re-encryption for arrangements it
/// accepted; the kfrag itself is never released.
pub struct Ursula {
    signing: SigningPower,
    decrypting: DecryptingPower,
    record: NodeRecord,
    datastore: UrsulaDatastore,
    pub suspicious_activities_witnessed: Vec<String>,
}

impl Ursula {
    /// Boot a federated proxy: self-sign a TLS certificate whose CN is
    /// the canonical address, then sign the REST interface into the
    /// node record.
    pub fn new_federated(
        powers: CharacterPowers,
        host: &str,
        port: u16,
        domains: Vec<String>,
    ) -> Result<Self> {
        Self::new(powers, host, port, domains, NOT_SIGNED.to_vec())
    }

    /// Boot a staked proxy: `identity_evidence` is the on-chain
    /// countersignature over the verifying key, produced externally.
    pub fn new(
        powers: CharacterPowers,
        host: &str,
        port: u16,
        domains: Vec<String>,
        identity_evidence: Vec<u8>,
    ) -> Result<Self> {
        let signing = powers.signing()?.clone();
        let decrypting = powers.decrypting()?.clone();

        let canonical_address = address_from_verifying_key(&signing.verifying_key());
        let certificate_pem =
            self_signed_certificate(host, &canonical_address.to_checksum(None))?;

        let timestamp = Utc::now().timestamp() as u32;
        let record = NodeRecord::new_signed(
            signing.signer(),
            canonical_address,
            domains,
            timestamp,
            identity_evidence,
            decrypting.public_key(),
            certificate_pem,
            RestInterface::new(host, port),
        );

        Ok(Self {
            signing,
            decrypting,
            record,
            datastore: UrsulaDatastore::default(),
            suspicious_activities_witnessed: Vec::new(),
        })
    }

    pub fn address(&self) -> Address {
        self.record.canonical_address
    }

    pub fn node_record(&self) -> NodeRecord {
        self.record.clone()
    }

    pub fn verifying_key(&self) -> PublicKey {
        self.signing.verifying_key()
    }

    pub fn encrypting_key(&self) -> PublicKey {
        self.decrypting.public_key()
    }

    pub fn work_orders_witnessed(&self) -> &[WorkOrder] {
        &self.datastore.work_orders_witnessed
    }

    /// POST /consider_arrangement.
    pub fn consider_arrangement(&mut self, arrangement: &Arrangement) -> bool {
        if arrangement.is_expired(Utc::now()) {
            tracing::debug!("refusing expired arrangement {}", arrangement.arrangement_id);
            return false;
        }
        if self
            .datastore
            .pending_arrangements
            .contains_key(&arrangement.arrangement_id)
            || self.datastore.kfrags.contains_key(&arrangement.arrangement_id)
        {
            return false;
        }
        self.datastore
            .pending_arrangements
            .insert(arrangement.arrangement_id, arrangement.clone());
        true
    }

    /// POST /kFrag/{arrangement_id}.
    pub fn store_kfrag(
        &mut self,
        arrangement_id: &ArrangementId,
        payload: &KFragPayload,
    ) -> Result<(), HandlerError> {
        let pending = self
            .datastore
            .pending_arrangements
            .get(arrangement_id)
            .ok_or_else(|| {
                HandlerError::Conflict(format!("no accepted arrangement {}", arrangement_id))
            })?;

        if pending.hrac != payload.hrac {
            return Err(HandlerError::Conflict(format!(
                "kfrag hrac {} does not match arrangement {}",
                payload.hrac, pending.hrac
            )));
        }
        if self.datastore.kfrags.contains_key(arrangement_id) {
            return Err(HandlerError::Conflict(format!(
                "arrangement {} already holds a kfrag",
                arrangement_id
            )));
        }

        let verified = payload.verify().map_err(|e| {
            self.suspicious_activities_witnessed
                .push(format!("unverifiable kfrag for {}: {}", arrangement_id, e));
            HandlerError::Malformed(e.to_string())
        })?;

        self.datastore.kfrags.insert(
            *arrangement_id,
            StoredKFrag {
                verified,
                verifying_key: payload.verifying_key,
            },
        );
        Ok(())
    }

    /// POST /treasure_map/{map_id}.
    pub fn store_treasure_map(
        &mut self,
        map_id: &MapId,
        map_bytes: &[u8],
    ) -> Result<(), HandlerError> {
        if map_bytes.len() > MAX_TREASURE_MAP_BYTES {
            return Err(HandlerError::TooLarge(format!(
                "treasure map of {} bytes exceeds the {} byte cap",
                map_bytes.len(),
                MAX_TREASURE_MAP_BYTES
            )));
        }
        EncryptedTreasureMap::from_bytes(map_bytes)
            .map_err(|e| HandlerError::Malformed(e.to_string()))?;
        self.datastore
            .treasure_maps
            .insert(map_id.clone(), map_bytes.to_vec());
        Ok(())
    }

    /// GET /treasure_map/{map_id}.
    pub fn treasure_map(&self, map_id: &MapId) -> Option<Vec<u8>> {
        self.datastore.treasure_maps.get(map_id).cloned()
    }

    /// POST /reencrypt. Looks up the kfrag under the order's
    /// arrangement and re-encrypts each capsule. After revocation the
    /// lookup fails with NotFound.
    pub fn reencrypt_work_order(
        &mut self,
        work_order: &WorkOrder,
    ) -> Result<Vec<CapsuleFrag>, HandlerError> {
        let signed = work_order
            .verify()
            .map_err(|e| HandlerError::Malformed(e.to_string()))?;
        if !signed {
            return Err(HandlerError::Malformed(
                "work order signature does not verify".to_string(),
            ));
        }

        let stored = self
            .datastore
            .kfrags
            .get(&work_order.arrangement_id)
            .ok_or_else(|| {
                HandlerError::NotFound(format!(
                    "no kfrag under arrangement {}",
                    work_order.arrangement_id
                ))
            })?;

        let cfrags = work_order
            .capsules
            .iter()
            .map(|capsule| reencrypt_capsule(capsule, stored.verified.clone()).unverify())
            .collect::<Vec<CapsuleFrag>>();

        self.datastore.work_orders_witnessed.push(work_order.clone());
        Ok(cfrags)
    }

    /// DELETE /kFrag/{arrangement_id}.
    pub fn revoke_arrangement(&mut self, revocation: &Revocation) -> Result<(), HandlerError> {
        let stored = self
            .datastore
            .kfrags
            .get(&revocation.arrangement_id)
            .ok_or_else(|| {
                HandlerError::NotFound(format!(
                    "no kfrag under arrangement {}",
                    revocation.arrangement_id
                ))
            })?;

        if !revocation.verify(&stored.verifying_key) {
            self.suspicious_activities_witnessed.push(format!(
                "revocation for {} not signed by the policy delegator",
                revocation.arrangement_id
            ));
            return Err(HandlerError::Malformed(
                "revocation signature does not verify".to_string(),
            ));
        }

        self.datastore.kfrags.remove(&revocation.arrangement_id);
        self.datastore
            .pending_arrangements
            .remove(&revocation.arrangement_id);
        tracing::info!("revoked arrangement {}", revocation.arrangement_id);
        Ok(())
    }
}

fn self_signed_certificate(host: &str, common_name: &str) -> Result<Vec<u8>> {
    let mut params = rcgen::CertificateParams::new(vec![host.to_string()])
        .map_err(|e| eyre::anyhow!("certificate params: {}", e))?;
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, common_name.to_string());
    let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
        .map_err(|e| eyre::anyhow!("certificate keypair: {}", e))?;
    let certificate = params
        .self_signed(&key_pair)
        .map_err(|e| eyre::anyhow!("certificate signing: {}", e))?;
    Ok(certificate.pem().into_bytes())
}
