//! JSON DTOs for the character control surface consumed by external
//! CLI/HTTP front-ends. Binary fields travel as base64; every response
//! carries the core version string.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use color_eyre::{Result, eyre};
use serde::{Deserialize, Serialize};
use umbral_pre::PublicKey;

use crate::characters::{Character, PolicyMode, PublicKeys};
use crate::characters::alice::EnactedPolicy;
use crate::error::ProtocolError;
use crate::types::MessageKit;

pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

fn b64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

fn from_b64(value: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|e| eyre::anyhow!("invalid base64 field: {}", e))
}

fn decode_public_key(value: &str) -> Result<PublicKey> {
    let bytes = from_b64(value)?;
    PublicKey::try_from_compressed_bytes(&bytes)
        .map_err(|e| eyre::anyhow!("invalid public key field: {}", e))
}

fn encode_public_key(key: &PublicKey) -> String {
    b64(key.to_compressed_bytes().as_ref())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeysResponse {
    pub verifying_key: String,
    pub encrypting_key: Option<String>,
    pub version: String,
}

impl PublicKeysResponse {
    pub fn from_character(character: &impl Character) -> Self {
        let keys = character.public_keys();
        Self {
            verifying_key: encode_public_key(&keys.verifying_key),
            encrypting_key: keys.encrypting_key.as_ref().map(encode_public_key),
            version: CORE_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePolicyRequest {
    pub bob_verifying_key: String,
    pub bob_encrypting_key: String,
    pub label: String,
    pub m: usize,
    pub n: usize,
    pub federated: bool,
    pub expiration: Option<DateTime<Utc>>,
    pub value: Option<u64>,
    #[serde(default)]
    pub handpicked: Vec<String>,
}

impl CreatePolicyRequest {
    pub fn label_bytes(&self) -> Result<Vec<u8>> {
        from_b64(&self.label)
    }

    pub fn delegatee_keys(&self) -> Result<PublicKeys> {
        Ok(PublicKeys {
            verifying_key: decode_public_key(&self.bob_verifying_key)?,
            encrypting_key: Some(decode_public_key(&self.bob_encrypting_key)?),
        })
    }

    /// Staked mode demands expiration and value.
    pub fn mode(&self) -> Result<PolicyMode> {
        if self.federated {
            return Ok(PolicyMode::Federated);
        }
        let (Some(expiration), Some(value)) = (self.expiration, self.value) else {
            return Err(ProtocolError::InvalidArguments(
                "expiration and value are required for a staked policy".to_string(),
            )
            .into());
        };
        let handpicked = self
            .handpicked
            .iter()
            .map(|address| {
                address
                    .parse()
                    .map_err(|e| eyre::anyhow!("invalid handpicked address {}: {}", address, e))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(PolicyMode::Staked { expiration, value, handpicked })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantResponse {
    pub map_id: String,
    pub policy_encrypting_key: String,
    pub treasure_map: String,
    pub version: String,
}

impl GrantResponse {
    pub fn from_policy(policy: &EnactedPolicy) -> Result<Self> {
        Ok(Self {
            map_id: policy.map_id.to_string(),
            policy_encrypting_key: encode_public_key(&policy.policy_encrypting_key),
            treasure_map: b64(&policy.encrypted_treasure_map.to_bytes()?),
            version: CORE_VERSION.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivePolicyKeyRequest {
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivePolicyKeyResponse {
    pub policy_encrypting_key: String,
    pub version: String,
}

impl DerivePolicyKeyResponse {
    pub fn new(policy_encrypting_key: &PublicKey) -> Self {
        Self {
            policy_encrypting_key: encode_public_key(policy_encrypting_key),
            version: CORE_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeResponse {
    pub failed_revocations: usize,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinPolicyRequest {
    pub label: String,
    pub alice_verifying_key: String,
    #[serde(default)]
    pub seed_nodes: Vec<String>,
}

impl JoinPolicyRequest {
    pub fn label_bytes(&self) -> Result<Vec<u8>> {
        from_b64(&self.label)
    }

    pub fn alice_key(&self) -> Result<PublicKey> {
        decode_public_key(&self.alice_verifying_key)
    }

    pub fn seed_uris(&self) -> Result<Vec<(String, u16)>> {
        self.seed_nodes
            .iter()
            .map(|uri| {
                let (host, port) = uri.rsplit_once(':').ok_or_else(|| {
                    eyre::anyhow!("seed node {} is not host:port", uri)
                })?;
                let port = port
                    .parse::<u16>()
                    .map_err(|e| eyre::anyhow!("seed node {} has a bad port: {}", uri, e))?;
                Ok((host.to_string(), port))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveRequest {
    pub label: String,
    pub alice_verifying_key: String,
    pub enrico_verifying_key: String,
    pub message_kit: String,
}

impl RetrieveRequest {
    pub fn label_bytes(&self) -> Result<Vec<u8>> {
        from_b64(&self.label)
    }

    pub fn alice_key(&self) -> Result<PublicKey> {
        decode_public_key(&self.alice_verifying_key)
    }

    /// The data-source identity the caller expects the kit to come
    /// from; never taken from the kit itself.
    pub fn enrico_keys(&self) -> Result<PublicKeys> {
        Ok(PublicKeys {
            verifying_key: decode_public_key(&self.enrico_verifying_key)?,
            encrypting_key: None,
        })
    }

    pub fn message_kit(&self) -> Result<MessageKit> {
        let bytes = from_b64(&self.message_kit)?;
        serde_json::from_slice(&bytes).map_err(|e| eyre::anyhow!("invalid message kit: {}", e))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveResponse {
    pub cleartexts: Vec<String>,
    pub version: String,
}

impl RetrieveResponse {
    pub fn new(cleartexts: &[Box<[u8]>]) -> Self {
        Self {
            cleartexts: cleartexts.iter().map(|text| b64(text)).collect(),
            version: CORE_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptMessageRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptMessageResponse {
    pub message_kit: String,
    pub signer_verifying_key: String,
    pub version: String,
}

impl EncryptMessageResponse {
    pub fn from_kit(kit: &MessageKit) -> Result<Self> {
        let bytes = serde_json::to_vec(kit)
            .map_err(|e| eyre::anyhow!("unserializable message kit: {}", e))?;
        Ok(Self {
            message_kit: b64(&bytes),
            signer_verifying_key: encode_public_key(&kit.sender_verifying_key),
            version: CORE_VERSION.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime::PreKeyMaterial;

    #[test]
    fn test_staked_mode_requires_expiration_and_value() {
        let alice = PreKeyMaterial::random();
        let request = CreatePolicyRequest {
            bob_verifying_key: encode_public_key(&alice.signing.verifying_key()),
            bob_encrypting_key: encode_public_key(&alice.decrypting.public_key()),
            label: b64(b"label"),
            m: 2,
            n: 3,
            federated: false,
            expiration: None,
            value: None,
            handpicked: vec![],
        };
        let report = request.mode().expect_err("staked without terms must fail");
        assert!(matches!(
            report.downcast_ref::<ProtocolError>(),
            Some(ProtocolError::InvalidArguments(_))
        ));
    }

    #[test]
    fn test_message_kit_round_trips_through_base64() -> Result<()> {
        let enrico = PreKeyMaterial::random();
        let alice = PreKeyMaterial::random();
        let (_, policy_pk) = alice.delegating.derive_policy_key(b"label");

        let kit = MessageKit::new(enrico.signing.signer(), &policy_pk, b"hello")?;
        let response = EncryptMessageResponse::from_kit(&kit)?;

        let request = RetrieveRequest {
            label: b64(b"label"),
            alice_verifying_key: encode_public_key(&alice.signing.verifying_key()),
            enrico_verifying_key: encode_public_key(&enrico.signing.verifying_key()),
            message_kit: response.message_kit.clone(),
        };
        let decoded = request.message_kit()?;
        assert!(decoded.verify(&request.enrico_keys()?.verifying_key));
        assert_eq!(decoded.ciphertext, kit.ciphertext);
        Ok(())
    }

    #[test]
    fn test_seed_uri_parsing() -> Result<()> {
        let request = JoinPolicyRequest {
            label: b64(b"label"),
            alice_verifying_key: String::new(),
            seed_nodes: vec!["127.0.0.1:9151".to_string()],
        };
        assert_eq!(request.seed_uris()?, vec![("127.0.0.1".to_string(), 9151)]);
        Ok(())
    }
}
