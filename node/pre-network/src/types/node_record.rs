use alloy_primitives::Address;
use umbral_pre::{PublicKey, Signature, Signer};

use runtime::keccak256;

use crate::error::ProtocolError;
use crate::types::codec::{Cursor, put_u16, put_u32, put_vlb};

/// Highest record version this implementation understands.
pub const LEARNER_VERSION: u16 = 1;

/// Identity evidence sentinel for federated (non-staking) nodes.
pub const NOT_SIGNED: &[u8] = b"NOT_SIGNED";

/// External attestation of a staked node identity. The on-chain check
/// itself lives outside this crate; decentralized-mode verification
/// requires injecting an implementation.
pub trait StakeVerifier: Send + Sync {
    fn verify_identity(&self, verifying_key: &PublicKey, evidence: &[u8]) -> bool;
}

/// Where a proxy serves its REST interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestInterface {
    pub host: String,
    pub port: u16,
}

impl RestInterface {
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    pub fn uri(&self) -> String {
        format!("https://{}:{}", self.host, self.port)
    }

    // Canonical serialization covered by the interface signature.
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.host.as_bytes().to_vec();
        out.extend_from_slice(&self.port.to_be_bytes());
        out
    }
}

/// Self-describing, signed, versioned proxy identity. The binary form
/// produced by `to_bytes` is the sole on-the-wire representation.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub version: u16,
    pub canonical_address: Address,
    pub domains: Vec<String>,
    pub timestamp: u32,
    pub interface_signature: Signature,
    pub identity_evidence: Vec<u8>,
    pub verifying_key: PublicKey,
    pub encrypting_key: PublicKey,
    pub certificate_pem: Vec<u8>,
    pub rest_interface: RestInterface,
}

/// Canonical node address, derived from the verifying key the way
/// account addresses are derived from public keys.
pub fn address_from_verifying_key(verifying_key: &PublicKey) -> Address {
    let compressed = verifying_key.to_compressed_bytes();
    let digest = keccak256(&[compressed.as_ref()]);
    Address::from_slice(&digest[12..32])
}

fn nickname(address: &Address) -> String {
    let checksum = address.to_checksum(None);
    format!("{}..{}", &checksum[..10], &checksum[checksum.len() - 4..])
}

fn interface_payload(rest_interface: &RestInterface, timestamp: u32) -> Vec<u8> {
    let mut payload = rest_interface.to_bytes();
    payload.extend_from_slice(&timestamp.to_be_bytes());
    payload
}

impl NodeRecord {
    /// Build and sign a record at node boot. The signer is the node's
    /// stamp; its verifying key becomes part of the record.
    #[allow(clippy::too_many_arguments)]
    pub fn new_signed(
        signer: &Signer,
        canonical_address: Address,
        domains: Vec<String>,
        timestamp: u32,
        identity_evidence: Vec<u8>,
        encrypting_key: PublicKey,
        certificate_pem: Vec<u8>,
        rest_interface: RestInterface,
    ) -> Self {
        let interface_signature = signer.sign(&interface_payload(&rest_interface, timestamp));
        Self {
            version: LEARNER_VERSION,
            canonical_address,
            domains,
            timestamp,
            interface_signature,
            identity_evidence,
            verifying_key: signer.verifying_key(),
            encrypting_key,
            certificate_pem,
            rest_interface,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::new();
        put_u16(&mut out, self.version);
        out.extend_from_slice(self.canonical_address.as_slice());

        let mut domains = Vec::new();
        for domain in &self.domains {
            put_vlb(&mut domains, domain.as_bytes())?;
        }
        put_vlb(&mut out, &domains)?;

        put_u32(&mut out, self.timestamp);
        put_vlb(&mut out, &self.interface_signature.to_der_bytes())?;
        put_vlb(&mut out, &self.identity_evidence)?;
        out.extend_from_slice(self.verifying_key.to_compressed_bytes().as_ref());
        out.extend_from_slice(self.encrypting_key.to_compressed_bytes().as_ref());
        put_vlb(&mut out, &self.certificate_pem)?;
        put_vlb(&mut out, self.rest_interface.host.as_bytes())?;
        put_u16(&mut out, self.rest_interface.port);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = Cursor::new(bytes);
        let version = cursor.u16_be()?;

        if version > LEARNER_VERSION {
            // Salvage the address for diagnostics when the payload is
            // long enough to carry one.
            let nickname = cursor
                .take(20)
                .ok()
                .map(|addr| nickname(&Address::from_slice(addr)));
            return Err(ProtocolError::FromTheFuture { version, nickname });
        }

        let canonical_address = Address::from_slice(cursor.take(20)?);

        let domains_bytes = cursor.vlb()?;
        let mut domains = Vec::new();
        let mut domains_cursor = Cursor::new(domains_bytes);
        while domains_cursor.remaining() > 0 {
            let domain = domains_cursor.vlb()?;
            domains.push(String::from_utf8(domain.to_vec()).map_err(|_| {
                ProtocolError::InvalidNode("domain is not valid utf-8".to_string())
            })?);
        }

        let timestamp = cursor.u32_be()?;

        let signature_der = cursor.vlb()?;
        let interface_signature = Signature::try_from_der_bytes(signature_der).map_err(|e| {
            ProtocolError::InvalidNode(format!("malformed interface signature: {}", e))
        })?;

        let identity_evidence = cursor.vlb()?.to_vec();

        let verifying_key = PublicKey::try_from_compressed_bytes(cursor.take(33)?)
            .map_err(|e| ProtocolError::InvalidNode(format!("malformed verifying key: {}", e)))?;
        let encrypting_key = PublicKey::try_from_compressed_bytes(cursor.take(33)?)
            .map_err(|e| ProtocolError::InvalidNode(format!("malformed encrypting key: {}", e)))?;

        let certificate_pem = cursor.vlb()?.to_vec();

        let host = String::from_utf8(cursor.vlb()?.to_vec())
            .map_err(|_| ProtocolError::InvalidNode("host is not valid utf-8".to_string()))?;
        let port = cursor.u16_be()?;
        cursor.finish()?;

        Ok(Self {
            version,
            canonical_address,
            domains,
            timestamp,
            interface_signature,
            identity_evidence,
            verifying_key,
            encrypting_key,
            certificate_pem,
            rest_interface: RestInterface::new(host, port),
        })
    }

    /// vlb-framed concatenation of several records.
    pub fn batch_to_bytes(records: &[NodeRecord]) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::new();
        for record in records {
            put_vlb(&mut out, &record.to_bytes()?)?;
        }
        Ok(out)
    }

    /// Decode a batch, skipping future-versioned records with a warning
    /// unless `fail_fast` is set.
    pub fn batch_from_bytes(bytes: &[u8], fail_fast: bool) -> Result<Vec<NodeRecord>, ProtocolError> {
        let mut cursor = Cursor::new(bytes);
        let mut records = Vec::new();
        while cursor.remaining() > 0 {
            let frame = cursor.vlb()?;
            match NodeRecord::from_bytes(frame) {
                Ok(record) => records.push(record),
                Err(e @ ProtocolError::FromTheFuture { .. }) => {
                    if fail_fast {
                        return Err(e);
                    }
                    tracing::warn!("skipping node record: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    pub fn nickname(&self) -> String {
        nickname(&self.canonical_address)
    }

    /// Verify the record:
    /// (a) the TLS certificate CN equals the canonical address,
    /// (b) the interface signature covers `rest_interface ‖ timestamp`,
    /// (c) in decentralized mode, the identity evidence attests the
    ///     verifying key through the injected stake verifier.
    pub fn verify(
        &self,
        expected_address: Option<Address>,
        federated_only: bool,
        stake_verifier: Option<&dyn StakeVerifier>,
    ) -> Result<(), ProtocolError> {
        if let Some(expected) = expected_address {
            if expected != self.canonical_address {
                return Err(ProtocolError::SuspiciousActivity(format!(
                    "node at {} has address {} (expected {})",
                    self.rest_interface.uri(),
                    self.canonical_address.to_checksum(None),
                    expected.to_checksum(None),
                )));
            }
        }

        let common_name = certificate_common_name(&self.certificate_pem)?;
        if common_name != self.canonical_address.to_checksum(None) {
            return Err(ProtocolError::InvalidNode(format!(
                "certificate CN {} does not match canonical address {}",
                common_name,
                self.canonical_address.to_checksum(None),
            )));
        }

        let payload = interface_payload(&self.rest_interface, self.timestamp);
        if !self.interface_signature.verify(&self.verifying_key, &payload) {
            return Err(ProtocolError::InvalidNode(format!(
                "interface signature of {} does not verify",
                self.nickname()
            )));
        }

        if !federated_only {
            if self.identity_evidence == NOT_SIGNED {
                return Err(ProtocolError::InvalidNode(format!(
                    "{} carries no identity evidence in decentralized mode",
                    self.nickname()
                )));
            }
            let verifier = stake_verifier.ok_or_else(|| {
                ProtocolError::InvalidNode(
                    "decentralized verification requires a stake verifier".to_string(),
                )
            })?;
            if !verifier.verify_identity(&self.verifying_key, &self.identity_evidence) {
                return Err(ProtocolError::InvalidNode(format!(
                    "identity evidence of {} does not attest its verifying key",
                    self.nickname()
                )));
            }
        }

        Ok(())
    }
}

/// Subject CN of the first certificate in a PEM bundle.
fn certificate_common_name(pem: &[u8]) -> Result<String, ProtocolError> {
    use x509_cert::der::Decode;

    let mut reader = std::io::BufReader::new(pem);
    let der = rustls_pemfile::certs(&mut reader)
        .next()
        .ok_or_else(|| ProtocolError::InvalidNode("no certificate in PEM".to_string()))?
        .map_err(|e| ProtocolError::InvalidNode(format!("unreadable certificate: {}", e)))?;

    let certificate = x509_cert::Certificate::from_der(der.as_ref())
        .map_err(|e| ProtocolError::InvalidNode(format!("malformed certificate: {}", e)))?;

    // RFC 4514 rendering of the subject, e.g. "CN=0xAbC..."
    let subject = certificate.tbs_certificate.subject.to_string();
    subject
        .split(',')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("CN="))
        .map(str::to_string)
        .ok_or_else(|| ProtocolError::InvalidNode("certificate has no common name".to_string()))
}
