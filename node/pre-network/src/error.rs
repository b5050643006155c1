use std::fmt::Display;

use crate::types::IndisputableEvidence;

/// Protocol-level failures. Cryptographic and signature failures are
/// never retried; threshold failures are only raised after the
/// documented wait expired.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    /// Malformed key, capsule or kfrag.
    Crypto(String),
    /// A required argument combination was violated.
    InvalidArguments(String),
    /// Signature verification failed; fatal for the affected object.
    InvalidSignature(String),
    /// A proxy returned a cfrag that fails its correctness proof.
    /// Carries the evidence bundle for external adjudication.
    IncorrectCFrag(IndisputableEvidence),
    /// Node verification failed.
    InvalidNode(String),
    /// A node presented an unexpected identity.
    SuspiciousActivity(String),
    /// A record from a newer protocol version than this implementation.
    FromTheFuture {
        version: u16,
        nickname: Option<String>,
    },
    /// Not enough nodes became known before the deadline.
    NotEnoughTeachers { required: usize, known: usize },
    /// Work orders exhausted before the re-encryption threshold was met.
    NotEnoughProxies { required: usize, attached: usize },
    /// No known proxy serves the requested treasure map.
    NowhereToBeFound(String),
}

impl std::error::Error for ProtocolError {}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ProtocolError::Crypto(msg) => write!(f, "CryptoError: {}", msg),
            ProtocolError::InvalidArguments(msg) => write!(f, "InvalidArguments: {}", msg),
            ProtocolError::InvalidSignature(msg) => write!(f, "InvalidSignature: {}", msg),
            ProtocolError::IncorrectCFrag(evidence) => {
                write!(f, "IncorrectCFragReceived from {}", evidence.offending_address)
            }
            ProtocolError::InvalidNode(msg) => write!(f, "InvalidNode: {}", msg),
            ProtocolError::SuspiciousActivity(msg) => write!(f, "SuspiciousActivity: {}", msg),
            ProtocolError::FromTheFuture { version, nickname } => match nickname {
                Some(name) => write!(
                    f,
                    "node {} is from the future (record version {}, ours is {})",
                    name,
                    version,
                    crate::types::LEARNER_VERSION
                ),
                None => write!(
                    f,
                    "record version {} exceeds this implementation ({})",
                    version,
                    crate::types::LEARNER_VERSION
                ),
            },
            ProtocolError::NotEnoughTeachers { required, known } => write!(
                f,
                "need to know {} nodes but only {} are known ({} short); \
                 pass them in or keep the learning loop running on a larger network",
                required,
                known,
                required - known
            ),
            ProtocolError::NotEnoughProxies { required, attached } => write!(
                f,
                "unable to snag {} cfrags, only {} attached",
                required, attached
            ),
            ProtocolError::NowhereToBeFound(map_id) => {
                write!(f, "treasure map {} is nowhere to be found", map_id)
            }
        }
    }
}
