pub mod characters;
pub mod control;
pub mod error;
pub mod learning;
pub mod middleware;
pub mod types;

pub use characters::{Alice, Bob, Character, Enrico, PublicKeys, Ursula, verify_from};
pub use error::ProtocolError;
pub use learning::{KnownNodes, Learner};
pub use middleware::{HttpMiddleware, InMemoryMiddleware, MiddlewareError, RestMiddleware};

/// Abbreviated checksum address for log lines.
pub fn short_address(address: &alloy_primitives::Address) -> String {
    let checksum = address.to_checksum(None);
    format!("{}..{}", &checksum[..6], &checksum[checksum.len() - 4..])
}
