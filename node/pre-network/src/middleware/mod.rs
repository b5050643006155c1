pub mod http;
pub mod in_memory;

use std::fmt::Display;

use async_trait::async_trait;
use umbral_pre::CapsuleFrag;

use crate::types::{
    Arrangement, ArrangementId, KFragPayload, MapId, NodeRecord, Revocation, WorkOrder,
};

pub use http::HttpMiddleware;
pub use in_memory::InMemoryMiddleware;

/// Transport failures. Transient variants may be retried or skipped;
/// permanent variants are recorded per peer.
#[derive(Debug, Clone)]
pub enum MiddlewareError {
    NodeSeemsToBeDown(String),
    ConnectTimeout(String),
    NotFound(String),
    UnexpectedResponse { status: u16, body: String },
    Malformed(String),
}

impl MiddlewareError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MiddlewareError::NodeSeemsToBeDown(_) | MiddlewareError::ConnectTimeout(_)
        )
    }
}

impl std::error::Error for MiddlewareError {}

impl Display for MiddlewareError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            MiddlewareError::NodeSeemsToBeDown(msg) => write!(f, "NodeSeemsToBeDown: {}", msg),
            MiddlewareError::ConnectTimeout(msg) => write!(f, "ConnectTimeout: {}", msg),
            MiddlewareError::NotFound(msg) => write!(f, "NotFound: {}", msg),
            MiddlewareError::UnexpectedResponse { status, body } => {
                write!(f, "UnexpectedResponse ({}): {}", status, body)
            }
            MiddlewareError::Malformed(msg) => write!(f, "Malformed: {}", msg),
        }
    }
}

/// The network transport as the core consumes it: one method per wire
/// verb of the proxy REST interface. Implementations decide how bytes
/// actually move.
#[async_trait]
pub trait RestMiddleware: Send + Sync {
    /// GET /public_information: the node's signed record bytes.
    async fn node_information(&self, host: &str, port: u16) -> Result<Vec<u8>, MiddlewareError>;

    /// GET /ping: liveness probe, answers with the node's address.
    async fn ping(&self, node: &NodeRecord) -> Result<String, MiddlewareError>;

    /// POST /consider_arrangement: true on acceptance, false on refusal.
    async fn consider_arrangement(
        &self,
        node: &NodeRecord,
        arrangement: &Arrangement,
    ) -> Result<bool, MiddlewareError>;

    /// POST /kFrag/{arrangement_id}: deliver the kfrag for an accepted
    /// arrangement.
    async fn put_kfrag(
        &self,
        node: &NodeRecord,
        arrangement_id: &ArrangementId,
        payload: &KFragPayload,
    ) -> Result<(), MiddlewareError>;

    /// POST /treasure_map/{map_id}: publish a treasure map.
    async fn put_treasure_map(
        &self,
        node: &NodeRecord,
        map_id: &MapId,
        map_bytes: &[u8],
    ) -> Result<(), MiddlewareError>;

    /// GET /treasure_map/{map_id}.
    async fn get_treasure_map(
        &self,
        node: &NodeRecord,
        map_id: &MapId,
    ) -> Result<Vec<u8>, MiddlewareError>;

    /// POST /reencrypt: perform a work order, one cfrag per capsule.
    async fn reencrypt(
        &self,
        node: &NodeRecord,
        work_order: &WorkOrder,
    ) -> Result<Vec<CapsuleFrag>, MiddlewareError>;

    /// DELETE /kFrag/{arrangement_id}: revoke an arrangement.
    async fn revoke_arrangement(
        &self,
        node: &NodeRecord,
        revocation: &Revocation,
    ) -> Result<(), MiddlewareError>;
}
