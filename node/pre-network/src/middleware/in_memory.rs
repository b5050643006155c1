use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use alloy_primitives::Address;
use async_trait::async_trait;
use umbral_pre::{CapsuleFrag, VerifiedKeyFrag};

use runtime::reencrypt::reencrypt_capsule;

use crate::characters::ursula::{HandlerError, Ursula};
use crate::middleware::{MiddlewareError, RestMiddleware};
use crate::types::{
    Arrangement, ArrangementId, KFragPayload, MapId, NodeRecord, Revocation, WorkOrder,
};

/// An entire network in one process: requests dispatch straight into
/// the registered proxies' handlers. Offline toggles and malicious
/// kfrag injection drive the failure scenarios in tests and the demo.
#[derive(Default)]
pub struct InMemoryMiddleware {
    ursulas: RwLock<HashMap<Address, Arc<Mutex<Ursula>>>>,
    by_interface: RwLock<HashMap<(String, u16), Address>>,
    offline: RwLock<HashSet<Address>>,
    malicious_kfrags: RwLock<HashMap<Address, VerifiedKeyFrag>>,
}

impl InMemoryMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, ursula: Arc<Mutex<Ursula>>) {
        let (address, interface) = {
            let guard = ursula.lock().expect("ursula lock");
            let record = guard.node_record();
            (
                guard.address(),
                (record.rest_interface.host.clone(), record.rest_interface.port),
            )
        };
        self.by_interface.write().expect("interface index lock").insert(interface, address);
        self.ursulas.write().expect("registry lock").insert(address, ursula);
    }

    /// Simulate the node at `address` going down (or coming back).
    pub fn set_offline(&self, address: Address, offline: bool) {
        let mut set = self.offline.write().expect("offline lock");
        if offline {
            set.insert(address);
        } else {
            set.remove(&address);
        }
    }

    /// Make the node at `address` answer re-encryption requests with
    /// cfrags produced from an unrelated kfrag.
    pub fn set_malicious_kfrag(&self, address: Address, kfrag: VerifiedKeyFrag) {
        self.malicious_kfrags
            .write()
            .expect("malice lock")
            .insert(address, kfrag);
    }

    fn node(&self, address: &Address) -> Result<Arc<Mutex<Ursula>>, MiddlewareError> {
        if self.offline.read().expect("offline lock").contains(address) {
            return Err(MiddlewareError::NodeSeemsToBeDown(format!(
                "{} is not answering",
                address
            )));
        }
        self.ursulas
            .read()
            .expect("registry lock")
            .get(address)
            .cloned()
            .ok_or_else(|| {
                MiddlewareError::NodeSeemsToBeDown(format!("{} is not reachable", address))
            })
    }
}

fn handler_error(e: HandlerError) -> MiddlewareError {
    match e {
        HandlerError::NotFound(msg) => MiddlewareError::NotFound(msg),
        HandlerError::Malformed(msg) => MiddlewareError::UnexpectedResponse { status: 400, body: msg },
        HandlerError::Conflict(msg) => MiddlewareError::UnexpectedResponse { status: 409, body: msg },
        HandlerError::TooLarge(msg) => MiddlewareError::UnexpectedResponse { status: 413, body: msg },
    }
}

#[async_trait]
impl RestMiddleware for InMemoryMiddleware {
    async fn node_information(&self, host: &str, port: u16) -> Result<Vec<u8>, MiddlewareError> {
        let address = self
            .by_interface
            .read()
            .expect("interface index lock")
            .get(&(host.to_string(), port))
            .copied()
            .ok_or_else(|| {
                MiddlewareError::NodeSeemsToBeDown(format!("nothing listens on {}:{}", host, port))
            })?;
        let node = self.node(&address)?;
        let record = node.lock().expect("ursula lock").node_record();
        record
            .to_bytes()
            .map_err(|e| MiddlewareError::Malformed(e.to_string()))
    }

    async fn ping(&self, node: &NodeRecord) -> Result<String, MiddlewareError> {
        let ursula = self.node(&node.canonical_address)?;
        let address = ursula.lock().expect("ursula lock").address();
        Ok(address.to_checksum(None))
    }

    async fn consider_arrangement(
        &self,
        node: &NodeRecord,
        arrangement: &Arrangement,
    ) -> Result<bool, MiddlewareError> {
        let ursula = self.node(&node.canonical_address)?;
        let accepted = ursula
            .lock()
            .expect("ursula lock")
            .consider_arrangement(arrangement);
        Ok(accepted)
    }

    async fn put_kfrag(
        &self,
        node: &NodeRecord,
        arrangement_id: &ArrangementId,
        payload: &KFragPayload,
    ) -> Result<(), MiddlewareError> {
        let ursula = self.node(&node.canonical_address)?;
        ursula
            .lock()
            .expect("ursula lock")
            .store_kfrag(arrangement_id, payload)
            .map_err(handler_error)
    }

    async fn put_treasure_map(
        &self,
        node: &NodeRecord,
        map_id: &MapId,
        map_bytes: &[u8],
    ) -> Result<(), MiddlewareError> {
        let ursula = self.node(&node.canonical_address)?;
        ursula
            .lock()
            .expect("ursula lock")
            .store_treasure_map(map_id, map_bytes)
            .map_err(handler_error)
    }

    async fn get_treasure_map(
        &self,
        node: &NodeRecord,
        map_id: &MapId,
    ) -> Result<Vec<u8>, MiddlewareError> {
        let ursula = self.node(&node.canonical_address)?;
        let map = ursula.lock().expect("ursula lock").treasure_map(map_id);
        map.ok_or_else(|| MiddlewareError::NotFound(map_id.to_string()))
    }

    async fn reencrypt(
        &self,
        node: &NodeRecord,
        work_order: &WorkOrder,
    ) -> Result<Vec<CapsuleFrag>, MiddlewareError> {
        let address = node.canonical_address;
        if let Some(kfrag) = self
            .malicious_kfrags
            .read()
            .expect("malice lock")
            .get(&address)
        {
            let cfrags = work_order
                .capsules
                .iter()
                .map(|capsule| reencrypt_capsule(capsule, kfrag.clone()).unverify())
                .collect();
            return Ok(cfrags);
        }

        let ursula = self.node(&address)?;
        ursula
            .lock()
            .expect("ursula lock")
            .reencrypt_work_order(work_order)
            .map_err(handler_error)
    }

    async fn revoke_arrangement(
        &self,
        node: &NodeRecord,
        revocation: &Revocation,
    ) -> Result<(), MiddlewareError> {
        let ursula = self.node(&node.canonical_address)?;
        ursula
            .lock()
            .expect("ursula lock")
            .revoke_arrangement(revocation)
            .map_err(handler_error)
    }
}
