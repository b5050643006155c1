use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use alloy_primitives::Address;
use color_eyre::{Result, eyre};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tokio::time::{Instant, sleep};

use runtime::keccak256;

use crate::error::ProtocolError;
use crate::middleware::RestMiddleware;
use crate::types::{NodeRecord, StakeVerifier};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const TEACHER_ATTEMPTS: u32 = 3;
const TEACHER_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Every node this character has learned about, indexed by canonical
/// address. Grows monotonically; entries leave only through `forget`.
#[derive(Default)]
pub struct KnownNodes {
    nodes: HashMap<Address, NodeRecord>,
}

impl KnownNodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_node(&mut self, record: NodeRecord) {
        self.nodes.insert(record.canonical_address, record);
    }

    pub fn forget(&mut self, address: &Address) -> Option<NodeRecord> {
        self.nodes.remove(address)
    }

    pub fn get(&self, address: &Address) -> Option<&NodeRecord> {
        self.nodes.get(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.nodes.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn addresses(&self) -> HashSet<Address> {
        self.nodes.keys().copied().collect()
    }

    pub fn records(&self) -> Vec<NodeRecord> {
        self.nodes.values().cloned().collect()
    }

    pub fn shuffled(&self, rng: &mut StdRng) -> Vec<NodeRecord> {
        let mut records = self.records();
        records.shuffle(rng);
        records
    }

    /// Fleet-state snapshot: a digest over the sorted address set.
    pub fn fleet_state_checksum(&self) -> String {
        let mut addresses: Vec<&Address> = self.nodes.keys().collect();
        addresses.sort();
        let mut bytes = Vec::with_capacity(addresses.len() * 20);
        for address in addresses {
            bytes.extend_from_slice(address.as_slice());
        }
        hex::encode(keccak256(&[&bytes]))
    }
}

/// The learning slice each character carries: verified records go into
/// the shared `KnownNodes`; misbehaving peers are dropped and logged.
#[derive(Clone)]
pub struct Learner {
    middleware: Arc<dyn RestMiddleware>,
    known_nodes: Arc<RwLock<KnownNodes>>,
    federated_only: bool,
    stake_verifier: Option<Arc<dyn StakeVerifier>>,
    suspicious_activities_witnessed: Arc<RwLock<Vec<String>>>,
    retry_interval: Duration,
}

impl Learner {
    pub fn new(middleware: Arc<dyn RestMiddleware>, federated_only: bool) -> Self {
        Self {
            middleware,
            known_nodes: Arc::new(RwLock::new(KnownNodes::new())),
            federated_only,
            stake_verifier: None,
            suspicious_activities_witnessed: Arc::new(RwLock::new(Vec::new())),
            retry_interval: TEACHER_RETRY_INTERVAL,
        }
    }

    pub fn with_stake_verifier(mut self, verifier: Arc<dyn StakeVerifier>) -> Self {
        self.stake_verifier = Some(verifier);
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn known_nodes(&self) -> Arc<RwLock<KnownNodes>> {
        Arc::clone(&self.known_nodes)
    }

    pub fn known_len(&self) -> usize {
        self.known_nodes.read().expect("known nodes lock").len()
    }

    pub fn known_addresses(&self) -> HashSet<Address> {
        self.known_nodes.read().expect("known nodes lock").addresses()
    }

    pub fn get_record(&self, address: &Address) -> Option<NodeRecord> {
        self.known_nodes
            .read()
            .expect("known nodes lock")
            .get(address)
            .cloned()
    }

    pub fn shuffled_records(&self, rng: &mut StdRng) -> Vec<NodeRecord> {
        self.known_nodes.read().expect("known nodes lock").shuffled(rng)
    }

    pub fn suspicious_activities(&self) -> Vec<String> {
        self.suspicious_activities_witnessed
            .read()
            .expect("suspicion lock")
            .clone()
    }

    /// Verify and remember a record obtained out of band (seed nodes,
    /// fleet snapshots).
    pub fn record_node(&self, record: NodeRecord) -> Result<(), ProtocolError> {
        record.verify(None, self.federated_only, self.stake_verifier.as_deref())?;
        self.known_nodes
            .write()
            .expect("known nodes lock")
            .record_node(record);
        Ok(())
    }

    pub fn forget(&self, address: &Address) {
        self.known_nodes.write().expect("known nodes lock").forget(address);
    }

    fn record_suspicious(&self, address: Option<&Address>, note: String) {
        tracing::warn!("{}", note);
        if let Some(address) = address {
            self.forget(address);
        }
        self.suspicious_activities_witnessed
            .write()
            .expect("suspicion lock")
            .push(note);
    }

    /// Bootstrap from a teacher URI: fetch, decode and verify its
    /// record, retrying transient transport failures a fixed number of
    /// times before giving up. Cryptographic failures are never
    /// retried.
    pub async fn learn_from_teacher_uri(
        &self,
        host: &str,
        port: u16,
        expected_address: Option<Address>,
    ) -> Result<NodeRecord> {
        let mut last_error = None;
        for attempt in 1..=TEACHER_ATTEMPTS {
            match self.middleware.node_information(host, port).await {
                Ok(bytes) => {
                    let record = NodeRecord::from_bytes(&bytes)?;
                    match record.verify(
                        expected_address,
                        self.federated_only,
                        self.stake_verifier.as_deref(),
                    ) {
                        Ok(()) => {
                            self.known_nodes
                                .write()
                                .expect("known nodes lock")
                                .record_node(record.clone());
                            return Ok(record);
                        }
                        Err(e @ ProtocolError::SuspiciousActivity(_)) => {
                            self.record_suspicious(
                                Some(&record.canonical_address),
                                e.to_string(),
                            );
                            return Err(e.into());
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        "can't connect to teacher {}:{} (attempt {}), retrying in {:?}: {}",
                        host,
                        port,
                        attempt,
                        self.retry_interval,
                        e
                    );
                    last_error = Some(e);
                    if attempt < TEACHER_ATTEMPTS {
                        sleep(self.retry_interval).await;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(eyre::anyhow!(
            "teacher {}:{} refused connection after {} attempts: {}",
            host,
            port,
            TEACHER_ATTEMPTS,
            last_error.expect("retries imply a transport error")
        ))
    }

    /// Focused learning toward specific addresses. Discovery of
    /// entirely unseen peers belongs to the gossip layer; the sources
    /// here are the nodes already known, so this refreshes them and
    /// reports which targets are still missing.
    pub async fn learn_about_specific_nodes(
        &self,
        addresses: &HashSet<Address>,
    ) -> HashSet<Address> {
        self.refresh_known_nodes().await;
        let known = self.known_addresses();
        addresses.difference(&known).copied().collect()
    }

    /// Re-fetch the records of currently known nodes. Peers that fail
    /// verification are dropped as suspicious; unreachable peers are
    /// left alone (no removal without explicit forget).
    pub async fn refresh_known_nodes(&self) {
        let records = self.known_nodes.read().expect("known nodes lock").records();
        for known in records {
            let interface = &known.rest_interface;
            match self
                .middleware
                .node_information(&interface.host, interface.port)
                .await
            {
                Ok(bytes) => match NodeRecord::from_bytes(&bytes).and_then(|record| {
                    record
                        .verify(
                            Some(known.canonical_address),
                            self.federated_only,
                            self.stake_verifier.as_deref(),
                        )
                        .map(|_| record)
                }) {
                    Ok(record) => {
                        self.known_nodes
                            .write()
                            .expect("known nodes lock")
                            .record_node(record);
                    }
                    Err(e) => {
                        self.record_suspicious(
                            Some(&known.canonical_address),
                            format!("{} failed re-verification: {}", known.nickname(), e),
                        );
                    }
                },
                Err(e) => {
                    tracing::debug!("{} unreachable during refresh: {}", known.nickname(), e);
                }
            }
        }
    }

    /// Wait until at least `n` nodes are known. Returns `good_to_go`:
    /// `false` on deadline rather than raising.
    pub async fn block_until_number_of_known_nodes_is(
        &self,
        n: usize,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.known_len() >= n {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Wait until all but `allow_missing` of `addresses` are known.
    pub async fn block_until_specific_nodes_are_known(
        &self,
        addresses: &HashSet<Address>,
        timeout: Duration,
        allow_missing: usize,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let known = self.known_addresses();
            let missing = addresses.difference(&known).count();
            if missing <= allow_missing {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use runtime::PreKeyMaterial;

    use crate::characters::ursula::Ursula;
    use crate::middleware::InMemoryMiddleware;

    fn boot(port: u16) -> Ursula {
        Ursula::new_federated(
            PreKeyMaterial::random().into_powers(),
            "127.0.0.1",
            port,
            vec!["testnet".to_string()],
        )
        .expect("ursula boots")
    }

    #[tokio::test]
    async fn test_learn_from_teacher_and_snapshot() -> Result<()> {
        let middleware = Arc::new(InMemoryMiddleware::new());
        let ursula = boot(9151);
        let address = ursula.address();
        middleware.register(Arc::new(Mutex::new(ursula)));

        let learner = Learner::new(middleware, true);
        let record = learner.learn_from_teacher_uri("127.0.0.1", 9151, Some(address)).await?;
        assert_eq!(record.canonical_address, address);
        assert_eq!(learner.known_len(), 1);

        let checksum_before = learner
            .known_nodes()
            .read()
            .expect("lock")
            .fleet_state_checksum();
        learner.forget(&address);
        let checksum_after = learner
            .known_nodes()
            .read()
            .expect("lock")
            .fleet_state_checksum();
        assert_ne!(checksum_before, checksum_after);
        assert_eq!(learner.known_len(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_teacher_with_unexpected_address_is_suspicious() -> Result<()> {
        let middleware = Arc::new(InMemoryMiddleware::new());
        let ursula = boot(9152);
        middleware.register(Arc::new(Mutex::new(ursula)));

        let learner = Learner::new(middleware, true);
        let expected = Address::repeat_byte(0xEE);
        let result = learner
            .learn_from_teacher_uri("127.0.0.1", 9152, Some(expected))
            .await;

        let report = result.expect_err("address mismatch must fail");
        assert!(matches!(
            report.downcast_ref::<ProtocolError>(),
            Some(ProtocolError::SuspiciousActivity(_))
        ));
        assert_eq!(learner.suspicious_activities().len(), 1);
        assert_eq!(learner.known_len(), 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_until_times_out_with_sentinel() {
        let middleware = Arc::new(InMemoryMiddleware::new());
        let learner = Learner::new(middleware, true);

        let good_to_go = learner
            .block_until_number_of_known_nodes_is(3, Duration::from_secs(1))
            .await;
        assert!(!good_to_go);
    }
}
