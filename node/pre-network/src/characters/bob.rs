use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use color_eyre::{Result, eyre};
use rand::SeedableRng;
use rand::rngs::StdRng;
use umbral_pre::{Capsule, PublicKey, VerifiedCapsuleFrag};

use runtime::{CharacterPowers, DecryptingPower, SigningPower};
use runtime::reencrypt::{decrypt_reencrypted, verify_cfrag};

use crate::characters::{Character, PublicKeys};
use crate::error::ProtocolError;
use crate::learning::Learner;
use crate::middleware::RestMiddleware;
use crate::types::{
    EncryptedTreasureMap, Hrac, IndisputableEvidence, MapId, MessageKit, TreasureMap, WorkOrder,
    WorkOrderHistory, capsule_fingerprint,
};

const DEFAULT_NODE_WAIT: Duration = Duration::from_secs(10);

/// What to do with a proxy that serves a syntactically valid but
/// cryptographically bunk treasure map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BunkMapPolicy {
    /// Surface the signature failure to the caller.
    Propagate,
    /// Drop the node from the known set, log it, and keep looking.
    DropAndBlacklist,
}

/// The delegatee: locates treasure maps, dispatches work orders,
/// collects and validates cfrags, and decrypts.
pub struct Bob {
    signing: SigningPower,
    decrypting: DecryptingPower,
    learner: Learner,
    middleware: Arc<dyn RestMiddleware>,
    rng: StdRng,
    treasure_maps: HashMap<MapId, TreasureMap>,
    saved_work_orders: WorkOrderHistory,
    bunk_map_policy: BunkMapPolicy,
    node_wait_timeout: Duration,
}

impl Bob {
    pub fn new(
        powers: CharacterPowers,
        middleware: Arc<dyn RestMiddleware>,
        federated_only: bool,
    ) -> Result<Self> {
        let signing = powers.signing()?.clone();
        let decrypting = powers.decrypting()?.clone();
        Ok(Self {
            signing,
            decrypting,
            learner: Learner::new(Arc::clone(&middleware), federated_only),
            middleware,
            rng: StdRng::from_entropy(),
            treasure_maps: HashMap::new(),
            saved_work_orders: WorkOrderHistory::new(),
            bunk_map_policy: BunkMapPolicy::Propagate,
            node_wait_timeout: DEFAULT_NODE_WAIT,
        })
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_bunk_map_policy(mut self, policy: BunkMapPolicy) -> Self {
        self.bunk_map_policy = policy;
        self
    }

    pub fn with_node_wait_timeout(mut self, timeout: Duration) -> Self {
        self.node_wait_timeout = timeout;
        self
    }

    pub fn learner(&self) -> &Learner {
        &self.learner
    }

    pub fn verifying_key(&self) -> PublicKey {
        self.signing.verifying_key()
    }

    pub fn encrypting_key(&self) -> PublicKey {
        self.decrypting.public_key()
    }

    pub fn construct_hrac_and_map_id(
        &self,
        delegator_verifying_key: &PublicKey,
        label: &[u8],
    ) -> (Hrac, MapId) {
        let hrac = Hrac::new(delegator_verifying_key, &self.verifying_key(), label);
        let map_id = MapId::new(delegator_verifying_key, &hrac);
        (hrac, map_id)
    }

    /// Learn any seed nodes, locate the policy's treasure map among
    /// known proxies, orient it, and store it locally.
    pub async fn join_policy(
        &mut self,
        label: &[u8],
        delegator_verifying_key: &PublicKey,
        seed_uris: &[(String, u16)],
    ) -> Result<MapId> {
        for (host, port) in seed_uris {
            if let Err(e) = self.learner.learn_from_teacher_uri(host, *port, None).await {
                tracing::warn!("seed node {}:{} not learned: {}", host, port, e);
            }
        }

        if self.learner.known_len() == 0 {
            return Err(ProtocolError::NotEnoughTeachers { required: 1, known: 0 }.into());
        }

        let (_hrac, map_id) = self.construct_hrac_and_map_id(delegator_verifying_key, label);
        let treasure_map = self
            .get_treasure_map_from_known_nodes(delegator_verifying_key, &map_id)
            .await?;
        self.treasure_maps.insert(map_id.clone(), treasure_map);
        Ok(map_id)
    }

    /// Ask known proxies, shuffled, for the map; first success wins.
    /// Transport errors skip to the next proxy; a cryptographically
    /// invalid map follows the configured bunk-map policy.
    async fn get_treasure_map_from_known_nodes(
        &mut self,
        delegator_verifying_key: &PublicKey,
        map_id: &MapId,
    ) -> Result<TreasureMap> {
        let candidates = self.learner.shuffled_records(&mut self.rng);
        for record in candidates {
            let bytes = match self.middleware.get_treasure_map(&record, map_id).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::debug!("{} has no map {}: {}", record.nickname(), map_id, e);
                    continue;
                }
            };

            let oriented = EncryptedTreasureMap::from_bytes(&bytes).and_then(|encrypted| {
                encrypted.orient(self.decrypting.secret_key(), delegator_verifying_key)
            });
            match oriented {
                Ok(treasure_map) => return Ok(treasure_map),
                Err(e) => match self.bunk_map_policy {
                    BunkMapPolicy::Propagate => return Err(e.into()),
                    BunkMapPolicy::DropAndBlacklist => {
                        tracing::warn!(
                            "{} served a bunk treasure map, dropping it: {}",
                            record.nickname(),
                            e
                        );
                        self.learner.forget(&record.canonical_address);
                        continue;
                    }
                },
            }
        }
        Err(ProtocolError::NowhereToBeFound(map_id.to_string()).into())
    }

    /// Which destinations of a stored map are already known vs not.
    pub fn peek_at_treasure_map(
        &self,
        map_id: &MapId,
    ) -> Result<(HashSet<Address>, HashSet<Address>)> {
        let treasure_map = self
            .treasure_maps
            .get(map_id)
            .ok_or_else(|| eyre::anyhow!("no treasure map stored under {}", map_id))?;
        let known_addresses = self.learner.known_addresses();
        let mut unknown = HashSet::new();
        let mut known = HashSet::new();
        for address in treasure_map.addresses() {
            if known_addresses.contains(address) {
                known.insert(*address);
            } else {
                unknown.insert(*address);
            }
        }
        Ok((unknown, known))
    }

    /// Partition destinations, learn toward the unknown ones, and
    /// optionally block until no more than `allow_missing` stay
    /// unknown. Returns (unknown, known, threshold).
    pub async fn follow_treasure_map(
        &mut self,
        map_id: &MapId,
        block: bool,
        allow_missing: usize,
    ) -> Result<(HashSet<Address>, HashSet<Address>, usize)> {
        let (unknown, _known) = self.peek_at_treasure_map(map_id)?;

        if !unknown.is_empty() {
            self.learner.learn_about_specific_nodes(&unknown).await;
            if block {
                let good_to_go = self
                    .learner
                    .block_until_specific_nodes_are_known(
                        &unknown,
                        self.node_wait_timeout,
                        allow_missing,
                    )
                    .await;
                if !good_to_go {
                    let threshold_needed = unknown.len().saturating_sub(allow_missing);
                    return Err(ProtocolError::NotEnoughTeachers {
                        required: threshold_needed,
                        known: unknown
                            .intersection(&self.learner.known_addresses())
                            .count(),
                    }
                    .into());
                }
            }
        }

        let (unknown, known) = self.peek_at_treasure_map(map_id)?;
        let threshold = self
            .treasure_maps
            .get(map_id)
            .expect("map presence checked above")
            .threshold;
        Ok((unknown, known, threshold))
    }

    /// One work order per destination holding capsules not yet
    /// requested from that proxy, in the map's canonical order.
    /// A (proxy, capsule) pair is never requested twice.
    pub fn generate_work_orders(
        &mut self,
        map_id: &MapId,
        capsules: &[Capsule],
        num_proxies: Option<usize>,
    ) -> Result<Vec<WorkOrder>> {
        let treasure_map = self
            .treasure_maps
            .get(map_id)
            .ok_or_else(|| eyre::anyhow!("no treasure map stored under {}", map_id))?;

        let mut work_orders = Vec::new();
        for (address, arrangement_id) in &treasure_map.destinations {
            let mut to_include = Vec::new();
            for capsule in capsules {
                let fingerprint = capsule_fingerprint(capsule)?;
                if !self.saved_work_orders.contains(address, &fingerprint) {
                    to_include.push((fingerprint, capsule.clone()));
                }
            }
            if to_include.is_empty() {
                continue;
            }

            let order = WorkOrder::new(
                self.signing.signer(),
                *arrangement_id,
                to_include.iter().map(|(_, capsule)| capsule.clone()).collect(),
                *address,
            )?;
            for (fingerprint, _) in to_include {
                self.saved_work_orders.record(*address, fingerprint, order.clone());
            }
            work_orders.push(order);

            if num_proxies == Some(work_orders.len()) {
                break;
            }
        }
        Ok(work_orders)
    }

    /// The retrieval flow: follow the map, dispatch work orders until
    /// the threshold is met, validate every cfrag, check the kit came
    /// from the named data source, decrypt.
    pub async fn retrieve(
        &mut self,
        message_kit: &MessageKit,
        enrico: &PublicKeys,
        delegator_verifying_key: &PublicKey,
        label: &[u8],
    ) -> Result<Vec<Box<[u8]>>> {
        // Correctness keys for cfrag validation.
        let delegating_key = message_kit.policy_encrypting_key;
        let receiving_key = self.encrypting_key();

        let (_hrac, map_id) = self.construct_hrac_and_map_id(delegator_verifying_key, label);
        let (_unknown, _known, threshold) =
            self.follow_treasure_map(&map_id, true, 0).await?;

        let work_orders =
            self.generate_work_orders(&map_id, &[message_kit.capsule.clone()], None)?;

        let mut attached: Vec<VerifiedCapsuleFrag> = Vec::new();
        'orders: for order in &work_orders {
            if attached.len() >= threshold {
                break;
            }
            let Some(record) = self.learner.get_record(&order.ursula_address) else {
                tracing::debug!("{} is not known, skipping work order", order.ursula_address);
                continue;
            };

            let cfrags = match self.middleware.reencrypt(&record, order).await {
                Ok(cfrags) => cfrags,
                Err(e) => {
                    tracing::info!("work order at {} failed: {}", record.nickname(), e);
                    continue;
                }
            };

            for (capsule, cfrag) in order.capsules.iter().zip(cfrags.iter()) {
                match verify_cfrag(
                    cfrag,
                    capsule,
                    delegator_verifying_key,
                    &delegating_key,
                    &receiving_key,
                ) {
                    Some(verified) => {
                        attached.push(verified);
                        if attached.len() >= threshold {
                            break 'orders;
                        }
                    }
                    None => {
                        // The misbehavior capture point.
                        let evidence = IndisputableEvidence {
                            capsule: capsule.clone(),
                            cfrag: cfrag.clone(),
                            offending_address: order.ursula_address,
                        };
                        return Err(ProtocolError::IncorrectCFrag(evidence).into());
                    }
                }
            }
        }

        if attached.len() < threshold {
            return Err(ProtocolError::NotEnoughProxies {
                required: threshold,
                attached: attached.len(),
            }
            .into());
        }

        if !message_kit.verify(&enrico.verifying_key) {
            return Err(ProtocolError::InvalidSignature(
                "message kit was not signed by the expected data source".to_string(),
            )
            .into());
        }

        let cleartext = decrypt_reencrypted(
            self.decrypting.secret_key(),
            &delegating_key,
            &message_kit.capsule,
            attached,
            &message_kit.ciphertext,
        )
        .map_err(|e| ProtocolError::Crypto(e.to_string()))?;

        Ok(vec![cleartext])
    }
}

impl Character for Bob {
    fn public_keys(&self) -> PublicKeys {
        PublicKeys {
            verifying_key: self.verifying_key(),
            encrypting_key: Some(self.encrypting_key()),
        }
    }
}
