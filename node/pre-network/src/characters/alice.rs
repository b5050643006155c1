use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use color_eyre::{Result, eyre};
use rand::SeedableRng;
use rand::rngs::StdRng;
use umbral_pre::{PublicKey, VerifiedKeyFrag};

use runtime::{CharacterPowers, DelegatingPower, SigningPower};
use runtime::reencrypt::generate_policy_kfrags;

use crate::characters::{Character, PublicKeys};
use crate::error::ProtocolError;
use crate::learning::Learner;
use crate::middleware::{MiddlewareError, RestMiddleware};
use crate::types::{
    Arrangement, EncryptedTreasureMap, Hrac, KFragPayload, MapId, NodeRecord, Revocation,
    RevocationKit, TreasureMap,
};

const DEFAULT_NODE_WAIT: Duration = Duration::from_secs(10);

/// How proxies are chosen for a policy.
#[derive(Debug)]
pub enum PolicyMode {
    /// Uniform random selection from currently known proxies.
    Federated,
    /// Selection delegated to the external staking sampler; expiration
    /// and value are mandatory here and carried into every arrangement.
    Staked {
        expiration: DateTime<Utc>,
        value: u64,
        handpicked: Vec<Address>,
    },
}

/// External proxy selection for staked policies (the staking agent).
/// The returned set must contain every handpicked address and have
/// exactly `shares` members.
pub trait ProxySampler: Send + Sync {
    fn sample(
        &self,
        shares: usize,
        handpicked: &[Address],
        expiration: DateTime<Utc>,
        value: u64,
    ) -> Result<Vec<Address>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationFailure {
    NotFound,
    UnexpectedResponse,
}

/// A policy between creation and enactment: kfrags issued, proxies
/// selected, acceptances accumulating.
#[derive(Debug)]
pub struct Policy {
    pub hrac: Hrac,
    pub label: Vec<u8>,
    pub threshold: usize,
    pub shares: usize,
    pub policy_encrypting_key: PublicKey,
    pub delegatee_verifying_key: PublicKey,
    pub delegatee_encrypting_key: PublicKey,
    federated: bool,
    expiration: Option<DateTime<Utc>>,
    value: Option<u64>,
    kfrags: Vec<VerifiedKeyFrag>,
    candidates: Vec<NodeRecord>,
    accepted: Vec<Arrangement>,
    accepted_records: Vec<NodeRecord>,
}

impl Policy {
    /// Enactable iff exactly `shares` distinct proxies have accepted.
    pub fn is_enactable(&self) -> bool {
        self.accepted.len() == self.shares
    }

    pub fn accepted_addresses(&self) -> Vec<Address> {
        self.accepted.iter().map(|a| a.ursula_address).collect()
    }
}

/// What the delegator keeps after enactment. Owns the arrangements and
/// the map; the revocation kit holds addresses only.
#[derive(Clone)]
pub struct EnactedPolicy {
    pub hrac: Hrac,
    pub map_id: MapId,
    pub threshold: usize,
    pub shares: usize,
    pub policy_encrypting_key: PublicKey,
    pub encrypted_treasure_map: EncryptedTreasureMap,
    pub revocation_kit: RevocationKit,
    pub arrangements: Vec<Arrangement>,
    /// Proxies that accepted but could not be served during enactment.
    pub publication_failures: Vec<(Address, String)>,
}

/// The delegator. Issues kfrags, negotiates arrangements, enacts and
/// revokes policies.
pub struct Alice {
    signing: SigningPower,
    delegating: DelegatingPower,
    encrypting_key: Option<PublicKey>,
    learner: Learner,
    middleware: Arc<dyn RestMiddleware>,
    rng: StdRng,
    sampler: Option<Arc<dyn ProxySampler>>,
    node_wait_timeout: Duration,
    active_policies: HashMap<Hrac, EnactedPolicy>,
}

impl Alice {
    pub fn new(
        powers: CharacterPowers,
        middleware: Arc<dyn RestMiddleware>,
        federated_only: bool,
    ) -> Result<Self> {
        let signing = powers.signing()?.clone();
        let delegating = powers.delegating()?.clone();
        let encrypting_key = powers.decrypting().ok().map(|p| p.public_key());
        Ok(Self {
            signing,
            delegating,
            encrypting_key,
            learner: Learner::new(Arc::clone(&middleware), federated_only),
            middleware,
            rng: StdRng::from_entropy(),
            sampler: None,
            node_wait_timeout: DEFAULT_NODE_WAIT,
            active_policies: HashMap::new(),
        })
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_sampler(mut self, sampler: Arc<dyn ProxySampler>) -> Self {
        self.sampler = Some(sampler);
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

    /// Deterministic, reproducible from the delegating root and label.
    pub fn derive_policy_encrypting_key(&self, label: &[u8]) -> PublicKey {
        self.delegating.derive_policy_key(label).1
    }

    pub fn active_policy(&self, hrac: &Hrac) -> Option<&EnactedPolicy> {
        self.active_policies.get(hrac)
    }

    /// Generate kfrags and select the proxy set for a new policy.
    pub async fn create_policy(
        &mut self,
        delegatee: &PublicKeys,
        label: &[u8],
        threshold: usize,
        shares: usize,
        mode: PolicyMode,
    ) -> Result<Policy> {
        let delegatee_encrypting_key = delegatee.encrypting_key.ok_or_else(|| {
            ProtocolError::InvalidArguments(
                "the delegatee's encrypting key is required to create a policy".to_string(),
            )
        })?;

        let (policy_sk, policy_encrypting_key) = self.delegating.derive_policy_key(label);
        let kfrags = generate_policy_kfrags(
            &policy_sk,
            &delegatee_encrypting_key,
            self.signing.signer(),
            threshold,
            shares,
        )
        .map_err(|e| ProtocolError::Crypto(e.to_string()))?;

        let hrac = Hrac::new(&self.verifying_key(), &delegatee.verifying_key, label);

        let (federated, expiration, value, candidates) = match mode {
            PolicyMode::Federated => {
                let good_to_go = self
                    .learner
                    .block_until_number_of_known_nodes_is(shares, self.node_wait_timeout)
                    .await;
                if !good_to_go {
                    return Err(ProtocolError::NotEnoughTeachers {
                        required: shares,
                        known: self.learner.known_len(),
                    }
                    .into());
                }
                let mut records = self.learner.shuffled_records(&mut self.rng);
                records.truncate(shares);
                (true, None, None, records)
            }
            PolicyMode::Staked { expiration, value, handpicked } => {
                let sampler = self.sampler.as_ref().ok_or_else(|| {
                    eyre::anyhow!("staked policies need a proxy sampler wired to the staking agent")
                })?;
                let selected = sampler.sample(shares, &handpicked, expiration, value)?;
                if selected.len() != shares {
                    return Err(ProtocolError::InvalidArguments(format!(
                        "sampler returned {} proxies, policy needs {}",
                        selected.len(),
                        shares
                    ))
                    .into());
                }
                if !handpicked.iter().all(|address| selected.contains(address)) {
                    return Err(ProtocolError::InvalidArguments(
                        "sampler dropped a handpicked proxy".to_string(),
                    )
                    .into());
                }

                let addresses: HashSet<Address> = selected.iter().copied().collect();
                let good_to_go = self
                    .learner
                    .block_until_specific_nodes_are_known(
                        &addresses,
                        self.node_wait_timeout,
                        0,
                    )
                    .await;
                if !good_to_go {
                    let known = addresses
                        .intersection(&self.learner.known_addresses())
                        .count();
                    return Err(ProtocolError::NotEnoughTeachers { required: shares, known }.into());
                }

                let records = selected
                    .iter()
                    .filter_map(|address| self.learner.get_record(address))
                    .collect();
                (false, Some(expiration), Some(value), records)
            }
        };

        Ok(Policy {
            hrac,
            label: label.to_vec(),
            threshold,
            shares,
            policy_encrypting_key,
            delegatee_verifying_key: delegatee.verifying_key,
            delegatee_encrypting_key,
            federated,
            expiration,
            value,
            kfrags: kfrags.into_vec(),
            candidates,
            accepted: Vec::new(),
            accepted_records: Vec::new(),
        })
    }

    /// Propose one arrangement per selected proxy. Declined or
    /// unreachable proxies are backfilled from the remaining known
    /// nodes in federated mode.
    pub async fn make_arrangements(&mut self, policy: &mut Policy) -> Result<()> {
        let mut queue = policy.candidates.clone();
        let mut tried: HashSet<Address> = HashSet::new();
        let mut next = 0;

        while policy.accepted.len() < policy.shares {
            if next >= queue.len() {
                if !policy.federated {
                    break;
                }
                let backfill: Vec<NodeRecord> = self
                    .learner
                    .shuffled_records(&mut self.rng)
                    .into_iter()
                    .filter(|record| !tried.contains(&record.canonical_address))
                    .collect();
                if backfill.is_empty() {
                    break;
                }
                queue.extend(backfill);
            }

            let record = queue[next].clone();
            next += 1;
            if !tried.insert(record.canonical_address) {
                continue;
            }

            let arrangement = Arrangement::new(
                &mut self.rng,
                policy.hrac,
                record.canonical_address,
                policy.expiration,
                policy.value,
            );

            match self.middleware.consider_arrangement(&record, &arrangement).await {
                Ok(true) => {
                    tracing::debug!("{} accepted arrangement {}", record.nickname(), arrangement.arrangement_id);
                    policy.accepted.push(arrangement);
                    policy.accepted_records.push(record);
                }
                Ok(false) => {
                    tracing::info!("{} declined arrangement", record.nickname());
                }
                Err(e) => {
                    tracing::warn!("{} unreachable during arrangement: {}", record.nickname(), e);
                }
            }
        }

        if !policy.is_enactable() {
            return Err(eyre::anyhow!(
                "only {} of {} proxies accepted arrangements for policy {}",
                policy.accepted.len(),
                policy.shares,
                policy.hrac
            ));
        }
        Ok(())
    }

    /// Build, sign and publish the treasure map, deliver one kfrag per
    /// accepted proxy, and compute the revocation kit.
    pub async fn enact(&mut self, policy: Policy) -> Result<EnactedPolicy> {
        if !policy.is_enactable() {
            return Err(eyre::anyhow!(
                "policy {} is not enactable: {} of {} acceptances",
                policy.hrac,
                policy.accepted.len(),
                policy.shares
            ));
        }

        let destinations = policy
            .accepted
            .iter()
            .map(|arrangement| (arrangement.ursula_address, arrangement.arrangement_id))
            .collect();
        let treasure_map = TreasureMap::new(policy.threshold, policy.hrac, destinations)?;
        let encrypted_treasure_map =
            treasure_map.encrypt(self.signing.signer(), &policy.delegatee_encrypting_key)?;
        let revocation_kit = RevocationKit::new(self.signing.signer(), &treasure_map);
        let map_id = MapId::new(&self.verifying_key(), &policy.hrac);

        let mut publication_failures = Vec::new();

        for ((arrangement, record), kfrag) in policy
            .accepted
            .iter()
            .zip(policy.accepted_records.iter())
            .zip(policy.kfrags.iter())
        {
            let payload = KFragPayload::new(
                policy.hrac,
                kfrag,
                policy.policy_encrypting_key,
                policy.delegatee_encrypting_key,
                self.verifying_key(),
            );
            if let Err(e) = self
                .middleware
                .put_kfrag(record, &arrangement.arrangement_id, &payload)
                .await
            {
                tracing::warn!("kfrag delivery to {} failed: {}", record.nickname(), e);
                publication_failures.push((record.canonical_address, e.to_string()));
                // best-effort revert of the dangling arrangement
                if let Some(revocation) = revocation_kit.get(&record.canonical_address) {
                    let _ = self.middleware.revoke_arrangement(record, revocation).await;
                }
            }
        }

        let map_bytes = encrypted_treasure_map.to_bytes()?;
        for record in &policy.accepted_records {
            if let Err(e) = self
                .middleware
                .put_treasure_map(record, &map_id, &map_bytes)
                .await
            {
                tracing::warn!("map publication to {} failed: {}", record.nickname(), e);
                publication_failures.push((record.canonical_address, e.to_string()));
            }
        }

        Ok(EnactedPolicy {
            hrac: policy.hrac,
            map_id,
            threshold: policy.threshold,
            shares: policy.shares,
            policy_encrypting_key: policy.policy_encrypting_key,
            encrypted_treasure_map,
            revocation_kit,
            arrangements: policy.accepted,
            publication_failures,
        })
    }

    /// The whole delegation flow: create, arrange, enact, and register
    /// the policy as active.
    pub async fn grant(
        &mut self,
        delegatee: &PublicKeys,
        label: &[u8],
        threshold: usize,
        shares: usize,
        mode: PolicyMode,
    ) -> Result<EnactedPolicy> {
        let mut policy = self
            .create_policy(delegatee, label, threshold, shares, mode)
            .await?;
        self.make_arrangements(&mut policy).await?;
        let enacted = self.enact(policy).await?;

        if self.active_policies.contains_key(&enacted.hrac) {
            return Err(eyre::anyhow!(
                "policy {} already exists in active policies",
                enacted.hrac
            ));
        }
        self.active_policies.insert(enacted.hrac, enacted.clone());
        Ok(enacted)
    }

    /// Invalidate enough kfrags to make the policy unrecoverable:
    /// at least (n − m) + 1 proxies must destroy their share. Failures
    /// are returned per proxy; reaching fewer nodes than the threshold
    /// is `NotEnoughTeachers`.
    pub async fn revoke(
        &mut self,
        policy: &EnactedPolicy,
    ) -> Result<HashMap<Address, (Revocation, RevocationFailure)>> {
        let revocation_threshold = (policy.shares - policy.threshold) + 1;
        let addresses: HashSet<Address> = policy
            .revocation_kit
            .revokable_addresses()
            .into_iter()
            .collect();

        let allow_missing = policy.shares - revocation_threshold;
        let good_to_go = self
            .learner
            .block_until_specific_nodes_are_known(
                &addresses,
                self.node_wait_timeout,
                allow_missing,
            )
            .await;
        if !good_to_go {
            let known = addresses
                .intersection(&self.learner.known_addresses())
                .count();
            return Err(ProtocolError::NotEnoughTeachers {
                required: revocation_threshold,
                known,
            }
            .into());
        }

        let mut failed_revocations = HashMap::new();
        for address in policy.revocation_kit.revokable_addresses() {
            let Some(revocation) = policy.revocation_kit.get(&address) else {
                continue;
            };
            let Some(record) = self.learner.get_record(&address) else {
                continue;
            };
            match self.middleware.revoke_arrangement(&record, revocation).await {
                Ok(()) => {}
                Err(MiddlewareError::NotFound(_)) => {
                    failed_revocations
                        .insert(address, (revocation.clone(), RevocationFailure::NotFound));
                }
                Err(e) => {
                    tracing::warn!("revocation at {} failed: {}", record.nickname(), e);
                    failed_revocations.insert(
                        address,
                        (revocation.clone(), RevocationFailure::UnexpectedResponse),
                    );
                }
            }
        }
        Ok(failed_revocations)
    }
}

impl Character for Alice {
    fn public_keys(&self) -> PublicKeys {
        PublicKeys {
            verifying_key: self.verifying_key(),
            encrypting_key: self.encrypting_key,
        }
    }
}
