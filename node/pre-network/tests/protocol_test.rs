use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_primitives::Address;
use color_eyre::Result;

use pre_network::characters::{Alice, Bob, Character, Enrico, PolicyMode, Ursula};
use pre_network::error::ProtocolError;
use pre_network::middleware::{InMemoryMiddleware, RestMiddleware};
use pre_network::types::NodeRecord;
use runtime::PreKeyMaterial;
use runtime::reencrypt::generate_policy_kfrags;

const LABEL: &[u8] = b"secret/treatment-plan";

struct TestNetwork {
    middleware: Arc<InMemoryMiddleware>,
    records: Vec<NodeRecord>,
}

fn start_network(n: usize, base_port: u16) -> Result<TestNetwork> {
    let middleware = Arc::new(InMemoryMiddleware::new());
    let mut records = Vec::new();
    for i in 0..n {
        let ursula = Ursula::new_federated(
            PreKeyMaterial::random().into_powers(),
            "127.0.0.1",
            base_port + i as u16,
            vec!["testnet".to_string()],
        )?;
        records.push(ursula.node_record());
        middleware.register(Arc::new(Mutex::new(ursula)));
    }
    Ok(TestNetwork { middleware, records })
}

impl TestNetwork {
    fn dyn_middleware(&self) -> Arc<dyn RestMiddleware> {
        Arc::clone(&self.middleware) as Arc<dyn RestMiddleware>
    }

    fn alice(&self, seed: u64) -> Result<Alice> {
        let alice = Alice::new(
            PreKeyMaterial::random().into_powers(),
            self.dyn_middleware(),
            true,
        )?
        .with_rng_seed(seed)
        .with_node_wait_timeout(Duration::from_secs(1));
        for record in &self.records {
            alice.learner().record_node(record.clone())?;
        }
        Ok(alice)
    }

    fn bob(&self, seed: u64) -> Result<Bob> {
        let bob = Bob::new(
            PreKeyMaterial::random().into_powers(),
            self.dyn_middleware(),
            true,
        )?
        .with_rng_seed(seed)
        .with_node_wait_timeout(Duration::from_secs(1));
        for record in &self.records {
            bob.learner().record_node(record.clone())?;
        }
        Ok(bob)
    }
}

/// Federated happy path: grant, encrypt, join, retrieve.
#[tokio::test]
async fn test_federated_grant_and_retrieve() -> Result<()> {
    let network = start_network(3, 9200)?;
    let mut alice = network.alice(1)?;
    let mut bob = network.bob(2)?;

    let policy = alice
        .grant(&bob.public_keys(), LABEL, 2, 3, PolicyMode::Federated)
        .await?;
    assert!(policy.publication_failures.is_empty());
    assert_eq!(policy.arrangements.len(), 3);

    let enrico = Enrico::new(policy.policy_encrypting_key);
    let message_kit = enrico.encrypt_message(b"hello")?;

    bob.join_policy(LABEL, &alice.verifying_key(), &[]).await?;
    let cleartexts = bob
        .retrieve(&message_kit, &enrico.public_keys(), &alice.verifying_key(), LABEL)
        .await?;

    assert_eq!(cleartexts.len(), 1);
    assert_eq!(&cleartexts[0] as &[u8], b"hello");
    Ok(())
}

/// One proxy down mid-retrieval is tolerated while m of n survive.
#[tokio::test]
async fn test_retrieve_tolerates_offline_proxy() -> Result<()> {
    let network = start_network(3, 9210)?;
    let mut alice = network.alice(3)?;
    let mut bob = network.bob(4)?;

    let policy = alice
        .grant(&bob.public_keys(), LABEL, 2, 3, PolicyMode::Federated)
        .await?;

    let enrico = Enrico::new(policy.policy_encrypting_key);
    let message_kit = enrico.encrypt_message(b"hello")?;

    bob.join_policy(LABEL, &alice.verifying_key(), &[]).await?;

    // the first destination in the map goes dark
    let offline = policy.arrangements[0].ursula_address;
    network.middleware.set_offline(offline, true);

    let cleartexts = bob
        .retrieve(&message_kit, &enrico.public_keys(), &alice.verifying_key(), LABEL)
        .await?;
    assert_eq!(&cleartexts[0] as &[u8], b"hello");
    Ok(())
}

/// A proxy answering with a cfrag from a foreign kfrag is caught, and
/// the evidence carries the exact capsule and cfrag bytes.
#[tokio::test]
async fn test_incorrect_cfrag_surfaces_evidence() -> Result<()> {
    let network = start_network(3, 9220)?;
    let mut alice = network.alice(5)?;
    let mut bob = network.bob(6)?;

    let policy = alice
        .grant(&bob.public_keys(), LABEL, 2, 3, PolicyMode::Federated)
        .await?;

    let enrico = Enrico::new(policy.policy_encrypting_key);
    let message_kit = enrico.encrypt_message(b"hello")?;

    bob.join_policy(LABEL, &alice.verifying_key(), &[]).await?;

    // the first destination starts serving cfrags from an unrelated policy
    let offender = policy.arrangements[0].ursula_address;
    let foreign = PreKeyMaterial::random();
    let (foreign_sk, _) = foreign.delegating.derive_policy_key(b"foreign/label");
    let foreign_kfrags = generate_policy_kfrags(
        &foreign_sk,
        &bob.encrypting_key(),
        foreign.signing.signer(),
        2,
        3,
    )?;
    network
        .middleware
        .set_malicious_kfrag(offender, foreign_kfrags[0].clone());

    let report = bob
        .retrieve(&message_kit, &enrico.public_keys(), &alice.verifying_key(), LABEL)
        .await
        .expect_err("misbehavior must abort retrieval");

    match report.downcast_ref::<ProtocolError>() {
        Some(ProtocolError::IncorrectCFrag(evidence)) => {
            assert_eq!(evidence.offending_address, offender);
            assert_eq!(
                serde_json::to_vec(&evidence.capsule)?,
                serde_json::to_vec(&message_kit.capsule)?
            );
        }
        other => panic!("expected IncorrectCFrag, got {:?}", other),
    }
    Ok(())
}

/// After revocation enough proxies refuse that the threshold is unmet.
#[tokio::test]
async fn test_revoked_policy_cannot_be_retrieved() -> Result<()> {
    let network = start_network(3, 9230)?;
    let mut alice = network.alice(7)?;
    let mut bob = network.bob(8)?;

    let policy = alice
        .grant(&bob.public_keys(), LABEL, 2, 3, PolicyMode::Federated)
        .await?;

    let enrico = Enrico::new(policy.policy_encrypting_key);
    let message_kit = enrico.encrypt_message(b"hello")?;

    bob.join_policy(LABEL, &alice.verifying_key(), &[]).await?;

    let failures = alice.revoke(&policy).await?;
    assert!(failures.is_empty(), "all proxies honored the revocation");

    let report = bob
        .retrieve(&message_kit, &enrico.public_keys(), &alice.verifying_key(), LABEL)
        .await
        .expect_err("revoked policy must not be retrievable");
    assert!(matches!(
        report.downcast_ref::<ProtocolError>(),
        Some(ProtocolError::NotEnoughProxies { required: 2, attached: 0 })
    ));
    Ok(())
}

/// Federated policy creation fails loudly when too few nodes become
/// known before the deadline, naming the deficit.
#[tokio::test]
async fn test_not_enough_teachers_names_the_deficit() -> Result<()> {
    let network = start_network(3, 9240)?;
    let mut alice = network.alice(9)?;
    let bob = network.bob(10)?;

    let report = alice
        .create_policy(&bob.public_keys(), LABEL, 3, 5, PolicyMode::Federated)
        .await
        .expect_err("5 shares with 3 known nodes must fail");

    match report.downcast_ref::<ProtocolError>() {
        Some(ProtocolError::NotEnoughTeachers { required: 5, known: 3 }) => {}
        other => panic!("expected NotEnoughTeachers, got {:?}", other),
    }
    assert!(report.to_string().contains("2 short"));
    Ok(())
}

/// Asking for a map no proxy serves terminates with NowhereToBeFound.
#[tokio::test]
async fn test_unknown_map_is_nowhere_to_be_found() -> Result<()> {
    let network = start_network(3, 9250)?;
    let mut bob = network.bob(11)?;
    let stranger = PreKeyMaterial::random();

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        bob.join_policy(b"no/such/policy", &stranger.signing.verifying_key(), &[]),
    )
    .await
    .expect("join must not block indefinitely")
    .expect_err("no proxy serves this map");

    assert!(matches!(
        report.downcast_ref::<ProtocolError>(),
        Some(ProtocolError::NowhereToBeFound(_))
    ));
    Ok(())
}

/// A stranger minting a self-consistent kit under the real policy key
/// is caught at the provenance check: the kit did not come from the
/// data source the caller named.
#[tokio::test]
async fn test_forged_data_source_is_rejected() -> Result<()> {
    let network = start_network(3, 9280)?;
    let mut alice = network.alice(14)?;
    let mut bob = network.bob(15)?;

    let policy = alice
        .grant(&bob.public_keys(), LABEL, 2, 3, PolicyMode::Federated)
        .await?;

    let enrico = Enrico::new(policy.policy_encrypting_key);
    // the policy encrypting key is public, so mallory can produce a
    // kit that verifies under her own keypair
    let mallory = Enrico::new(policy.policy_encrypting_key);
    let forged_kit = mallory.encrypt_message(b"forged")?;

    bob.join_policy(LABEL, &alice.verifying_key(), &[]).await?;

    let report = bob
        .retrieve(&forged_kit, &enrico.public_keys(), &alice.verifying_key(), LABEL)
        .await
        .expect_err("a kit from an unexpected data source must be refused");
    assert!(matches!(
        report.downcast_ref::<ProtocolError>(),
        Some(ProtocolError::InvalidSignature(_))
    ));
    Ok(())
}

/// A record claiming an address other than its certificate's CN is
/// rejected.
#[tokio::test]
async fn test_record_with_foreign_address_is_rejected() -> Result<()> {
    let network = start_network(1, 9260)?;
    let mut record = network.records[0].clone();
    record.canonical_address = Address::repeat_byte(0xAB);

    let result = record.verify(None, true, None);
    assert!(matches!(result, Err(ProtocolError::InvalidNode(_))));
    Ok(())
}

/// The same (proxy, capsule) pair is never requested twice: a second
/// retrieval of the same kit generates no further work orders.
#[tokio::test]
async fn test_work_orders_deduplicate_across_retrievals() -> Result<()> {
    let network = start_network(3, 9270)?;
    let mut alice = network.alice(12)?;
    let mut bob = network.bob(13)?;

    let policy = alice
        .grant(&bob.public_keys(), LABEL, 2, 3, PolicyMode::Federated)
        .await?;
    let enrico = Enrico::new(policy.policy_encrypting_key);
    let message_kit = enrico.encrypt_message(b"hello")?;

    let map_id = bob.join_policy(LABEL, &alice.verifying_key(), &[]).await?;

    let first = bob.generate_work_orders(&map_id, &[message_kit.capsule.clone()], None)?;
    assert_eq!(first.len(), 3);

    let second = bob.generate_work_orders(&map_id, &[message_kit.capsule.clone()], None)?;
    assert!(second.is_empty(), "every pair was already requested");
    Ok(())
}
