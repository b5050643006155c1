mod commands;

use std::sync::{Arc, Mutex};

use clap::Parser;
use color_eyre::Result;
use colored::Colorize;

use commands::{Cmd, CliArgument};
use pre_network::characters::{Alice, Bob, Character, Enrico, PolicyMode, Ursula};
use pre_network::error::ProtocolError;
use pre_network::middleware::{InMemoryMiddleware, RestMiddleware};
use pre_network::types::NodeRecord;
use runtime::PreKeyMaterial;
use telemetry::{LoggerConfig, init_logger};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let _guards = init_logger(LoggerConfig::default());

    let cmd = Cmd::parse();

    match cmd.argument {
        CliArgument::Demo { shares, threshold, message } => {
            demo(shares, threshold, message.as_bytes()).await?;
        }
        CliArgument::UrsulaRecord { host, port, seed } => {
            let material = match seed {
                Some(seed) => PreKeyMaterial::from_seed(seed.as_bytes())?,
                None => PreKeyMaterial::random(),
            };
            let ursula = Ursula::new_federated(
                material.into_powers(),
                &host,
                port,
                vec!["mainnet".to_string()],
            )?;
            let record = ursula.node_record();
            println!("{} {}", "address:".bright_blue(), record.canonical_address.to_checksum(None));
            println!("{} {}", "record:".bright_blue(), hex::encode(record.to_bytes()?));
        }
        CliArgument::InspectRecord { record } => {
            let bytes = hex::decode(record.trim())?;
            match NodeRecord::from_bytes(&bytes) {
                Ok(record) => {
                    println!("{} {}", "node:".bright_blue(), record.nickname());
                    println!("  interface: {}", record.rest_interface.uri());
                    println!("  domains:   {:?}", record.domains);
                    println!("  timestamp: {}", record.timestamp);
                    match record.verify(None, true, None) {
                        Ok(()) => println!("  {}", "record verifies".green()),
                        Err(e) => println!("  {} {}", "verification failed:".red(), e),
                    }
                }
                Err(e @ ProtocolError::FromTheFuture { .. }) => {
                    println!("{} {}", "record is newer than this build:".yellow(), e);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}

/// The whole protocol in one process: an in-memory network of proxies,
/// a delegation from Alice to Bob, and a retrieval.
async fn demo(shares: usize, threshold: usize, message: &[u8]) -> Result<()> {
    let label: &[u8] = b"demo/label";
    let middleware = Arc::new(InMemoryMiddleware::new());

    let mut records = Vec::new();
    for i in 0..shares {
        let ursula = Ursula::new_federated(
            PreKeyMaterial::random().into_powers(),
            "127.0.0.1",
            9151 + i as u16,
            vec!["demonet".to_string()],
        )?;
        records.push(ursula.node_record());
        println!(
            "{} {}",
            "ursula online:".bright_blue(),
            ursula.address().to_checksum(None).yellow()
        );
        middleware.register(Arc::new(Mutex::new(ursula)));
    }

    let dyn_middleware = Arc::clone(&middleware) as Arc<dyn RestMiddleware>;
    let mut alice = Alice::new(
        PreKeyMaterial::random().into_powers(),
        Arc::clone(&dyn_middleware),
        true,
    )?;
    let mut bob = Bob::new(
        PreKeyMaterial::random().into_powers(),
        dyn_middleware,
        true,
    )?;
    for record in &records {
        alice.learner().record_node(record.clone())?;
        bob.learner().record_node(record.clone())?;
    }

    let policy = alice
        .grant(&bob.public_keys(), label, threshold, shares, PolicyMode::Federated)
        .await?;
    println!(
        "{} {} ({} of {})",
        "policy granted:".bright_blue(),
        policy.map_id.to_string().yellow(),
        threshold,
        shares
    );

    let enrico = Enrico::new(policy.policy_encrypting_key);
    let message_kit = enrico.encrypt_message(message)?;
    println!("{} {} bytes", "enrico encrypted:".bright_blue(), message_kit.ciphertext.len());

    bob.join_policy(label, &alice.verifying_key(), &[]).await?;
    let cleartexts = bob
        .retrieve(&message_kit, &enrico.public_keys(), &alice.verifying_key(), label)
        .await?;

    println!(
        "{} {}",
        "bob retrieved:".bright_blue(),
        String::from_utf8_lossy(&cleartexts[0]).green()
    );
    Ok(())
}
