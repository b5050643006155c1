use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "prenet", about = "Proxy re-encryption network characters")]
pub struct Cmd {
    #[command(subcommand)]
    pub argument: CliArgument,
}

#[derive(Subcommand)]
pub enum CliArgument {
    /// Run the full delegation flow on an in-process network:
    /// grant, encrypt, join, retrieve.
    Demo {
        /// Total shares (n)
        #[arg(long, default_value_t = 3)]
        shares: usize,
        /// Re-encryption threshold (m)
        #[arg(long, default_value_t = 2)]
        threshold: usize,
        /// Plaintext to round-trip through the network
        #[arg(long, default_value = "hello")]
        message: String,
    },
    /// Boot a proxy identity and print its signed node record as hex.
    UrsulaRecord {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 9151)]
        port: u16,
        /// Deterministic key seed (random keys when omitted)
        #[arg(long)]
        seed: Option<String>,
    },
    /// Decode and verify a node record from hex bytes.
    InspectRecord {
        /// Hex-encoded record bytes
        record: String,
    },
}
