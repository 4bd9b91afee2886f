//! Feedwire CLI
//!
//! Thin wrapper around feedwire-core for key, channel and payload tooling.
//!
//! ## Usage
//!
//! ```bash
//! # Generate a key pair
//! feedwire keygen
//!
//! # Derive the address of a public key
//! feedwire address <public-key-hex>
//!
//! # Frame a JSON document, optionally encrypted
//! feedwire encode --input doc.json --output doc.bin --key <32-byte-hex>
//!
//! # Decode it again
//! feedwire decode --input doc.bin --key <32-byte-hex>
//!
//! # Show the feed a key pair writes for a channel name
//! feedwire channel --private-key <hex> --name feedwire.contact.v0 --peer <public-key-hex>
//!
//! # Run the two-party scenario against an in-memory store
//! feedwire demo
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use feedwire_core::codec::{decode, encode_payload, DecodeOptions, EncodeOptions};
use feedwire_core::protocols::FileUploadParams;
use feedwire_core::{
    logging, write_channel, Agent, AgentData, FeedwireClient, FeedwireConfig, KeyPair, MemoryStore, MessageData,
    ProfileData, PublicKey,
};
use tracing::info;

/// Feedwire - encrypted feeds tooling
#[derive(Parser)]
#[command(name = "feedwire")]
#[command(version)]
#[command(about = "Feedwire - encrypted contact, file system and mailbox protocols over mutable feeds")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a secp256k1 key pair
    Keygen,

    /// Print the address of a public key
    Address {
        /// Uncompressed public key (130 hex characters)
        public_key: String,
    },

    /// Frame a JSON document in the wire format
    Encode {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// 32-byte AES key as hex; encrypts the body when set
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Decode a framed payload and print its JSON body
    Decode {
        #[arg(short, long)]
        input: PathBuf,
        /// 32-byte AES key as hex
        #[arg(short, long)]
        key: Option<String>,
        /// Reject bodies larger than this many bytes
        #[arg(long)]
        max_size: Option<usize>,
    },

    /// Show the channel a key pair writes to
    Channel {
        /// Writer private key as hex
        #[arg(long)]
        private_key: String,
        /// Channel name, e.g. feedwire.contact.v0
        #[arg(short, long)]
        name: String,
        /// Reader public key; the channel is encrypted when set
        #[arg(short, long)]
        peer: Option<String>,
    },

    /// Run a handshake, a message and an encrypted file exchange in memory
    Demo {
        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 50)]
        interval_ms: u64,
    },
}

/// Parse a 32-byte hex key
fn parse_key(s: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(s.trim_start_matches("0x")).map_err(|e| anyhow::anyhow!("Invalid hex key: {}", e))?;
    if bytes.len() != 32 {
        anyhow::bail!("Key must be 32 bytes (got {})", bytes.len());
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

fn parse_public_key(s: &str) -> Result<PublicKey> {
    PublicKey::from_hex(s).with_context(|| format!("Invalid public key '{}'", s))
}

/// Poll `ready` until it holds or `timeout` elapses.
async fn wait_until(what: &str, timeout: Duration, mut ready: impl FnMut() -> bool) -> Result<()> {
    let step = Duration::from_millis(10);
    tokio::time::timeout(timeout, async {
        while !ready() {
            tokio::time::sleep(step).await;
        }
    })
    .await
    .with_context(|| format!("Timed out waiting for {}", what))
}

async fn run_demo(interval: Duration) -> Result<()> {
    let timeout = interval * 100;
    let client = FeedwireClient::with_config(
        Arc::new(MemoryStore::new()),
        FeedwireConfig::with_poll_interval(interval),
    );

    let alice = Agent::new(client.clone(), AgentData::generate(), true)?;
    let bob = Agent::new(client.clone(), AgentData::generate(), true)?;
    alice.write_actor(Some(ProfileData::named("Alice"))).await?;
    bob.write_actor(Some(ProfileData::named("Bob"))).await?;
    println!("Alice: {}", alice.address());
    println!("Bob:   {}", bob.address());

    let to_bob = alice.add_contact(&bob.address()).await?;
    let to_alice = bob.add_contact(&alice.address()).await?;
    wait_until("handshake", timeout, || to_bob.is_connected() && to_alice.is_connected()).await?;
    println!();
    println!("Handshake: connected");

    to_bob.set_profile(ProfileData::named("Alice")).await?;
    to_bob.add_outbox("main").await?;
    wait_until("Bob's inbox", timeout, || to_alice.inboxes().has_inbox("main")).await?;

    let outboxes = to_bob.outboxes().context("Alice has no outboxes")?;
    outboxes.send_message("main", &MessageData::text("Hello Bob")).await?;
    let inbox = to_alice.inboxes().get_inbox("main").context("Bob has no inbox")?;
    wait_until("message", timeout, || !inbox.messages().is_empty()).await?;
    for message in inbox.messages() {
        println!("Message: {}", message.body);
    }

    to_bob.create_outbound_file_system().await?;
    let outbound = to_bob.outbound_file_system().context("Alice has no file system")?;
    let file = outbound
        .upload_file("/hello.txt", b"Hello test", &FileUploadParams::encrypted())
        .await?;
    outbound.push().await;
    info!(hash = %file.hash, "Uploaded demo file");

    wait_until("Bob's file system", timeout, || to_alice.inbound_file_system().is_some()).await?;
    let inbound = to_alice.inbound_file_system().context("Bob has no inbound file system")?;
    inbound.pull().await;
    let text = inbound.file_system().download_text("/hello.txt").await?;
    println!("File /hello.txt: {}", text);

    alice.stop_all();
    bob.stop_all();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(cli.verbose);

    match cli.command {
        Commands::Keygen => {
            let key_pair = KeyPair::generate();
            println!("Private key: {}", key_pair.private_key_hex());
            println!("Public key:  {}", key_pair.public_key().to_hex());
            println!("Address:     {}", key_pair.address());
        }

        Commands::Address { public_key } => {
            println!("{}", parse_public_key(&public_key)?.address());
        }

        Commands::Encode { input, output, key } => {
            let raw = std::fs::read(&input).with_context(|| format!("Failed to read {}", input.display()))?;
            let document: serde_json::Value =
                serde_json::from_slice(&raw).with_context(|| format!("{} is not JSON", input.display()))?;
            let key = key.as_deref().map(parse_key).transpose()?;

            let framed = encode_payload(&document, EncodeOptions::with_key(key.as_ref().map(|k| k.as_slice())))?;
            std::fs::write(&output, &framed).with_context(|| format!("Failed to write {}", output.display()))?;
            println!("Wrote {} bytes to {}", framed.len(), output.display());
        }

        Commands::Decode { input, key, max_size } => {
            let raw = std::fs::read(&input).with_context(|| format!("Failed to read {}", input.display()))?;
            let key = key.as_deref().map(parse_key).transpose()?;

            let body = decode(&raw, DecodeOptions::new(key.as_ref().map(|k| k.as_slice()), max_size))
                .context("Failed to decode payload")?;
            let document: serde_json::Value = serde_json::from_slice(&body).context("Body is not JSON")?;
            println!("{}", serde_json::to_string_pretty(&document)?);
        }

        Commands::Channel { private_key, name, peer } => {
            let key_pair = KeyPair::from_private_hex(&private_key).context("Invalid private key")?;
            let peer = peer.as_deref().map(parse_public_key).transpose()?;

            let channel = write_channel(&key_pair, Some(&name), peer.as_ref());
            println!("Address: {}", channel.feed.user);
            println!("Topic:   {}", channel.feed.topic);
            match channel.key() {
                Some(key) => println!("Key:     {}", hex::encode(key)),
                None => println!("Key:     (none)"),
            }
        }

        Commands::Demo { interval_ms } => {
            run_demo(Duration::from_millis(interval_ms)).await?;
        }
    }

    Ok(())
}
