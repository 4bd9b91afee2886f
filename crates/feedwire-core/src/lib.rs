//! Feedwire Core Library
//!
//! Encrypted contact, file system and mailbox protocols over mutable,
//! owner-signed feeds.
//!
//! ## Overview
//!
//! Every piece of data lives in a *feed*: a single mutable slot addressed
//! by the owner's address and a 32-byte topic. Feeds hold codec-framed
//! JSON entities, optionally encrypted with AES-256-GCM. Two parties
//! share a channel key through secp256k1 ECDH, so a feed written for a
//! given reader can only be opened by that reader.
//!
//! On top of feeds sit timelines (hash-linked chapter histories), and on
//! top of both the builtin protocols: actor, peer, first contact, peer
//! contact, contact, file system and mailbox. The [`agent`] module drives them: contact
//! handshakes, file system push/pull sync and inbox reconciliation.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use feedwire_core::{Agent, AgentData, FeedwireClient, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> feedwire_core::FeedwireResult<()> {
//!     let client = FeedwireClient::new(Arc::new(MemoryStore::new()));
//!     let alice = Agent::new(client.clone(), AgentData::generate(), true)?;
//!     let bob = Agent::new(client, AgentData::generate(), true)?;
//!     alice.write_actor(None).await?;
//!     bob.write_actor(None).await?;
//!
//!     // Both sides announce a contact key and wait for the other's
//!     let contact = alice.add_contact(&bob.address()).await?;
//!     bob.add_contact(&alice.address()).await?;
//!     println!("{:?}", contact.state());
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod entity;
pub mod error;
pub mod feed;
pub mod identity;
pub mod logging;
pub mod namespace;
pub mod protocols;
pub mod schema;
pub mod store;
pub mod subscription;
pub mod timeline;
pub mod types;

// Re-exports
pub use agent::{Agent, AgentData, ContactAgent, ContactState, InboxState, InboxesAgent, OutboxesAgent};
pub use channel::{read_channel, write_channel, Channel, FeedOwner};
pub use client::FeedwireClient;
pub use codec::{decode, encode_payload, DecodeOptions, EncodeOptions};
pub use config::FeedwireConfig;
pub use error::{FeedwireError, FeedwireResult};
pub use feed::{FeedPublisher, FeedReader, ReaderParams, WriterParams};
pub use identity::{KeyPair, PublicKey};
pub use protocols::{FileSystemReader, FileSystemWriter, PullSyncState, PushSyncState};
pub use store::{DirStore, MemoryStore, Store};
pub use subscription::Subscription;
pub use timeline::{Chapter, Timeline, TimelinePublisher};
pub use types::*;
