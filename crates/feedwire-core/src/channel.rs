//! Channel key derivation
//!
//! A channel is the (feed address, topic, optional key) triple that one
//! logical stream of payloads is written to and read from. Nothing about
//! a channel is persisted; both sides recompute it from key material.
//!
//! ## Derivation
//!
//! ```text
//! plaintext:  user = address(writer)   topic = feed_topic(name, 0)
//! encrypted:  key  = ECDH(self, counterparty)
//!             user = address(writer)   topic = feed_topic(name, keccak256(key))
//! ```
//!
//! `feed_topic` XORs the UTF-8 name (truncated or zero-padded to 32 bytes)
//! into the 32-byte base topic. ECDH symmetry makes the writer's and the
//! reader's derivations agree on both `key` and `topic`, while the topic
//! reveals nothing about the key beyond its hash.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::keccak256;
use crate::error::{FeedwireError, FeedwireResult};
use crate::identity::{KeyPair, PublicKey, PUBLIC_KEY_HEX_LEN};

/// 32-byte feed topic
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Topic(pub [u8; 32]);

impl Topic {
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({})", self.to_hex())
    }
}

/// Location of a single-writer feed in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedAddress {
    /// `0x`-prefixed address of the only key pair allowed to write
    pub user: String,
    pub topic: Topic,
}

/// Feed location plus the symmetric key its payloads are encrypted with
#[derive(Clone, PartialEq, Eq)]
pub struct Channel {
    pub feed: FeedAddress,
    pub key: Option<[u8; 32]>,
}

impl Channel {
    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_ref().map(|k| k.as_slice())
    }

    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("feed", &self.feed)
            .field("encrypted", &self.is_encrypted())
            .finish()
    }
}

/// Who owns a feed we want to read.
///
/// Plaintext feeds can be read knowing only an address; encrypted feeds
/// need the writer's public key to derive the shared secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedOwner {
    Address(String),
    PublicKey(PublicKey),
}

impl FeedOwner {
    /// Interpret a 130-char value as a public key, anything else as an address.
    pub fn parse(value: &str) -> FeedwireResult<Self> {
        if value.len() == PUBLIC_KEY_HEX_LEN {
            Ok(FeedOwner::PublicKey(PublicKey::from_hex(value)?))
        } else {
            Ok(FeedOwner::Address(value.to_string()))
        }
    }

    pub fn address(&self) -> String {
        match self {
            FeedOwner::Address(address) => address.clone(),
            FeedOwner::PublicKey(key) => key.address(),
        }
    }
}

impl From<PublicKey> for FeedOwner {
    fn from(key: PublicKey) -> Self {
        FeedOwner::PublicKey(key)
    }
}

/// XOR `name` into `base` (zeros when absent).
pub fn feed_topic(name: Option<&str>, base: Option<[u8; 32]>) -> Topic {
    let mut bytes = base.unwrap_or([0u8; 32]);
    if let Some(name) = name {
        for (b, n) in bytes.iter_mut().zip(name.as_bytes()) {
            *b ^= n;
        }
    }
    Topic(bytes)
}

/// Topic of an encrypted channel: the name mixed into `keccak256(key)`.
pub fn shared_topic(key: &[u8; 32], name: Option<&str>) -> Topic {
    feed_topic(name, Some(keccak256(key)))
}

/// Channel `key_pair` writes to, encrypted for `reader` when given.
pub fn write_channel(key_pair: &KeyPair, name: Option<&str>, reader: Option<&PublicKey>) -> Channel {
    let user = key_pair.address();
    match reader {
        None => Channel {
            feed: FeedAddress {
                user,
                topic: feed_topic(name, None),
            },
            key: None,
        },
        Some(reader) => {
            let key = key_pair.shared_secret(reader);
            Channel {
                feed: FeedAddress {
                    user,
                    topic: shared_topic(&key, name),
                },
                key: Some(key),
            }
        }
    }
}

/// Channel written by `writer`, decrypted with `key_pair` when given.
///
/// Fails with `InvalidCounterpartyKey` if a key pair is provided but the
/// writer is only known by address.
pub fn read_channel(
    writer: &FeedOwner,
    name: Option<&str>,
    key_pair: Option<&KeyPair>,
) -> FeedwireResult<Channel> {
    let user = writer.address();
    match (key_pair, writer) {
        (None, _) => Ok(Channel {
            feed: FeedAddress {
                user,
                topic: feed_topic(name, None),
            },
            key: None,
        }),
        (Some(key_pair), FeedOwner::PublicKey(writer_key)) => {
            let key = key_pair.shared_secret(writer_key);
            Ok(Channel {
                feed: FeedAddress {
                    user,
                    topic: shared_topic(&key, name),
                },
                key: Some(key),
            })
        }
        (Some(_), FeedOwner::Address(address)) => Err(FeedwireError::InvalidCounterpartyKey(
            format!("writer {} must be a public key to derive a shared key", address),
        )),
    }
}

/// Derived channel parameters as seen from one side of a pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedChannel {
    pub address: String,
    pub topic: Topic,
    pub key: Option<[u8; 32]>,
}

/// Derive own-side channel parameters, optionally against a counterparty.
///
/// `counterparty` is a hex public key; an invalid value fails with
/// `InvalidCounterpartyKey`.
pub fn derive_channel(
    key_pair: &KeyPair,
    name: Option<&str>,
    counterparty: Option<&str>,
) -> FeedwireResult<DerivedChannel> {
    let reader = counterparty.map(PublicKey::from_hex).transpose()?;
    let channel = write_channel(key_pair, name, reader.as_ref());
    Ok(DerivedChannel {
        address: channel.feed.user,
        topic: channel.feed.topic,
        key: channel.key,
    })
}
