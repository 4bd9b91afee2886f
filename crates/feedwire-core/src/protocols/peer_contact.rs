//! Peer contact channel
//!
//! A pairwise encrypted feed on which a peer announces a contact key to
//! one other peer. As with the contact channel, `peer_key` is the reader
//! when writing and the writer when reading.

use std::sync::Arc;
use std::time::Duration;

use crate::client::FeedwireClient;
use crate::error::{FeedwireError, FeedwireResult};
use crate::feed::{ReaderParams, WriterParams};
use crate::identity::{KeyPair, PublicKey};
use crate::namespace::PEER_CONTACT_NAME;
use crate::subscription::Subscription;
use crate::types::PeerContactData;

/// Own key pair and the other peer's public key.
#[derive(Debug, Clone)]
pub struct PeerContactParams {
    pub key_pair: KeyPair,
    pub peer_key: PublicKey,
}

impl PeerContactParams {
    fn writer(&self) -> WriterParams {
        WriterParams::new(self.key_pair.clone(), PEER_CONTACT_NAME).with_reader(Some(self.peer_key.clone()))
    }

    fn reader(&self) -> ReaderParams {
        ReaderParams::new(self.peer_key.clone(), PEER_CONTACT_NAME).with_key_pair(Some(self.key_pair.clone()))
    }
}

pub async fn read_peer_contact(
    client: &FeedwireClient,
    params: &PeerContactParams,
) -> FeedwireResult<Option<PeerContactData>> {
    client.read_feed(&params.reader()).await
}

pub async fn write_peer_contact(
    client: &FeedwireClient,
    params: &PeerContactParams,
    data: &PeerContactData,
) -> FeedwireResult<String> {
    client.write_feed(&params.writer(), data).await
}

pub fn peer_contact_subscriber<N, E>(
    client: &FeedwireClient,
    params: &PeerContactParams,
    interval: Duration,
    on_next: N,
    on_error: E,
) -> FeedwireResult<Subscription>
where
    N: FnMut(PeerContactData) + Send + 'static,
    E: FnMut(Arc<FeedwireError>) + Send + 'static,
{
    client.feed_subscriber(&params.reader(), interval, on_next, on_error)
}
