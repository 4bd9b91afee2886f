//! Peer identity feed: plaintext, readable by address

use std::sync::Arc;
use std::time::Duration;

use crate::channel::FeedOwner;
use crate::client::FeedwireClient;
use crate::error::{FeedwireError, FeedwireResult};
use crate::feed::{FeedPublisher, ReaderParams, WriterParams};
use crate::identity::KeyPair;
use crate::namespace::PEER_NAME;
use crate::subscription::Subscription;
use crate::types::PeerData;

fn reader_params(address: &str) -> ReaderParams {
    ReaderParams::new(FeedOwner::Address(address.to_string()), PEER_NAME)
}

fn writer_params(key_pair: &KeyPair) -> WriterParams {
    WriterParams::new(key_pair.clone(), PEER_NAME)
}

pub async fn read_peer(client: &FeedwireClient, address: &str) -> FeedwireResult<Option<PeerData>> {
    client.read_feed(&reader_params(address)).await
}

pub async fn write_peer(client: &FeedwireClient, key_pair: &KeyPair, data: &PeerData) -> FeedwireResult<String> {
    client.write_feed(&writer_params(key_pair), data).await
}

pub fn peer_publisher(client: &FeedwireClient, key_pair: &KeyPair) -> FeedPublisher<PeerData> {
    client.feed_publisher(writer_params(key_pair))
}

/// Deliver each new version of the peer published at `address`.
pub fn peer_subscriber<N, E>(
    client: &FeedwireClient,
    address: &str,
    interval: Duration,
    on_next: N,
    on_error: E,
) -> FeedwireResult<Subscription>
where
    N: FnMut(PeerData) + Send + 'static,
    E: FnMut(Arc<FeedwireError>) + Send + 'static,
{
    client.feed_subscriber(&reader_params(address), interval, on_next, on_error)
}
