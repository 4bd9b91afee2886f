//! Actor identity feed: plaintext, one per key pair, readable by address

use std::sync::Arc;
use std::time::Duration;

use crate::channel::FeedOwner;
use crate::client::FeedwireClient;
use crate::error::{FeedwireError, FeedwireResult};
use crate::feed::{FeedPublisher, ReaderParams, WriterParams};
use crate::identity::KeyPair;
use crate::namespace::ACTOR_NAME;
use crate::subscription::Subscription;
use crate::types::ActorData;

fn reader_params(address: &str) -> ReaderParams {
    ReaderParams::new(FeedOwner::Address(address.to_string()), ACTOR_NAME)
}

pub async fn read_actor(client: &FeedwireClient, address: &str) -> FeedwireResult<Option<ActorData>> {
    client.read_feed(&reader_params(address)).await
}

pub async fn write_actor(client: &FeedwireClient, key_pair: &KeyPair, data: &ActorData) -> FeedwireResult<String> {
    client
        .write_feed(&WriterParams::new(key_pair.clone(), ACTOR_NAME), data)
        .await
}

pub fn actor_publisher(client: &FeedwireClient, key_pair: &KeyPair) -> FeedPublisher<ActorData> {
    client.feed_publisher(WriterParams::new(key_pair.clone(), ACTOR_NAME))
}

/// Deliver each new version of the actor published at `address`.
pub fn actor_subscriber<N, E>(
    client: &FeedwireClient,
    address: &str,
    interval: Duration,
    on_next: N,
    on_error: E,
) -> FeedwireResult<Subscription>
where
    N: FnMut(ActorData) + Send + 'static,
    E: FnMut(Arc<FeedwireError>) + Send + 'static,
{
    client.feed_subscriber(&reader_params(address), interval, on_next, on_error)
}
