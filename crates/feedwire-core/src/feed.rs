//! Feed access: writer/reader parameters, publishers and pollers

use std::marker::PhantomData;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::channel::{read_channel, write_channel, Channel, FeedAddress, FeedOwner};
use crate::client::FeedwireClient;
use crate::entity::PublishQueue;
use crate::error::FeedwireResult;
use crate::identity::{KeyPair, PublicKey};
use crate::namespace::type_id;
use crate::store::Store;
use crate::subscription::Poller;

/// What a writer needs to publish on a channel.
#[derive(Debug, Clone)]
pub struct WriterParams {
    pub key_pair: KeyPair,
    /// Channel name mixed into the topic
    pub name: String,
    pub entity_type: String,
    /// Encrypt for this reader; plaintext when `None`
    pub reader: Option<PublicKey>,
}

impl WriterParams {
    /// Plaintext channel whose entity type is derived from `name`.
    pub fn new(key_pair: KeyPair, name: &str) -> Self {
        Self {
            key_pair,
            name: name.to_string(),
            entity_type: type_id(name),
            reader: None,
        }
    }

    pub fn with_reader(mut self, reader: Option<PublicKey>) -> Self {
        self.reader = reader;
        self
    }

    pub fn with_entity_type(mut self, name: &str) -> Self {
        self.entity_type = type_id(name);
        self
    }

    pub fn channel(&self) -> Channel {
        write_channel(&self.key_pair, Some(&self.name), self.reader.as_ref())
    }
}

/// What a reader needs to find and open a channel.
#[derive(Debug, Clone)]
pub struct ReaderParams {
    pub writer: FeedOwner,
    pub name: String,
    pub entity_type: String,
    /// Decrypt with the secret shared with `writer`; plaintext when `None`
    pub key_pair: Option<KeyPair>,
}

impl ReaderParams {
    pub fn new(writer: impl Into<FeedOwner>, name: &str) -> Self {
        Self {
            writer: writer.into(),
            name: name.to_string(),
            entity_type: type_id(name),
            key_pair: None,
        }
    }

    pub fn with_key_pair(mut self, key_pair: Option<KeyPair>) -> Self {
        self.key_pair = key_pair;
        self
    }

    pub fn with_entity_type(mut self, name: &str) -> Self {
        self.entity_type = type_id(name);
        self
    }

    /// Fails with `InvalidCounterpartyKey` when decrypting a feed whose
    /// writer is only known by address.
    pub fn channel(&self) -> FeedwireResult<Channel> {
        read_channel(&self.writer, Some(&self.name), self.key_pair.as_ref())
    }
}

/// Serialized writer for a single feed.
///
/// Clones share the same queue, so concurrent `publish` calls from any
/// clone are written one at a time in call order.
pub struct FeedPublisher<T> {
    client: FeedwireClient,
    key_pair: KeyPair,
    channel: Channel,
    entity_type: String,
    queue: PublishQueue,
    _data: PhantomData<fn(&T)>,
}

impl<T> Clone for FeedPublisher<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            key_pair: self.key_pair.clone(),
            channel: self.channel.clone(),
            entity_type: self.entity_type.clone(),
            queue: self.queue.clone(),
            _data: PhantomData,
        }
    }
}

impl<T: Serialize> FeedPublisher<T> {
    pub(crate) fn new(client: FeedwireClient, params: WriterParams) -> Self {
        Self {
            client,
            channel: params.channel(),
            key_pair: params.key_pair,
            entity_type: params.entity_type,
            queue: PublishQueue::new(),
            _data: PhantomData,
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Validate, encode and write `data`; returns the store receipt.
    pub async fn publish(&self, data: &T) -> FeedwireResult<String> {
        // Validation failures never take a queue slot
        let payload = self.client.encode(&self.entity_type, data, self.channel.key())?;
        self.queue
            .run(async {
                debug!(
                    user = %self.channel.feed.user,
                    topic = %self.channel.feed.topic,
                    entity = %self.entity_type,
                    "Publishing entity"
                );
                self.client
                    .store()
                    .set_feed_content(&self.channel.feed, payload, &self.key_pair)
                    .await
            })
            .await
    }
}

/// Reads the latest entity of one feed.
pub struct FeedReader<T> {
    client: FeedwireClient,
    channel: Channel,
    entity_type: String,
    _data: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> FeedReader<T> {
    pub(crate) fn new(client: FeedwireClient, channel: Channel, entity_type: String) -> Self {
        Self {
            client,
            channel,
            entity_type,
            _data: PhantomData,
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub async fn read(&self) -> FeedwireResult<Option<T>> {
        match self.client.store().get_feed_content(&self.channel.feed).await? {
            None => Ok(None),
            Some(bytes) => self
                .client
                .decode(&self.entity_type, &bytes, self.channel.key())
                .map(Some),
        }
    }
}

/// Emits a feed's raw content whenever it changes; empty feeds are skipped.
pub struct FeedPoller {
    store: std::sync::Arc<dyn Store>,
    feed: FeedAddress,
    last: Option<Bytes>,
}

impl FeedPoller {
    pub fn new(store: std::sync::Arc<dyn Store>, feed: FeedAddress) -> Self {
        Self {
            store,
            feed,
            last: None,
        }
    }
}

#[async_trait]
impl Poller for FeedPoller {
    type Item = Bytes;

    async fn poll(&mut self) -> FeedwireResult<Option<Bytes>> {
        let content = self.store.get_feed_content(&self.feed).await?;
        match content {
            Some(bytes) if self.last.as_ref() != Some(&bytes) => {
                self.last = Some(bytes.clone());
                Ok(Some(bytes))
            }
            _ => Ok(None),
        }
    }
}

/// [`FeedPoller`] that decodes and validates each new payload.
pub struct EntityFeedPoller<T> {
    inner: FeedPoller,
    client: FeedwireClient,
    key: Option<[u8; 32]>,
    entity_type: String,
    _data: PhantomData<fn() -> T>,
}

impl<T> EntityFeedPoller<T> {
    pub(crate) fn new(client: FeedwireClient, channel: Channel, entity_type: String) -> Self {
        Self {
            inner: FeedPoller::new(client.store().clone(), channel.feed),
            client,
            key: channel.key,
            entity_type,
            _data: PhantomData,
        }
    }
}

#[async_trait]
impl<T> Poller for EntityFeedPoller<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Item = T;

    async fn poll(&mut self) -> FeedwireResult<Option<T>> {
        match self.inner.poll().await? {
            None => Ok(None),
            Some(bytes) => {
                let key = self.key.as_ref().map(|k| k.as_slice());
                self.client.decode(&self.entity_type, &bytes, key).map(Some)
            }
        }
    }
}
