//! Shared handle to the store, the schema registry and the configuration
//!
//! Every protocol helper and agent takes a [`FeedwireClient`]. It is cheap
//! to clone and carries no per-channel state; channels are derived from
//! the [`WriterParams`]/[`ReaderParams`] handed to each call.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::codec::DecodeOptions;
use crate::config::FeedwireConfig;
use crate::entity::{decode_entity, encode_entity};
use crate::error::{FeedwireError, FeedwireResult};
use crate::feed::{EntityFeedPoller, FeedPublisher, FeedReader, ReaderParams, WriterParams};
use crate::schema::SchemaRegistry;
use crate::store::Store;
use crate::subscription::Subscription;
use crate::timeline::{Timeline, TimelinePublisher};

#[derive(Clone)]
pub struct FeedwireClient {
    store: Arc<dyn Store>,
    schemas: Arc<SchemaRegistry>,
    config: Arc<FeedwireConfig>,
}

impl FeedwireClient {
    /// Client with the builtin schemas and default configuration.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_config(store, FeedwireConfig::default())
    }

    pub fn with_config(store: Arc<dyn Store>, config: FeedwireConfig) -> Self {
        Self {
            store,
            schemas: Arc::new(SchemaRegistry::with_builtin()),
            config: Arc::new(config),
        }
    }

    /// Replace the schema registry, e.g. to add application entity types.
    pub fn with_schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = Arc::new(schemas);
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn config(&self) -> &FeedwireConfig {
        &self.config
    }

    pub(crate) fn decode_options<'a>(&self, key: Option<&'a [u8]>) -> DecodeOptions<'a> {
        DecodeOptions::new(key, self.config.max_payload_size)
    }

    pub(crate) fn decode<T: DeserializeOwned>(
        &self,
        entity_type: &str,
        bytes: &[u8],
        key: Option<&[u8]>,
    ) -> FeedwireResult<T> {
        decode_entity(&self.schemas, entity_type, bytes, self.decode_options(key))
    }

    pub(crate) fn encode<T: Serialize>(
        &self,
        entity_type: &str,
        data: &T,
        key: Option<&[u8]>,
    ) -> FeedwireResult<Bytes> {
        encode_entity(&self.schemas, entity_type, data, key)
    }

    /// Write one entity to a feed, outside of any publish queue.
    pub async fn write_feed<T: Serialize>(&self, params: &WriterParams, data: &T) -> FeedwireResult<String> {
        let channel = params.channel();
        let payload = self.encode(&params.entity_type, data, channel.key())?;
        debug!(user = %channel.feed.user, topic = %channel.feed.topic, "Writing feed");
        self.store
            .set_feed_content(&channel.feed, payload, &params.key_pair)
            .await
    }

    /// Read the latest entity of a feed, `None` if never written.
    pub async fn read_feed<T: DeserializeOwned>(&self, params: &ReaderParams) -> FeedwireResult<Option<T>> {
        self.feed_reader::<T>(params)?.read().await
    }

    /// Serialized writer for one feed.
    pub fn feed_publisher<T: Serialize>(&self, params: WriterParams) -> FeedPublisher<T> {
        FeedPublisher::new(self.clone(), params)
    }

    pub fn feed_reader<T: DeserializeOwned>(&self, params: &ReaderParams) -> FeedwireResult<FeedReader<T>> {
        Ok(FeedReader::new(self.clone(), params.channel()?, params.entity_type.clone()))
    }

    /// Poll a feed and deliver each new, valid entity.
    ///
    /// The first read or decode error goes to `on_error` and ends the
    /// subscription.
    pub fn feed_subscriber<T, N, E>(
        &self,
        params: &ReaderParams,
        interval: Duration,
        on_next: N,
        on_error: E,
    ) -> FeedwireResult<Subscription>
    where
        T: DeserializeOwned + Send + 'static,
        N: FnMut(T) + Send + 'static,
        E: FnMut(Arc<FeedwireError>) + Send + 'static,
    {
        let poller = EntityFeedPoller::<T>::new(self.clone(), params.channel()?, params.entity_type.clone());
        Ok(Subscription::poll(interval, poller, on_next, on_error))
    }

    /// Chapter history written by `params.key_pair`.
    pub fn write_timeline(&self, params: &WriterParams) -> Timeline {
        Timeline::for_writer(self.clone(), params.channel(), params.key_pair.clone())
    }

    /// Chapter history written by `params.writer`, read-only.
    pub fn read_timeline(&self, params: &ReaderParams) -> FeedwireResult<Timeline> {
        Ok(Timeline::for_reader(self.clone(), params.channel()?))
    }

    /// Validating, serialized chapter appender.
    pub fn timeline_publisher<T: Serialize>(&self, params: &WriterParams) -> TimelinePublisher<T> {
        TimelinePublisher::new(self.write_timeline(params), params.entity_type.clone())
    }
}

impl std::fmt::Debug for FeedwireClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedwireClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
