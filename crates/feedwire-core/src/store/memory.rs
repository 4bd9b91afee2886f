//! In-memory store

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use super::{check_signer, content_hash, Store};
use crate::channel::FeedAddress;
use crate::error::{FeedwireError, FeedwireResult};
use crate::identity::KeyPair;

/// In-memory [`Store`], shared between agents through an `Arc`.
///
/// Besides the store operations it counts feed reads and writes and can simulate
/// an unreachable or slow network, which the sync engines' tests rely on.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Bytes>>,
    feeds: Mutex<HashMap<FeedAddress, Bytes>>,
    feed_reads: AtomicUsize,
    feed_writes: AtomicUsize,
    offline: AtomicBool,
    read_delay: Mutex<Option<Duration>>,
    write_delay: Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get_feed_content` calls that reached the feeds so far.
    pub fn feed_read_count(&self) -> usize {
        self.feed_reads.load(Ordering::SeqCst)
    }

    /// Number of successful `set_feed_content` calls so far.
    pub fn feed_write_count(&self) -> usize {
        self.feed_writes.load(Ordering::SeqCst)
    }

    /// Make every operation fail with a store error while `offline`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay each feed read, to hold a pull in flight.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *self.read_delay.lock() = delay;
    }

    /// Delay each feed write, to widen race windows in tests.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.lock() = delay;
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.lock().len()
    }

    fn check_online(&self) -> FeedwireResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(FeedwireError::Store("store is unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upload_blob(&self, data: Bytes) -> FeedwireResult<String> {
        self.check_online()?;
        let hash = content_hash(&data);
        debug!(hash = %hash, size = data.len(), "Stored blob");
        self.blobs.lock().insert(hash.clone(), data);
        Ok(hash)
    }

    async fn download_blob(&self, hash: &str) -> FeedwireResult<Bytes> {
        self.check_online()?;
        self.blobs
            .lock()
            .get(hash)
            .cloned()
            .ok_or_else(|| FeedwireError::Store(format!("blob not found: {}", hash)))
    }

    async fn get_feed_content(&self, feed: &FeedAddress) -> FeedwireResult<Option<Bytes>> {
        self.check_online()?;
        self.feed_reads.fetch_add(1, Ordering::SeqCst);

        let delay = *self.read_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.feeds.lock().get(feed).cloned())
    }

    async fn set_feed_content(
        &self,
        feed: &FeedAddress,
        content: Bytes,
        signer: &KeyPair,
    ) -> FeedwireResult<String> {
        self.check_online()?;
        check_signer(feed, signer)?;

        let delay = *self.write_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let receipt = content_hash(&content);
        self.feeds.lock().insert(feed.clone(), content);
        self.feed_writes.fetch_add(1, Ordering::SeqCst);
        debug!(user = %feed.user, topic = %feed.topic, "Feed updated");
        Ok(receipt)
    }
}
