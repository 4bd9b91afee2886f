//! Store abstraction
//!
//! The store is a content-addressed blob network with mutable,
//! single-writer feed pointers:
//!
//! - **Blobs** are immutable and addressed by their keccak-256 hash.
//! - **Feeds** hold the latest content written at `(user, topic)`; only the
//!   key pair whose address is `user` may write. Last write wins, there is
//!   no transactional API and no ordering across writers.
//!
//! # Storage Modes
//!
//! - [`MemoryStore`]: in-memory, lost on drop. Use for tests and demos.
//! - [`DirStore`]: persisted as files under a directory, so separate
//!   processes can share feeds.

mod dir;
mod memory;

pub use dir::DirStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use bytes::Bytes;

use crate::channel::FeedAddress;
use crate::crypto::keccak256;
use crate::error::{FeedwireError, FeedwireResult};
use crate::identity::KeyPair;

/// Content-addressed blob store with single-writer feeds.
#[async_trait]
pub trait Store: Send + Sync {
    /// Store an immutable blob and return its hash.
    async fn upload_blob(&self, data: Bytes) -> FeedwireResult<String>;

    /// Fetch a blob by hash.
    async fn download_blob(&self, hash: &str) -> FeedwireResult<Bytes>;

    /// Latest content of a feed, `None` if never written.
    async fn get_feed_content(&self, feed: &FeedAddress) -> FeedwireResult<Option<Bytes>>;

    /// Replace the content of a feed. `signer` must own `feed.user`.
    ///
    /// Returns a receipt: the hash of the stored content.
    async fn set_feed_content(
        &self,
        feed: &FeedAddress,
        content: Bytes,
        signer: &KeyPair,
    ) -> FeedwireResult<String>;
}

/// Hex keccak-256 digest used as blob hash.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(keccak256(data))
}

/// Single-writer check shared by the store implementations.
pub(crate) fn check_signer(feed: &FeedAddress, signer: &KeyPair) -> FeedwireResult<()> {
    let address = signer.address();
    if address != feed.user {
        return Err(FeedwireError::Store(format!(
            "signer {} cannot write feed owned by {}",
            address, feed.user
        )));
    }
    Ok(())
}
