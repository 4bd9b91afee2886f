//! Directory-backed store
//!
//! Layout under the root directory:
//!
//! ```text
//! blobs/<hash>
//! feeds/<user>/<topic hex>
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use super::{check_signer, content_hash, Store};
use crate::channel::FeedAddress;
use crate::error::{FeedwireError, FeedwireResult};
use crate::identity::KeyPair;

/// [`Store`] persisted as plain files, so several processes can share it.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> FeedwireResult<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(root.join("blobs")).await?;
        tokio::fs::create_dir_all(root.join("feeds")).await?;
        info!(path = %root.display(), "Opened directory store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, hash: &str) -> FeedwireResult<PathBuf> {
        if hash.is_empty() || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(FeedwireError::Store(format!("invalid blob hash: {}", hash)));
        }
        Ok(self.root.join("blobs").join(hash))
    }

    fn feed_path(&self, feed: &FeedAddress) -> FeedwireResult<PathBuf> {
        let user = feed.user.trim_start_matches("0x");
        if user.is_empty() || !user.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(FeedwireError::Store(format!("invalid feed user: {}", feed.user)));
        }
        Ok(self
            .root
            .join("feeds")
            .join(&feed.user)
            .join(hex::encode(feed.topic.0)))
    }
}

#[async_trait]
impl Store for DirStore {
    async fn upload_blob(&self, data: Bytes) -> FeedwireResult<String> {
        let hash = content_hash(&data);
        tokio::fs::write(self.blob_path(&hash)?, &data).await?;
        debug!(hash = %hash, size = data.len(), "Stored blob");
        Ok(hash)
    }

    async fn download_blob(&self, hash: &str) -> FeedwireResult<Bytes> {
        match tokio::fs::read(self.blob_path(hash)?).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(FeedwireError::Store(format!("blob not found: {}", hash)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_feed_content(&self, feed: &FeedAddress) -> FeedwireResult<Option<Bytes>> {
        match tokio::fs::read(self.feed_path(feed)?).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_feed_content(
        &self,
        feed: &FeedAddress,
        content: Bytes,
        signer: &KeyPair,
    ) -> FeedwireResult<String> {
        check_signer(feed, signer)?;
        let path = self.feed_path(feed)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write then rename so readers never see a partial feed
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &content).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(user = %feed.user, topic = %feed.topic, "Feed updated");
        Ok(content_hash(&content))
    }
}
