//! Encrypted virtual file systems
//!
//! A file system is a `path -> FileRef` map published wholesale on a
//! single feed. File contents are separate blobs, each optionally
//! encrypted with its own random key carried in the `FileRef`.
//!
//! [`FileSystemWriter`] owns the map: mutations apply locally and mark it
//! dirty, and [`FileSystemWriter::push`] publishes the whole map.
//! [`FileSystemReader`] pulls the writer's feed and replaces its copy when
//! the content changed. Both expose their state through `watch` channels
//! and can run their sync step on a fixed interval.

use std::sync::{Arc, Weak};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::channel::{write_channel, Channel};
use crate::client::FeedwireClient;
use crate::crypto::{self, CRYPTO_ALGORITHM};
use crate::entity::PublishQueue;
use crate::error::{FeedwireError, FeedwireResult};
use crate::feed::{FeedReader, ReaderParams};
use crate::identity::{KeyPair, PublicKey};
use crate::namespace::{type_id, FILE_SYSTEM_NAME};
use crate::schema::is_valid_path;
use crate::subscription::{CancelGate, Subscription};
use crate::types::{FileEncryption, FileRef, FileSystemData, FilesRecord};

// ═══════════════════════════════════════════════════════════════════════
// File blobs
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct FileUploadParams {
    /// Encrypt with a fresh random key
    pub encrypt: bool,
    pub content_type: Option<String>,
    /// Recorded size; defaults to the plaintext length
    pub size: Option<u64>,
}

impl FileUploadParams {
    pub fn encrypted() -> Self {
        Self {
            encrypt: true,
            ..Default::default()
        }
    }
}

/// Upload `data` as a blob and describe it as a [`FileRef`].
pub async fn upload_file(client: &FeedwireClient, data: &[u8], params: &FileUploadParams) -> FeedwireResult<FileRef> {
    let size = params.size.unwrap_or(data.len() as u64);

    let (blob, encryption) = if params.encrypt {
        let key = crypto::generate_key();
        let payload = crypto::encrypt(CRYPTO_ALGORITHM, &key, data)?;
        let encryption = FileEncryption {
            algorithm: payload.params.algorithm,
            auth_tag: payload.params.auth_tag,
            iv: payload.params.iv,
            key: BASE64.encode(key),
        };
        (Bytes::from(payload.data), Some(encryption))
    } else {
        (Bytes::copy_from_slice(data), None)
    };

    let hash = client.store().upload_blob(blob).await?;
    debug!(hash = %hash, size, encrypted = encryption.is_some(), "Uploaded file");

    Ok(FileRef {
        hash,
        content_type: params.content_type.clone(),
        size: Some(size),
        encryption,
    })
}

/// Download a file blob, decrypting it when the ref carries a key.
pub async fn download_file(client: &FeedwireClient, file: &FileRef) -> FeedwireResult<Bytes> {
    let blob = client.store().download_blob(&file.hash).await?;
    match &file.encryption {
        None => Ok(blob),
        Some(encryption) => {
            let key = BASE64
                .decode(&encryption.key)
                .map_err(|e| FeedwireError::Crypto(format!("invalid base64 key: {}", e)))?;
            let plain = crypto::decrypt(&key, &encryption.params(), &blob)?;
            Ok(Bytes::from(plain))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Shared map
// ═══════════════════════════════════════════════════════════════════════

/// A path-keyed file map plus read access to the referenced blobs.
pub struct FileSystem {
    client: FeedwireClient,
    files: watch::Sender<FilesRecord>,
}

impl FileSystem {
    fn new(client: FeedwireClient, files: FilesRecord) -> Self {
        Self {
            client,
            files: watch::Sender::new(files),
        }
    }

    /// Snapshot of the current map.
    pub fn files(&self) -> FilesRecord {
        self.files.borrow().clone()
    }

    /// Observe map replacements.
    pub fn subscribe_files(&self) -> watch::Receiver<FilesRecord> {
        self.files.subscribe()
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.files.borrow().contains_key(path)
    }

    pub fn get_file(&self, path: &str) -> Option<FileRef> {
        self.files.borrow().get(path).cloned()
    }

    pub async fn download_file(&self, path: &str) -> FeedwireResult<Bytes> {
        let file = self.get_file(path).ok_or_else(|| FeedwireError::FileNotFound(path.to_string()))?;
        download_file(&self.client, &file).await
    }

    pub async fn download_text(&self, path: &str) -> FeedwireResult<String> {
        let bytes = self.download_file(path).await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| FeedwireError::InvalidInput(format!("{} is not UTF-8: {}", path, e)))
    }

    pub async fn download_json<T: DeserializeOwned>(&self, path: &str) -> FeedwireResult<T> {
        let bytes = self.download_file(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Sync states
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullSyncState {
    Pending,
    Pulling,
    Failed,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushSyncState {
    Idle,
    Pushing,
    Failed,
}

/// Dirty flag of a writer's map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSystemChanges {
    /// `true` once the current map has been published
    pub sync: bool,
    /// Milliseconds of the latest local mutation
    pub timestamp: i64,
}

/// Move to `Pulling` from any state `allowed` accepts and return the state
/// it replaced; otherwise return the current state untouched.
fn begin_pull(
    state: &watch::Sender<PullSyncState>,
    allowed: impl Fn(PullSyncState) -> bool,
) -> Result<PullSyncState, PullSyncState> {
    let mut previous = PullSyncState::Pending;
    let started = state.send_if_modified(|current| {
        previous = *current;
        if allowed(*current) {
            *current = PullSyncState::Pulling;
            true
        } else {
            false
        }
    });
    if started {
        Ok(previous)
    } else {
        Err(previous)
    }
}

/// Run `f` through the loop's gate when called from a sync loop.
fn gated<R>(gate: Option<&CancelGate>, f: impl FnOnce() -> R) -> Option<R> {
    match gate {
        Some(gate) => gate.deliver(f),
        None => Some(f()),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Reader
// ═══════════════════════════════════════════════════════════════════════

struct ReaderInner {
    fs: FileSystem,
    reader: FeedReader<FileSystemData>,
    pull_sync: watch::Sender<PullSyncState>,
    error: Mutex<Option<Arc<FeedwireError>>>,
    interval: Duration,
    pull_loop: Mutex<Option<Subscription>>,
    /// State before the pull the loop has in flight
    loop_pull: Mutex<Option<PullSyncState>>,
}

/// Read-only replica of another actor's file system.
#[derive(Clone)]
pub struct FileSystemReader {
    inner: Arc<ReaderInner>,
}

impl FileSystemReader {
    /// Replica of the file system published by `writer`, decrypted with
    /// `key_pair` when the feed is encrypted.
    pub fn new(client: FeedwireClient, writer: PublicKey, key_pair: Option<KeyPair>) -> FeedwireResult<Self> {
        let params = ReaderParams::new(writer, FILE_SYSTEM_NAME).with_key_pair(key_pair);
        let reader = client.feed_reader(&params)?;
        let interval = client.config().file_system_poll_interval;
        Ok(Self {
            inner: Arc::new(ReaderInner {
                fs: FileSystem::new(client, FilesRecord::new()),
                reader,
                pull_sync: watch::Sender::new(PullSyncState::Pending),
                error: Mutex::new(None),
                interval,
                pull_loop: Mutex::new(None),
                loop_pull: Mutex::new(None),
            }),
        })
    }

    pub fn file_system(&self) -> &FileSystem {
        &self.inner.fs
    }

    pub fn pull_sync(&self) -> PullSyncState {
        *self.inner.pull_sync.borrow()
    }

    pub fn subscribe_pull_sync(&self) -> watch::Receiver<PullSyncState> {
        self.inner.pull_sync.subscribe()
    }

    /// Error of the last failed pull, cleared by the next successful one.
    pub fn error(&self) -> Option<Arc<FeedwireError>> {
        self.inner.error.lock().clone()
    }

    /// Fetch the writer's map. A no-op while another pull is running.
    pub async fn pull(&self) {
        self.pull_gated(None).await
    }

    async fn pull_gated(&self, gate: Option<&CancelGate>) {
        let inner = &self.inner;
        let began = gated(gate, || match begin_pull(&inner.pull_sync, |state| state != PullSyncState::Pulling) {
            Ok(previous) => {
                if gate.is_some() {
                    *inner.loop_pull.lock() = Some(previous);
                }
                true
            }
            Err(_) => false,
        });
        if began != Some(true) {
            return;
        }

        let result = inner.reader.read().await;
        gated(gate, || {
            inner.loop_pull.lock().take();
            match result {
                Ok(data) => {
                    *inner.error.lock() = None;
                    if let Some(data) = data {
                        let replaced = inner.fs.files.send_if_modified(|files| {
                            if *files == data.files {
                                false
                            } else {
                                *files = data.files;
                                true
                            }
                        });
                        debug!(replaced, "Pulled file system");
                    }
                    inner.pull_sync.send_replace(PullSyncState::Done);
                }
                Err(err) => {
                    warn!(error = %err, "File system pull failed");
                    *inner.error.lock() = Some(Arc::new(err));
                    inner.pull_sync.send_replace(PullSyncState::Failed);
                }
            }
        });
    }

    /// Pull every `period` (default: the configured interval), replacing
    /// any running loop.
    pub fn start(&self, period: Option<Duration>) {
        let weak: Weak<ReaderInner> = Arc::downgrade(&self.inner);
        let sub = Subscription::interval(period.unwrap_or(self.inner.interval), move |gate| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    FileSystemReader { inner }.pull_gated(Some(&gate)).await;
                }
            }
        });
        let previous = self.inner.pull_loop.lock().replace(sub);
        self.end_loop(previous);
    }

    /// Stop the pull loop. A pull it had in flight is abandoned and the
    /// state it replaced is restored.
    pub fn stop(&self) {
        let previous = self.inner.pull_loop.lock().take();
        self.end_loop(previous);
    }

    fn end_loop(&self, sub: Option<Subscription>) {
        drop(sub);
        let abandoned = self.inner.loop_pull.lock().take();
        if let Some(state) = abandoned {
            debug!("Abandoned file system pull");
            self.inner.pull_sync.send_replace(state);
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.pull_loop.lock().is_some()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Writer
// ═══════════════════════════════════════════════════════════════════════

struct WriterInner {
    fs: FileSystem,
    key_pair: KeyPair,
    channel: RwLock<Channel>,
    entity_type: String,
    queue: PublishQueue,
    changes: watch::Sender<FileSystemChanges>,
    pull_sync: watch::Sender<PullSyncState>,
    push_sync: watch::Sender<PushSyncState>,
    error: Mutex<Option<Arc<FeedwireError>>>,
    interval: Duration,
    push_loop: Mutex<Option<Subscription>>,
    /// State before the push the loop has in flight
    loop_push: Mutex<Option<PushSyncState>>,
}

/// Owner of a file system map and its feed.
#[derive(Clone)]
pub struct FileSystemWriter {
    inner: Arc<WriterInner>,
}

impl FileSystemWriter {
    /// Writer for the file system feed of `key_pair`, encrypted for
    /// `reader` when given.
    ///
    /// Passing `files` restores a known map and skips [`initialize`].
    ///
    /// [`initialize`]: FileSystemWriter::initialize
    pub fn new(
        client: FeedwireClient,
        key_pair: KeyPair,
        reader: Option<PublicKey>,
        files: Option<FilesRecord>,
    ) -> Self {
        let channel = write_channel(&key_pair, Some(FILE_SYSTEM_NAME), reader.as_ref());
        let pull_state = if files.is_some() {
            PullSyncState::Done
        } else {
            PullSyncState::Pending
        };
        let interval = client.config().file_system_poll_interval;

        Self {
            inner: Arc::new(WriterInner {
                fs: FileSystem::new(client, files.unwrap_or_default()),
                key_pair,
                channel: RwLock::new(channel),
                entity_type: type_id(FILE_SYSTEM_NAME),
                queue: PublishQueue::new(),
                changes: watch::Sender::new(FileSystemChanges {
                    sync: true,
                    timestamp: 0,
                }),
                pull_sync: watch::Sender::new(pull_state),
                push_sync: watch::Sender::new(PushSyncState::Idle),
                error: Mutex::new(None),
                interval,
                push_loop: Mutex::new(None),
                loop_push: Mutex::new(None),
            }),
        }
    }

    pub fn file_system(&self) -> &FileSystem {
        &self.inner.fs
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.inner.key_pair
    }

    pub fn channel(&self) -> Channel {
        self.inner.channel.read().clone()
    }

    pub fn changes(&self) -> FileSystemChanges {
        *self.inner.changes.borrow()
    }

    pub fn subscribe_changes(&self) -> watch::Receiver<FileSystemChanges> {
        self.inner.changes.subscribe()
    }

    pub fn pull_sync(&self) -> PullSyncState {
        *self.inner.pull_sync.borrow()
    }

    pub fn push_sync(&self) -> PushSyncState {
        *self.inner.push_sync.borrow()
    }

    pub fn subscribe_push_sync(&self) -> watch::Receiver<PushSyncState> {
        self.inner.push_sync.subscribe()
    }

    /// Error of the last failed push or initialization.
    pub fn error(&self) -> Option<Arc<FeedwireError>> {
        self.inner.error.lock().clone()
    }

    /// Load the map last published on our own feed.
    ///
    /// Does nothing once the map is known; fails with
    /// `AlreadyInitializing` while another initialization is running.
    pub async fn initialize(&self) -> FeedwireResult<()> {
        let inner = &self.inner;
        let restartable = |state: PullSyncState| matches!(state, PullSyncState::Pending | PullSyncState::Failed);
        match begin_pull(&inner.pull_sync, restartable) {
            Ok(_) => {}
            Err(PullSyncState::Pulling) => return Err(FeedwireError::AlreadyInitializing),
            Err(_) => return Ok(()),
        }

        match self.read_own_feed().await {
            Ok(files) => {
                if let Some(files) = files {
                    inner.fs.files.send_replace(files);
                }
                inner.pull_sync.send_replace(PullSyncState::Done);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "File system initialization failed");
                let message = format!("file system initialization failed: {}", err);
                *inner.error.lock() = Some(Arc::new(err));
                inner.pull_sync.send_replace(PullSyncState::Failed);
                Err(FeedwireError::Store(message))
            }
        }
    }

    async fn read_own_feed(&self) -> FeedwireResult<Option<FilesRecord>> {
        let channel = self.channel();
        let client = &self.inner.fs.client;
        match client.store().get_feed_content(&channel.feed).await? {
            None => Ok(None),
            Some(bytes) => {
                let data: FileSystemData = client.decode(&self.inner.entity_type, &bytes, channel.key())?;
                Ok(Some(data.files))
            }
        }
    }

    /// Publish the whole map if it changed since the last push.
    ///
    /// Pushes run one at a time, and a push that finds the map already
    /// published by the one before it writes nothing. The map is marked in
    /// sync only when the publish succeeded and no mutation happened while
    /// it was in flight.
    pub async fn push(&self) {
        self.push_gated(None).await
    }

    async fn push_gated(&self, gate: Option<&CancelGate>) {
        if self.changes().sync {
            return;
        }
        self.inner.queue.run(self.publish(gate)).await
    }

    async fn publish(&self, gate: Option<&CancelGate>) {
        let inner = &self.inner;
        let began = gated(gate, || {
            let changes = self.changes();
            if changes.sync {
                return None;
            }
            let previous = inner.push_sync.send_replace(PushSyncState::Pushing);
            if gate.is_some() {
                *inner.loop_push.lock() = Some(previous);
            }
            Some(changes.timestamp)
        });
        let Some(timestamp) = began.flatten() else {
            return;
        };

        let files = inner.fs.files();
        let channel = self.channel();
        let client = &inner.fs.client;
        let count = files.len();
        let result = async {
            let payload = client.encode(&inner.entity_type, &FileSystemData { files }, channel.key())?;
            client
                .store()
                .set_feed_content(&channel.feed, payload, &inner.key_pair)
                .await
        }
        .await;

        gated(gate, || {
            inner.loop_push.lock().take();
            match result {
                Ok(receipt) => {
                    debug!(files = count, receipt = %receipt, "Pushed file system");
                    *inner.error.lock() = None;
                    inner.push_sync.send_replace(PushSyncState::Idle);
                    inner.changes.send_if_modified(|current| {
                        if current.timestamp == timestamp && !current.sync {
                            current.sync = true;
                            true
                        } else {
                            false
                        }
                    });
                }
                Err(err) => {
                    warn!(error = %err, "File system push failed");
                    *inner.error.lock() = Some(Arc::new(err));
                    inner.push_sync.send_replace(PushSyncState::Failed);
                }
            }
        });
    }

    fn mark_dirty(&self) {
        let now = chrono::Utc::now().timestamp_millis();
        self.inner.changes.send_modify(|changes| {
            changes.sync = false;
            changes.timestamp = now.max(changes.timestamp + 1);
        });
    }

    pub fn set_file(&self, path: &str, file: FileRef) -> FeedwireResult<()> {
        if !is_valid_path(path) {
            return Err(FeedwireError::InvalidPath(path.to_string()));
        }
        self.inner.fs.files.send_modify(|files| {
            files.insert(path.to_string(), file);
        });
        self.mark_dirty();
        Ok(())
    }

    /// Returns `false` when there is no file at `path`.
    pub fn remove_file(&self, path: &str) -> bool {
        let removed = self
            .inner
            .fs
            .files
            .send_if_modified(|files| files.remove(path).is_some());
        if removed {
            self.mark_dirty();
        }
        removed
    }

    /// Returns `Ok(false)` when there is no file at `from`.
    pub fn move_file(&self, from: &str, to: &str) -> FeedwireResult<bool> {
        if !is_valid_path(to) {
            return Err(FeedwireError::InvalidPath(to.to_string()));
        }
        let moved = self.inner.fs.files.send_if_modified(|files| match files.remove(from) {
            Some(file) => {
                files.insert(to.to_string(), file);
                true
            }
            None => false,
        });
        if moved {
            self.mark_dirty();
        }
        Ok(moved)
    }

    /// Upload `data` and add it at `path`.
    pub async fn upload_file(&self, path: &str, data: &[u8], params: &FileUploadParams) -> FeedwireResult<FileRef> {
        if !is_valid_path(path) {
            return Err(FeedwireError::InvalidPath(path.to_string()));
        }
        let file = upload_file(&self.inner.fs.client, data, params).await?;
        self.set_file(path, file.clone())?;
        Ok(file)
    }

    /// Re-key the feed for a new reader. The map is republished on the
    /// next push.
    pub fn set_reader(&self, reader: Option<PublicKey>) {
        let channel = write_channel(&self.inner.key_pair, Some(FILE_SYSTEM_NAME), reader.as_ref());
        *self.inner.channel.write() = channel;
        info!(encrypted = reader.is_some(), "File system reader changed");
        self.mark_dirty();
    }

    /// Push every `period` (default: the configured interval), replacing
    /// any running loop.
    pub fn start(&self, period: Option<Duration>) {
        let weak: Weak<WriterInner> = Arc::downgrade(&self.inner);
        let sub = Subscription::interval(period.unwrap_or(self.inner.interval), move |gate| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    FileSystemWriter { inner }.push_gated(Some(&gate)).await;
                }
            }
        });
        let previous = self.inner.push_loop.lock().replace(sub);
        self.end_loop(previous);
    }

    /// Stop the push loop. A push it had in flight is abandoned, the map
    /// stays dirty and the push state it replaced is restored.
    pub fn stop(&self) {
        let previous = self.inner.push_loop.lock().take();
        self.end_loop(previous);
    }

    fn end_loop(&self, sub: Option<Subscription>) {
        drop(sub);
        let abandoned = self.inner.loop_push.lock().take();
        if let Some(state) = abandoned {
            debug!("Abandoned file system push");
            self.inner.push_sync.send_replace(state);
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.push_loop.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Store};

    fn setup() -> (Arc<MemoryStore>, FeedwireClient) {
        let store = Arc::new(MemoryStore::new());
        let client = FeedwireClient::new(store.clone());
        (store, client)
    }

    #[tokio::test]
    async fn test_upload_plain_and_encrypted() {
        let (store, client) = setup();

        let plain = upload_file(&client, b"plain", &FileUploadParams::default()).await.unwrap();
        assert!(plain.encryption.is_none());
        assert_eq!(plain.size, Some(5));
        assert_eq!(store.download_blob(&plain.hash).await.unwrap().as_ref(), b"plain");

        let secret = upload_file(&client, b"Hello test", &FileUploadParams::encrypted()).await.unwrap();
        assert!(secret.encryption.is_some());
        assert_ne!(store.download_blob(&secret.hash).await.unwrap().as_ref(), b"Hello test");
        assert_eq!(download_file(&client, &secret).await.unwrap().as_ref(), b"Hello test");
    }

    #[tokio::test]
    async fn test_tampered_file_key_fails() {
        let (_, client) = setup();
        let mut file = upload_file(&client, b"data", &FileUploadParams::encrypted()).await.unwrap();
        if let Some(encryption) = file.encryption.as_mut() {
            encryption.key = BASE64.encode(crypto::generate_key());
        }
        let result = download_file(&client, &file).await;
        assert!(matches!(result, Err(FeedwireError::AuthenticationFailed(_))));
    }

    #[tokio::test]
    async fn test_local_mutations() {
        let (_, client) = setup();
        let writer = FileSystemWriter::new(client, KeyPair::generate(), None, None);
        assert!(writer.changes().sync);

        let file = writer
            .upload_file("/docs/a.txt", b"a", &FileUploadParams::default())
            .await
            .unwrap();
        assert!(!writer.changes().sync);
        assert_eq!(writer.file_system().get_file("/docs/a.txt"), Some(file));

        assert!(writer.move_file("/docs/a.txt", "/b.txt").unwrap());
        assert!(!writer.file_system().has_file("/docs/a.txt"));
        assert_eq!(writer.file_system().download_text("/b.txt").await.unwrap(), "a");

        assert!(!writer.move_file("/missing", "/c").unwrap());
        assert!(writer.remove_file("/b.txt"));
        assert!(!writer.remove_file("/b.txt"));
    }

    #[tokio::test]
    async fn test_invalid_paths_leave_state_untouched() {
        let (store, client) = setup();
        let writer = FileSystemWriter::new(client, KeyPair::generate(), None, None);

        for path in ["relative", "/trailing/", "//double", ""] {
            let result = writer.upload_file(path, b"x", &FileUploadParams::default()).await;
            assert!(matches!(result, Err(FeedwireError::InvalidPath(_))), "{path}");
        }
        assert_eq!(store.blob_count(), 0);
        assert!(writer.changes().sync);
        assert!(writer.file_system().files().is_empty());
    }

    #[tokio::test]
    async fn test_download_missing_path() {
        let (_, client) = setup();
        let writer = FileSystemWriter::new(client, KeyPair::generate(), None, None);
        let result = writer.file_system().download_file("/nope").await;
        assert!(matches!(result, Err(FeedwireError::FileNotFound(p)) if p == "/nope"));
    }

    #[tokio::test]
    async fn test_push_writes_once_per_change() {
        let (store, client) = setup();
        let writer = FileSystemWriter::new(client, KeyPair::generate(), None, None);

        writer.push().await;
        assert_eq!(store.feed_write_count(), 0);

        writer
            .upload_file("/a", b"a", &FileUploadParams::default())
            .await
            .unwrap();
        writer.push().await;
        writer.push().await;
        assert_eq!(store.feed_write_count(), 1);
        assert!(writer.changes().sync);
        assert_eq!(writer.push_sync(), PushSyncState::Idle);
    }

    #[tokio::test]
    async fn test_failed_push_stays_dirty() {
        let (store, client) = setup();
        let writer = FileSystemWriter::new(client, KeyPair::generate(), None, None);
        writer
            .upload_file("/a", b"a", &FileUploadParams::default())
            .await
            .unwrap();

        store.set_offline(true);
        writer.push().await;
        assert_eq!(writer.push_sync(), PushSyncState::Failed);
        assert!(writer.error().is_some());
        assert!(!writer.changes().sync);

        store.set_offline(false);
        writer.push().await;
        assert_eq!(writer.push_sync(), PushSyncState::Idle);
        assert!(writer.error().is_none());
        assert!(writer.changes().sync);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_during_push_stays_pending() {
        let (store, client) = setup();
        store.set_write_delay(Some(Duration::from_millis(100)));
        let writer = FileSystemWriter::new(client.clone(), KeyPair::generate(), None, None);
        let file = upload_file(&client, b"x", &FileUploadParams::default())
            .await
            .unwrap();
        writer.set_file("/one", file.clone()).unwrap();

        let pushing = writer.clone();
        let handle = tokio::spawn(async move { pushing.push().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        writer.set_file("/two", file).unwrap();
        handle.await.unwrap();

        assert!(!writer.changes().sync);
        writer.push().await;
        assert!(writer.changes().sync);
        assert_eq!(store.feed_write_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_pushes_write_once() {
        let (store, client) = setup();
        store.set_write_delay(Some(Duration::from_millis(100)));
        let writer = FileSystemWriter::new(client, KeyPair::generate(), None, None);
        writer
            .upload_file("/a", b"a", &FileUploadParams::default())
            .await
            .unwrap();

        let (first, second) = (writer.clone(), writer.clone());
        let a = tokio::spawn(async move { first.push().await });
        let b = tokio::spawn(async move { second.push().await });
        a.await.unwrap();
        b.await.unwrap();

        assert_eq!(store.feed_write_count(), 1);
        assert!(writer.changes().sync);
        assert_eq!(writer.push_sync(), PushSyncState::Idle);
    }

    #[tokio::test]
    async fn test_reader_pulls_encrypted_map() {
        let (_, client) = setup();
        let owner = KeyPair::generate();
        let reader_kp = KeyPair::generate();

        let writer = FileSystemWriter::new(client.clone(), owner.clone(), Some(reader_kp.public_key()), None);
        writer
            .upload_file("/hello.txt", b"Hello test", &FileUploadParams::encrypted())
            .await
            .unwrap();
        writer.push().await;

        let reader = FileSystemReader::new(client, owner.public_key(), Some(reader_kp)).unwrap();
        assert_eq!(reader.pull_sync(), PullSyncState::Pending);
        let mut files_rx = reader.file_system().subscribe_files();

        reader.pull().await;
        assert_eq!(reader.pull_sync(), PullSyncState::Done);
        assert!(files_rx.has_changed().unwrap());
        files_rx.borrow_and_update();
        assert_eq!(
            reader.file_system().download_text("/hello.txt").await.unwrap(),
            "Hello test"
        );

        // Same content again: no replacement notification
        reader.pull().await;
        assert!(!files_rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_reader_failure_is_retained() {
        let (store, client) = setup();
        let owner = KeyPair::generate();
        let reader = FileSystemReader::new(client, owner.public_key(), None).unwrap();

        store.set_offline(true);
        reader.pull().await;
        assert_eq!(reader.pull_sync(), PullSyncState::Failed);
        assert!(reader.error().is_some());

        store.set_offline(false);
        reader.pull().await;
        assert_eq!(reader.pull_sync(), PullSyncState::Done);
        assert!(reader.error().is_none());
    }

    #[tokio::test]
    async fn test_initialize_restores_own_map() {
        let (_, client) = setup();
        let owner = KeyPair::generate();
        let peer = KeyPair::generate().public_key();

        let first = FileSystemWriter::new(client.clone(), owner.clone(), Some(peer.clone()), None);
        first
            .upload_file("/kept", b"k", &FileUploadParams::default())
            .await
            .unwrap();
        first.push().await;

        let second = FileSystemWriter::new(client, owner, Some(peer), None);
        assert_eq!(second.pull_sync(), PullSyncState::Pending);
        second.initialize().await.unwrap();
        assert_eq!(second.pull_sync(), PullSyncState::Done);
        assert!(second.file_system().has_file("/kept"));
        // Second call is a no-op
        second.initialize().await.unwrap();
        assert!(second.changes().sync);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_while_pulling_is_noop() {
        let (store, client) = setup();
        store.set_read_delay(Some(Duration::from_millis(100)));
        let reader = FileSystemReader::new(client, KeyPair::generate().public_key(), None).unwrap();

        let pulling = reader.clone();
        let handle = tokio::spawn(async move { pulling.pull().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(reader.pull_sync(), PullSyncState::Pulling);
        assert_eq!(store.feed_read_count(), 1);

        reader.pull().await;
        assert_eq!(store.feed_read_count(), 1);
        assert_eq!(reader.pull_sync(), PullSyncState::Pulling);

        handle.await.unwrap();
        assert_eq!(reader.pull_sync(), PullSyncState::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_while_pulling() {
        let (store, client) = setup();
        store.set_read_delay(Some(Duration::from_millis(100)));
        let writer = FileSystemWriter::new(client, KeyPair::generate(), None, None);

        let initializing = writer.clone();
        let handle = tokio::spawn(async move { initializing.initialize().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(writer.pull_sync(), PullSyncState::Pulling);

        let result = writer.initialize().await;
        assert!(matches!(result, Err(FeedwireError::AlreadyInitializing)));
        assert_eq!(store.feed_read_count(), 1);

        handle.await.unwrap().unwrap();
        assert_eq!(writer.pull_sync(), PullSyncState::Done);
    }

    #[tokio::test]
    async fn test_set_reader_rekeys_and_marks_dirty() {
        let (store, client) = setup();
        let owner = KeyPair::generate();
        let reader_kp = KeyPair::generate();
        let writer = FileSystemWriter::new(client.clone(), owner.clone(), None, Some(FilesRecord::new()));
        assert!(!writer.channel().is_encrypted());

        writer.set_reader(Some(reader_kp.public_key()));
        assert!(writer.channel().is_encrypted());
        assert!(!writer.changes().sync);
        writer.push().await;
        assert_eq!(store.feed_write_count(), 1);

        let reader = FileSystemReader::new(client, owner.public_key(), Some(reader_kp)).unwrap();
        reader.pull().await;
        assert_eq!(reader.pull_sync(), PullSyncState::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_loop() {
        let (store, client) = setup();
        let writer = FileSystemWriter::new(client, KeyPair::generate(), None, None);
        writer.start(Some(Duration::from_secs(5)));
        assert!(writer.is_running());

        writer
            .upload_file("/a", b"a", &FileUploadParams::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.feed_write_count(), 1);

        writer.stop();
        writer.remove_file("/a");
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(store.feed_write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_push_in_flight() {
        let (store, client) = setup();
        store.set_write_delay(Some(Duration::from_millis(500)));
        let writer = FileSystemWriter::new(client, KeyPair::generate(), None, None);
        writer
            .upload_file("/a", b"a", &FileUploadParams::default())
            .await
            .unwrap();
        writer.start(Some(Duration::from_secs(1)));

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(writer.push_sync(), PushSyncState::Pushing);

        writer.stop();
        assert_eq!(writer.push_sync(), PushSyncState::Idle);
        let push_rx = writer.subscribe_push_sync();
        let changes_rx = writer.subscribe_changes();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!push_rx.has_changed().unwrap());
        assert!(!changes_rx.has_changed().unwrap());
        assert_eq!(store.feed_write_count(), 0);
        assert!(!writer.changes().sync);

        // Nothing is left holding the publish queue
        writer.push().await;
        assert!(writer.changes().sync);
        assert_eq!(store.feed_write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_pull_in_flight() {
        let (store, client) = setup();
        let owner = KeyPair::generate();
        let writer = FileSystemWriter::new(client.clone(), owner.clone(), None, None);
        writer
            .upload_file("/a", b"a", &FileUploadParams::default())
            .await
            .unwrap();
        writer.push().await;

        store.set_read_delay(Some(Duration::from_millis(500)));
        let reader = FileSystemReader::new(client, owner.public_key(), None).unwrap();
        reader.start(Some(Duration::from_secs(1)));

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(reader.pull_sync(), PullSyncState::Pulling);

        reader.stop();
        assert_eq!(reader.pull_sync(), PullSyncState::Pending);
        let sync_rx = reader.subscribe_pull_sync();
        let files_rx = reader.file_system().subscribe_files();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!sync_rx.has_changed().unwrap());
        assert!(!files_rx.has_changed().unwrap());
        assert!(reader.file_system().files().is_empty());

        reader.pull().await;
        assert_eq!(reader.pull_sync(), PullSyncState::Done);
        assert!(reader.file_system().has_file("/a"));
    }
}
