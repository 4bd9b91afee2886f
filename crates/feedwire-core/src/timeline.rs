//! Append-only chapter histories
//!
//! A timeline is a hash-linked list of chapters stored as blobs, with the
//! owner's feed pointing at the newest one:
//!
//! ```text
//! feed(user, topic) ──► chapter N ──previous──► chapter N-1 ──► … ──► chapter 1
//! ```
//!
//! Each chapter blob is a codec frame (encrypted when the channel has a
//! key) of `{content, previous?, author, timestamp}`; its id is the blob
//! hash. Chapters are immutable once appended, only the feed pointer
//! advances. Readers catch up by walking `previous` links back to the last
//! chapter they have seen.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::channel::Channel;
use crate::client::FeedwireClient;
use crate::codec::{self, EncodeOptions};
use crate::entity::{validate_entity, PublishQueue};
use crate::error::{FeedwireError, FeedwireResult};
use crate::identity::KeyPair;
use crate::subscription::{Poller, Subscription};

/// One entry of a timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter<T = Value> {
    /// Hash of the stored chapter blob
    pub id: String,
    pub content: T,
    pub previous: Option<String>,
    /// Address of the writer
    pub author: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

#[derive(Serialize, Deserialize)]
struct ChapterRecord {
    content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    previous: Option<String>,
    author: String,
    timestamp: i64,
}

#[derive(Serialize, Deserialize)]
struct LatestPointer {
    id: String,
}

/// A chapter history bound to one channel.
#[derive(Clone)]
pub struct Timeline {
    client: FeedwireClient,
    channel: Channel,
    signer: Option<KeyPair>,
    queue: PublishQueue,
}

impl Timeline {
    pub(crate) fn for_writer(client: FeedwireClient, channel: Channel, signer: KeyPair) -> Self {
        Self {
            client,
            channel,
            signer: Some(signer),
            queue: PublishQueue::new(),
        }
    }

    pub(crate) fn for_reader(client: FeedwireClient, channel: Channel) -> Self {
        Self {
            client,
            channel,
            signer: None,
            queue: PublishQueue::new(),
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Append a chapter after the current latest one.
    ///
    /// Appends through one timeline (and its clones) are serialized, so
    /// two concurrent calls cannot both link to the same `previous`.
    pub async fn add_chapter(&self, content: Value) -> FeedwireResult<Chapter> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| FeedwireError::Store("timeline is read-only".to_string()))?;

        self.queue
            .run(async {
                let previous = self.get_latest_chapter_id().await?;
                let record = ChapterRecord {
                    content,
                    previous,
                    author: signer.address(),
                    timestamp: chrono::Utc::now().timestamp_millis(),
                };
                let key = self.channel.key();
                let blob = codec::encode_payload(&record, EncodeOptions::with_key(key))?;
                let id = self.client.store().upload_blob(blob).await?;

                let pointer = codec::encode_payload(
                    &LatestPointer { id: id.clone() },
                    EncodeOptions::with_key(key),
                )?;
                self.client
                    .store()
                    .set_feed_content(&self.channel.feed, pointer, signer)
                    .await?;

                debug!(id = %id, author = %record.author, "Appended chapter");
                Ok(Chapter {
                    id,
                    content: record.content,
                    previous: record.previous,
                    author: record.author,
                    timestamp: record.timestamp,
                })
            })
            .await
    }

    pub async fn get_chapter(&self, id: &str) -> FeedwireResult<Chapter> {
        let blob = self.client.store().download_blob(id).await?;
        let record: ChapterRecord =
            codec::decode_json(&blob, self.client.decode_options(self.channel.key()))?;
        Ok(Chapter {
            id: id.to_string(),
            content: record.content,
            previous: record.previous,
            author: record.author,
            timestamp: record.timestamp,
        })
    }

    pub async fn get_latest_chapter_id(&self) -> FeedwireResult<Option<String>> {
        match self.client.store().get_feed_content(&self.channel.feed).await? {
            None => Ok(None),
            Some(bytes) => {
                let pointer: LatestPointer =
                    codec::decode_json(&bytes, self.client.decode_options(self.channel.key()))?;
                Ok(Some(pointer.id))
            }
        }
    }

    pub async fn get_latest_chapter(&self) -> FeedwireResult<Option<Chapter>> {
        match self.get_latest_chapter_id().await? {
            None => Ok(None),
            Some(id) => self.get_chapter(&id).await.map(Some),
        }
    }

    /// Chapters from `latest` back to (excluding) `since`, oldest first.
    pub async fn load_chapters(&self, latest: &str, since: Option<&str>) -> FeedwireResult<Vec<Chapter>> {
        let mut chapters = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(latest.to_string());

        while let Some(id) = next {
            if Some(id.as_str()) == since {
                break;
            }
            if !visited.insert(id.clone()) {
                return Err(FeedwireError::InvalidInput(format!(
                    "chapter {} links back to itself",
                    id
                )));
            }
            let chapter = self.get_chapter(&id).await?;
            next = chapter.previous.clone();
            chapters.push(chapter);
        }

        chapters.reverse();
        Ok(chapters)
    }

    /// Deliver the latest chapter each time the pointer moves.
    pub fn poll_latest_chapter<N, E>(&self, interval: Duration, on_next: N, on_error: E) -> Subscription
    where
        N: FnMut(Chapter) + Send + 'static,
        E: FnMut(Arc<FeedwireError>) + Send + 'static,
    {
        let poller = LatestChapterPoller {
            timeline: self.clone(),
            last_id: None,
        };
        Subscription::poll(interval, poller, on_next, on_error)
    }

    /// Deliver batches of chapters appended after `since`, in append order.
    ///
    /// With `since = None` the first batch is the whole history.
    pub fn live<N, E>(&self, interval: Duration, since: Option<String>, on_next: N, on_error: E) -> Subscription
    where
        N: FnMut(Vec<Chapter>) + Send + 'static,
        E: FnMut(Arc<FeedwireError>) + Send + 'static,
    {
        let poller = LivePoller {
            timeline: self.clone(),
            last_seen: since,
        };
        Subscription::poll(interval, poller, on_next, on_error)
    }
}

struct LatestChapterPoller {
    timeline: Timeline,
    last_id: Option<String>,
}

#[async_trait]
impl Poller for LatestChapterPoller {
    type Item = Chapter;

    async fn poll(&mut self) -> FeedwireResult<Option<Chapter>> {
        match self.timeline.get_latest_chapter_id().await? {
            Some(id) if self.last_id.as_ref() != Some(&id) => {
                let chapter = self.timeline.get_chapter(&id).await?;
                self.last_id = Some(id);
                Ok(Some(chapter))
            }
            _ => Ok(None),
        }
    }
}

struct LivePoller {
    timeline: Timeline,
    last_seen: Option<String>,
}

#[async_trait]
impl Poller for LivePoller {
    type Item = Vec<Chapter>;

    async fn poll(&mut self) -> FeedwireResult<Option<Vec<Chapter>>> {
        let latest = match self.timeline.get_latest_chapter_id().await? {
            Some(id) if self.last_seen.as_ref() != Some(&id) => id,
            _ => return Ok(None),
        };
        let chapters = self
            .timeline
            .load_chapters(&latest, self.last_seen.as_deref())
            .await?;
        self.last_seen = Some(latest);
        Ok((!chapters.is_empty()).then_some(chapters))
    }
}

/// Validates each entry as an entity before appending it to a timeline.
pub struct TimelinePublisher<T> {
    timeline: Timeline,
    entity_type: String,
    _data: PhantomData<fn(&T)>,
}

impl<T> Clone for TimelinePublisher<T> {
    fn clone(&self) -> Self {
        Self {
            timeline: self.timeline.clone(),
            entity_type: self.entity_type.clone(),
            _data: PhantomData,
        }
    }
}

impl<T: Serialize> TimelinePublisher<T> {
    pub(crate) fn new(timeline: Timeline, entity_type: String) -> Self {
        Self {
            timeline,
            entity_type,
            _data: PhantomData,
        }
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Validate `data`, append it, and return the new chapter.
    pub async fn publish(&self, data: &T) -> FeedwireResult<Chapter> {
        let payload = validate_entity(self.timeline.client.schemas(), &self.entity_type, data)?;
        self.timeline.add_chapter(serde_json::to_value(payload)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{ReaderParams, WriterParams};
    use crate::store::MemoryStore;
    use parking_lot::Mutex;
    use serde_json::json;

    fn pair() -> (FeedwireClient, Timeline, Timeline) {
        let client = FeedwireClient::new(Arc::new(MemoryStore::new()));
        let writer = KeyPair::generate();
        let reader = KeyPair::generate();
        let write = client.write_timeline(
            &WriterParams::new(writer.clone(), "test.timeline").with_reader(Some(reader.public_key())),
        );
        let read = client
            .read_timeline(
                &ReaderParams::new(writer.public_key(), "test.timeline").with_key_pair(Some(reader)),
            )
            .unwrap();
        (client, write, read)
    }

    #[tokio::test]
    async fn test_chapters_link_back() {
        let (_, write, read) = pair();
        assert!(read.get_latest_chapter().await.unwrap().is_none());

        let first = write.add_chapter(json!("one")).await.unwrap();
        let second = write.add_chapter(json!("two")).await.unwrap();
        assert_eq!(first.previous, None);
        assert_eq!(second.previous.as_deref(), Some(first.id.as_str()));

        let latest = read.get_latest_chapter().await.unwrap().unwrap();
        assert_eq!(latest, second);

        let all = read.load_chapters(&second.id, None).await.unwrap();
        assert_eq!(
            all.iter().map(|c| c.content.clone()).collect::<Vec<_>>(),
            vec![json!("one"), json!("two")]
        );
        let since = read.load_chapters(&second.id, Some(&first.id)).await.unwrap();
        assert_eq!(since.len(), 1);
    }

    #[tokio::test]
    async fn test_reader_cannot_append() {
        let (_, _, read) = pair();
        assert!(read.add_chapter(json!(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_chapter_blobs_are_encrypted() {
        let (client, write, _) = pair();
        let chapter = write.add_chapter(json!({"secret": "payload"})).await.unwrap();
        let blob = client.store().download_blob(&chapter.id).await.unwrap();
        let text = String::from_utf8_lossy(&blob);
        assert!(!text.contains("payload"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_delivers_batches_in_order() {
        let (_, write, read) = pair();
        write.add_chapter(json!(1)).await.unwrap();
        write.add_chapter(json!(2)).await.unwrap();

        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = batches.clone();
        let sub = read.live(
            Duration::from_secs(1),
            None,
            move |chapters| {
                sink.lock()
                    .push(chapters.into_iter().map(|c| c.content).collect::<Vec<_>>())
            },
            |_| {},
        );

        tokio::time::sleep(Duration::from_millis(500)).await;
        write.add_chapter(json!(3)).await.unwrap();
        write.add_chapter(json!(4)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        sub.cancel();

        assert_eq!(
            *batches.lock(),
            vec![vec![json!(1), json!(2)], vec![json!(3), json!(4)]]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_since_skips_seen() {
        let (_, write, read) = pair();
        let first = write.add_chapter(json!("old")).await.unwrap();
        write.add_chapter(json!("new")).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = read.live(
            Duration::from_secs(1),
            Some(first.id),
            move |chapters| sink.lock().extend(chapters.into_iter().map(|c| c.content)),
            |_| {},
        );
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(*seen.lock(), vec![json!("new")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_latest_chapter() {
        let (_, write, read) = pair();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = read.poll_latest_chapter(
            Duration::from_secs(1),
            move |chapter| sink.lock().push(chapter.content),
            |_| {},
        );

        write.add_chapter(json!("a")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        write.add_chapter(json!("b")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(*seen.lock(), vec![json!("a"), json!("b")]);
    }
}
