//! Inbox and outbox agents
//!
//! An [`InboxAgent`] follows one mailbox timeline and accumulates its
//! messages. [`InboxesAgent`] keeps a labelled set of inboxes in line with
//! the mailboxes a contact advertises, and [`OutboxesAgent`] holds the
//! mailboxes we write for that contact.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::FeedwireClient;
use crate::error::{FeedwireError, FeedwireResult};
use crate::identity::{KeyPair, PublicKey};
use crate::protocols::mailbox::{mailbox_reader, mailbox_writer, read_message, MailboxWriter};
use crate::subscription::Subscription;
use crate::timeline::Chapter;
use crate::types::{MailboxesRecord, MessageData};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxState {
    Stopped,
    Started,
    Error,
}

/// What an inbox is created from.
#[derive(Debug, Clone)]
pub struct InboxData {
    pub writer: PublicKey,
    pub interval: Option<Duration>,
    /// Messages already received, e.g. restored from a snapshot
    pub messages: Vec<MessageData>,
}

impl InboxData {
    pub fn new(writer: PublicKey) -> Self {
        Self {
            writer,
            interval: None,
            messages: Vec::new(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Inbox
// ═══════════════════════════════════════════════════════════════════════

struct InboxInner {
    client: FeedwireClient,
    key_pair: KeyPair,
    writer: RwLock<PublicKey>,
    interval: Duration,
    messages: RwLock<Vec<MessageData>>,
    last_seen: Mutex<Option<String>>,
    state: watch::Sender<InboxState>,
    error: Mutex<Option<Arc<FeedwireError>>>,
    new_message: broadcast::Sender<MessageData>,
    subscription: Mutex<Option<Subscription>>,
}

impl InboxInner {
    fn receive(&self, chapters: Vec<Chapter>) -> FeedwireResult<()> {
        for chapter in chapters {
            let message = read_message(&self.client, &chapter)?;
            *self.last_seen.lock() = Some(chapter.id);
            self.messages.write().push(message.clone());
            // No receivers is fine
            let _ = self.new_message.send(message);
        }
        Ok(())
    }

    fn fail(&self, error: Arc<FeedwireError>) {
        warn!(error = %error, "Inbox subscription failed");
        *self.error.lock() = Some(error);
        self.state.send_replace(InboxState::Error);
    }
}

/// Reader of one mailbox.
#[derive(Clone)]
pub struct InboxAgent {
    inner: Arc<InboxInner>,
}

impl InboxAgent {
    pub fn new(client: FeedwireClient, key_pair: KeyPair, data: InboxData) -> Self {
        let interval = data.interval.unwrap_or(client.config().inbox_poll_interval);
        let (new_message, _) = broadcast::channel(client.config().event_channel_capacity);
        Self {
            inner: Arc::new(InboxInner {
                client,
                key_pair,
                writer: RwLock::new(data.writer),
                interval,
                messages: RwLock::new(data.messages),
                last_seen: Mutex::new(None),
                state: watch::Sender::new(InboxState::Stopped),
                error: Mutex::new(None),
                new_message,
                subscription: Mutex::new(None),
            }),
        }
    }

    /// Follow the mailbox from the last chapter seen, replacing any
    /// running subscription.
    pub fn start(&self) {
        let inner = &self.inner;
        let writer = inner.writer.read().clone();
        let timeline = match mailbox_reader(&inner.client, &inner.key_pair, &writer) {
            Ok(timeline) => timeline,
            Err(err) => {
                inner.fail(Arc::new(err));
                return;
            }
        };
        let since = inner.last_seen.lock().clone();

        let previous = inner.subscription.lock().take();
        drop(previous);
        *inner.error.lock() = None;
        inner.state.send_replace(InboxState::Started);

        let on_next: Weak<InboxInner> = Arc::downgrade(inner);
        let on_error = on_next.clone();
        let sub = timeline.live(
            inner.interval,
            since,
            move |chapters| {
                if let Some(inner) = on_next.upgrade() {
                    if let Err(err) = inner.receive(chapters) {
                        inner.fail(Arc::new(err));
                        let sub = inner.subscription.lock().take();
                        drop(sub);
                    }
                }
            },
            move |err| {
                if let Some(inner) = on_error.upgrade() {
                    inner.fail(err);
                    let sub = inner.subscription.lock().take();
                    drop(sub);
                }
            },
        );

        // The first delivery may already have failed on another worker
        let failed = {
            let mut slot = inner.subscription.lock();
            if *inner.state.borrow() == InboxState::Error {
                Some(sub)
            } else {
                *slot = Some(sub);
                None
            }
        };
        drop(failed);
        debug!(writer = %writer.address(), "Inbox started");
    }

    pub fn stop(&self) {
        let previous = self.inner.subscription.lock().take();
        if previous.is_some() {
            drop(previous);
            self.inner.state.send_replace(InboxState::Stopped);
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.subscription.lock().is_some()
    }

    pub fn is_writer(&self, key: &PublicKey) -> bool {
        *self.inner.writer.read() == *key
    }

    pub fn writer(&self) -> PublicKey {
        self.inner.writer.read().clone()
    }

    /// Point the inbox at another mailbox. Received messages are kept;
    /// a running subscription restarts on the new mailbox.
    pub fn set_writer(&self, key: PublicKey) {
        if self.is_writer(&key) {
            return;
        }
        info!(writer = %key.address(), "Inbox writer changed");
        *self.inner.writer.write() = key;
        *self.inner.last_seen.lock() = None;
        if self.is_running() {
            self.start();
        }
    }

    /// Received messages in chapter order.
    pub fn messages(&self) -> Vec<MessageData> {
        self.inner.messages.read().clone()
    }

    pub fn subscribe_new_messages(&self) -> broadcast::Receiver<MessageData> {
        self.inner.new_message.subscribe()
    }

    pub fn state(&self) -> InboxState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<InboxState> {
        self.inner.state.subscribe()
    }

    pub fn error(&self) -> Option<Arc<FeedwireError>> {
        self.inner.error.lock().clone()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Inboxes
// ═══════════════════════════════════════════════════════════════════════

/// A message received by one of an [`InboxesAgent`]'s inboxes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxNewMessage {
    pub inbox: String,
    pub message: MessageData,
}

struct InboxEntry {
    agent: InboxAgent,
    forward: JoinHandle<()>,
}

impl Drop for InboxEntry {
    fn drop(&mut self) {
        self.forward.abort();
    }
}

/// Labelled inboxes, one per mailbox a contact writes to us.
///
/// Must be used within a tokio runtime.
pub struct InboxesAgent {
    client: FeedwireClient,
    key_pair: KeyPair,
    interval: Option<Duration>,
    auto_start: bool,
    inboxes: RwLock<BTreeMap<String, InboxEntry>>,
    new_message: broadcast::Sender<InboxNewMessage>,
}

impl InboxesAgent {
    pub fn new(
        client: FeedwireClient,
        key_pair: KeyPair,
        interval: Option<Duration>,
        auto_start: bool,
        inboxes: BTreeMap<String, InboxData>,
    ) -> Self {
        let (new_message, _) = broadcast::channel(client.config().event_channel_capacity);
        let agent = Self {
            client,
            key_pair,
            interval,
            auto_start,
            inboxes: RwLock::new(BTreeMap::new()),
            new_message,
        };
        for (label, data) in inboxes {
            agent.add_inbox(&label, data, None);
        }
        agent
    }

    pub fn has_inbox(&self, label: &str) -> bool {
        self.inboxes.read().contains_key(label)
    }

    pub fn get_inbox(&self, label: &str) -> Option<InboxAgent> {
        self.inboxes.read().get(label).map(|entry| entry.agent.clone())
    }

    pub fn labels(&self) -> Vec<String> {
        self.inboxes.read().keys().cloned().collect()
    }

    pub fn subscribe_new_messages(&self) -> broadcast::Receiver<InboxNewMessage> {
        self.new_message.subscribe()
    }

    /// Track `inbox` under `label`, replacing any inbox with that label.
    pub fn set_inbox(&self, label: &str, inbox: InboxAgent) {
        let forward = spawn_forwarder(label.to_string(), &inbox, self.new_message.clone());
        let previous = self.inboxes.write().insert(
            label.to_string(),
            InboxEntry {
                agent: inbox,
                forward,
            },
        );
        if let Some(previous) = previous {
            previous.agent.stop();
        }
    }

    /// Create an inbox for `label`, started when `start` (or the agent's
    /// auto-start default) says so.
    pub fn add_inbox(&self, label: &str, data: InboxData, start: Option<bool>) -> InboxAgent {
        let data = InboxData {
            interval: data.interval.or(self.interval),
            ..data
        };
        let inbox = InboxAgent::new(self.client.clone(), self.key_pair.clone(), data);
        self.set_inbox(label, inbox.clone());
        if start.unwrap_or(self.auto_start) {
            inbox.start();
        }
        debug!(label, "Inbox added");
        inbox
    }

    /// Stop and forget the inbox for `label`.
    pub fn remove_inbox(&self, label: &str) -> bool {
        let removed = self.inboxes.write().remove(label);
        match removed {
            Some(entry) => {
                entry.agent.stop();
                debug!(label, "Inbox removed");
                true
            }
            None => false,
        }
    }

    /// Bring the inbox set in line with `mailboxes` (label to writer key).
    ///
    /// New labels get an inbox, changed keys retarget the existing inbox
    /// and missing labels are removed. Applying the same map again changes
    /// nothing. Fails without touching any inbox if a key is invalid.
    pub fn change_inboxes(&self, mailboxes: &MailboxesRecord) -> FeedwireResult<()> {
        let target = mailboxes
            .iter()
            .map(|(label, key)| Ok((label.clone(), PublicKey::from_hex(key)?)))
            .collect::<FeedwireResult<BTreeMap<_, _>>>()?;

        for (label, key) in &target {
            match self.get_inbox(label) {
                None => {
                    self.add_inbox(label, InboxData::new(key.clone()), None);
                }
                Some(inbox) if !inbox.is_writer(key) => inbox.set_writer(key.clone()),
                Some(_) => {}
            }
        }

        for label in self.labels() {
            if !target.contains_key(&label) {
                self.remove_inbox(&label);
            }
        }
        Ok(())
    }

    pub fn start_all(&self) {
        for inbox in self.agents() {
            inbox.start();
        }
    }

    pub fn stop_all(&self) {
        for inbox in self.agents() {
            inbox.stop();
        }
    }

    fn agents(&self) -> Vec<InboxAgent> {
        self.inboxes.read().values().map(|entry| entry.agent.clone()).collect()
    }
}

fn spawn_forwarder(
    label: String,
    inbox: &InboxAgent,
    sink: broadcast::Sender<InboxNewMessage>,
) -> JoinHandle<()> {
    let mut rx = inbox.subscribe_new_messages();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    let _ = sink.send(InboxNewMessage {
                        inbox: label.clone(),
                        message,
                    });
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(inbox = %label, skipped = n, "Inbox forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Outboxes
// ═══════════════════════════════════════════════════════════════════════

/// Labelled mailboxes written for one reader.
pub struct OutboxesAgent {
    client: FeedwireClient,
    reader: PublicKey,
    outboxes: RwLock<BTreeMap<String, MailboxWriter>>,
}

impl OutboxesAgent {
    pub fn new(client: FeedwireClient, reader: PublicKey, outboxes: &BTreeMap<String, KeyPair>) -> Self {
        let agent = Self {
            client,
            reader,
            outboxes: RwLock::new(BTreeMap::new()),
        };
        for (label, key_pair) in outboxes {
            agent.set_outbox(label, key_pair);
        }
        agent
    }

    pub fn reader(&self) -> &PublicKey {
        &self.reader
    }

    pub fn has_outbox(&self, label: &str) -> bool {
        self.outboxes.read().contains_key(label)
    }

    pub fn get_outbox(&self, label: &str) -> Option<MailboxWriter> {
        self.outboxes.read().get(label).cloned()
    }

    pub fn labels(&self) -> Vec<String> {
        self.outboxes.read().keys().cloned().collect()
    }

    pub fn set_outbox(&self, label: &str, key_pair: &KeyPair) {
        let writer = mailbox_writer(&self.client, key_pair, &self.reader);
        self.outboxes.write().insert(label.to_string(), writer);
    }

    /// Create a mailbox with a fresh key pair and return that key pair.
    pub fn add_outbox(&self, label: &str) -> KeyPair {
        let key_pair = KeyPair::generate();
        self.set_outbox(label, &key_pair);
        key_pair
    }

    pub fn remove_outbox(&self, label: &str) -> bool {
        self.outboxes.write().remove(label).is_some()
    }

    /// Append `message` to the outbox `label`; returns the chapter id.
    pub async fn send_message(&self, label: &str, message: &MessageData) -> FeedwireResult<String> {
        let outbox = self.get_outbox(label).ok_or_else(|| FeedwireError::InvalidOutboxLabel(label.to_string()))?;
        let chapter = outbox.publish(message).await?;
        debug!(outbox = label, chapter = %chapter.id, "Message sent");
        Ok(chapter.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedwireConfig;
    use crate::store::MemoryStore;

    const TICK: Duration = Duration::from_secs(1);

    fn client() -> FeedwireClient {
        FeedwireClient::with_config(
            Arc::new(MemoryStore::new()),
            FeedwireConfig::with_poll_interval(TICK),
        )
    }

    #[tokio::test]
    async fn test_send_to_unknown_outbox() {
        let outboxes = OutboxesAgent::new(client(), KeyPair::generate().public_key(), &BTreeMap::new());
        let result = outboxes.send_message("nope", &MessageData::text("hi")).await;
        assert!(matches!(result, Err(FeedwireError::InvalidOutboxLabel(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbox_receives_in_order() {
        let client = client();
        let reader = KeyPair::generate();
        let outboxes = OutboxesAgent::new(client.clone(), reader.public_key(), &BTreeMap::new());
        let writer = outboxes.add_outbox("main");

        let inbox = InboxAgent::new(client, reader, InboxData::new(writer.public_key()));
        assert_eq!(inbox.state(), InboxState::Stopped);
        let mut rx = inbox.subscribe_new_messages();
        inbox.start();
        assert_eq!(inbox.state(), InboxState::Started);

        for body in ["one", "two", "three"] {
            outboxes.send_message("main", &MessageData::text(body)).await.unwrap();
        }
        tokio::time::sleep(TICK * 2).await;

        let bodies: Vec<_> = inbox.messages().into_iter().map(|m| m.body).collect();
        assert_eq!(bodies, vec!["one", "two", "three"]);
        assert_eq!(rx.recv().await.unwrap().body, "one");

        inbox.stop();
        assert_eq!(inbox.state(), InboxState::Stopped);
        outboxes.send_message("main", &MessageData::text("late")).await.unwrap();
        tokio::time::sleep(TICK * 3).await;
        assert_eq!(inbox.messages().len(), 3);

        // Restart resumes after the last seen chapter
        inbox.start();
        tokio::time::sleep(TICK * 2).await;
        assert_eq!(inbox.messages().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbox_error_state() {
        let client = client();
        let store = client.store().clone();
        let reader = KeyPair::generate();
        let writer = KeyPair::generate();

        // A chapter pointer that cannot be decoded with the mailbox key
        let channel = crate::channel::write_channel(
            &writer,
            Some(crate::namespace::MAILBOX_NAME),
            Some(&reader.public_key()),
        );
        let junk = crate::codec::encode_payload(&serde_json::json!({"id": "x"}), Default::default()).unwrap();
        store.set_feed_content(&channel.feed, junk, &writer).await.unwrap();

        let inbox = InboxAgent::new(client, reader, InboxData::new(writer.public_key()));
        inbox.start();
        tokio::time::sleep(TICK * 2).await;
        assert_eq!(inbox.state(), InboxState::Error);
        assert!(inbox.error().is_some());
        assert!(!inbox.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbox_poll_failure_ends_subscription() {
        let store = Arc::new(MemoryStore::new());
        let client = FeedwireClient::with_config(store.clone(), FeedwireConfig::with_poll_interval(TICK));
        let reader = KeyPair::generate();
        let writer = KeyPair::generate().public_key();

        let inbox = InboxAgent::new(client, reader, InboxData::new(writer));
        store.set_offline(true);
        inbox.start();
        tokio::time::sleep(TICK * 2).await;
        assert_eq!(inbox.state(), InboxState::Error);
        assert!(matches!(inbox.error().as_deref(), Some(FeedwireError::Store(_))));
        assert!(!inbox.is_running());

        // Retargeting a failed inbox does not resurrect it
        inbox.set_writer(KeyPair::generate().public_key());
        assert!(!inbox.is_running());
        assert_eq!(inbox.state(), InboxState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_inboxes_reconciles() {
        let client = client();
        let key_a = KeyPair::generate().public_key();
        let key_b = KeyPair::generate().public_key();
        let key_c = KeyPair::generate().public_key();
        let inboxes = InboxesAgent::new(client, KeyPair::generate(), None, true, BTreeMap::new());

        let first: MailboxesRecord = [("a".to_string(), key_a.to_hex())].into();
        inboxes.change_inboxes(&first).unwrap();
        let inbox_a = inboxes.get_inbox("a").unwrap();
        assert!(inbox_a.is_running());

        let second: MailboxesRecord = [("b".to_string(), key_b.to_hex())].into();
        inboxes.change_inboxes(&second).unwrap();
        assert_eq!(inboxes.labels(), vec!["b".to_string()]);
        assert!(inboxes.get_inbox("b").unwrap().is_writer(&key_b));
        assert!(!inbox_a.is_running());
        assert_eq!(inbox_a.state(), InboxState::Stopped);

        // Same map again: the existing inbox is kept as is
        let inbox_b = inboxes.get_inbox("b").unwrap();
        inboxes.change_inboxes(&second).unwrap();
        assert!(Arc::ptr_eq(&inbox_b.inner, &inboxes.get_inbox("b").unwrap().inner));

        // Changed key retargets in place
        let third: MailboxesRecord = [("b".to_string(), key_c.to_hex())].into();
        inboxes.change_inboxes(&third).unwrap();
        assert!(Arc::ptr_eq(&inbox_b.inner, &inboxes.get_inbox("b").unwrap().inner));
        assert!(inbox_b.is_writer(&key_c));
        assert!(inbox_b.is_running());
    }

    #[tokio::test]
    async fn test_change_inboxes_rejects_bad_key() {
        let inboxes = InboxesAgent::new(client(), KeyPair::generate(), None, false, BTreeMap::new());
        let bad: MailboxesRecord = [("a".to_string(), "00".to_string())].into();
        assert!(inboxes.change_inboxes(&bad).is_err());
        assert!(inboxes.labels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_messages_are_labelled() {
        let client = client();
        let reader = KeyPair::generate();
        let outboxes = OutboxesAgent::new(client.clone(), reader.public_key(), &BTreeMap::new());
        let writer = outboxes.add_outbox("news");

        let inboxes = InboxesAgent::new(client, reader, None, true, BTreeMap::new());
        let mut rx = inboxes.subscribe_new_messages();
        inboxes.add_inbox("news", InboxData::new(writer.public_key()), None);

        outboxes.send_message("news", &MessageData::text("hello")).await.unwrap();
        tokio::time::sleep(TICK * 2).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.inbox, "news");
        assert_eq!(received.message.body, "hello");
    }
}
