//! Contact handshake and relationship agent
//!
//! Each side of a relationship creates a fresh *contact key pair* and
//! announces its public key in a first-contact message encrypted for the
//! peer's actor key. The agent waits for the peer's announcement:
//!
//! ```text
//!  DISCONNECTED ── first contact received ──► CONNECTED
//!  (polls first-contact feed)                 (polls contact feed)
//! ```
//!
//! Once connected, both sides exchange [`ContactData`] over the channel
//! keyed by the two contact key pairs. It carries the profile, the file
//! system key and the mailbox keys; the agent keeps its inboxes and the
//! inbound file system in line with what the peer advertises.
//!
//! Subscription errors are published on [`ContactAgent::subscribe_errors`]
//! and end the failing subscription; restarting is up to the caller.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::agent::messaging::{InboxData, InboxesAgent, OutboxesAgent};
use crate::client::FeedwireClient;
use crate::entity::PublishQueue;
use crate::error::{FeedwireError, FeedwireResult};
use crate::identity::{KeyPair, PublicKey};
use crate::protocols::contact::{
    contact_subscriber, first_contact_subscriber, write_contact, write_first_contact, ContactParams,
    FirstContactParams,
};
use crate::protocols::file_system::{FileSystemReader, FileSystemWriter};
use crate::subscription::Subscription;
use crate::types::{ActorData, ContactData, FilesRecord, FirstContactData, MailboxesRecord, ProfileData};

/// Own actor key pair and the peer's actor key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirstContactAgentData {
    pub key_pair: KeyPair,
    pub actor_key: PublicKey,
}

impl FirstContactAgentData {
    fn params(&self) -> FirstContactParams {
        FirstContactParams {
            key_pair: self.key_pair.clone(),
            actor_key: self.actor_key.clone(),
        }
    }
}

/// What we know about the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadContactAgentData {
    pub actor_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_data: Option<ActorData>,
    /// Known once the handshake completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_public_key: Option<PublicKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_data: Option<ContactData>,
    /// Where to wait for the peer's first contact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_contact: Option<FirstContactAgentData>,
}

/// What we publish for the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteContactAgentData {
    /// Contact key pair
    pub key_pair: KeyPair,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_system_key_pair: Option<KeyPair>,
    /// Where to announce our contact key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_contact: Option<FirstContactAgentData>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mailboxes: BTreeMap<String, KeyPair>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileData>,
}

impl WriteContactAgentData {
    pub fn new(key_pair: KeyPair) -> Self {
        Self {
            key_pair,
            file_system_key_pair: None,
            first_contact: None,
            mailboxes: BTreeMap::new(),
            profile: None,
        }
    }

    fn contact_data(&self) -> ContactData {
        let mailboxes: MailboxesRecord = self
            .mailboxes
            .iter()
            .map(|(label, key_pair)| (label.clone(), key_pair.public_key().to_hex()))
            .collect();
        ContactData {
            file_system_key: self
                .file_system_key_pair
                .as_ref()
                .map(|key_pair| key_pair.public_key().to_hex()),
            mailboxes: (!mailboxes.is_empty()).then_some(mailboxes),
            profile: self.profile.clone(),
        }
    }
}

/// Persistable state of a [`ContactAgent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactAgentData {
    pub read: ReadContactAgentData,
    pub write: WriteContactAgentData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactState {
    /// Waiting for the peer's first contact
    Disconnected,
    /// Exchanging contact data
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactErrorKind {
    FirstContact,
    Contact,
}

#[derive(Debug, Clone)]
pub struct ContactAgentError {
    pub kind: ContactErrorKind,
    pub error: Arc<FeedwireError>,
}

struct ContactInner {
    client: FeedwireClient,
    interval: Duration,
    auto_start: bool,
    data: RwLock<ContactAgentData>,
    state: watch::Sender<ContactState>,
    contact_data: watch::Sender<Option<ContactData>>,
    errors: broadcast::Sender<ContactAgentError>,
    first_contact_sub: Mutex<Option<Subscription>>,
    contact_sub: Mutex<Option<Subscription>>,
    inboxes: InboxesAgent,
    outboxes: RwLock<Option<Arc<OutboxesAgent>>>,
    inbound_fs: Mutex<Option<FileSystemReader>>,
    outbound_fs: RwLock<Option<FileSystemWriter>>,
    contact_queue: PublishQueue,
}

impl ContactInner {
    fn report(&self, kind: ContactErrorKind, error: Arc<FeedwireError>) {
        warn!(?kind, error = %error, "Contact subscription failed");
        let _ = self.errors.send(ContactAgentError { kind, error });
    }

    fn contact_public_key(&self) -> Option<PublicKey> {
        self.data.read().read.contact_public_key.clone()
    }

    fn create_inbound_file_system(&self) -> Option<FileSystemReader> {
        let (writer, key_pair) = {
            let data = self.data.read();
            let key = data.read.contact_data.as_ref()?.file_system_key.clone()?;
            (key, data.write.key_pair.clone())
        };
        let writer = match PublicKey::from_hex(&writer) {
            Ok(writer) => writer,
            Err(err) => {
                warn!(error = %err, "Ignoring invalid file system key");
                return None;
            }
        };
        FileSystemReader::new(self.client.clone(), writer, Some(key_pair)).ok()
    }
}

/// One relationship with another actor.
///
/// Must be used within a tokio runtime.
#[derive(Clone)]
pub struct ContactAgent {
    inner: Arc<ContactInner>,
}

impl std::fmt::Debug for ContactAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContactAgent")
            .field("actor_address", &self.actor_address())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ContactAgent {
    /// Restore or create an agent. It starts connected when
    /// `data.read.contact_public_key` is known.
    pub fn new(client: FeedwireClient, data: ContactAgentData, auto_start: bool) -> FeedwireResult<Self> {
        let interval = client.config().contact_poll_interval;
        let (errors, _) = broadcast::channel(client.config().event_channel_capacity);

        let mut inboxes = BTreeMap::new();
        if let Some(mailboxes) = data.read.contact_data.as_ref().and_then(|c| c.mailboxes.as_ref()) {
            for (label, key) in mailboxes {
                inboxes.insert(label.clone(), InboxData::new(PublicKey::from_hex(key)?));
            }
        }
        let inboxes = InboxesAgent::new(client.clone(), data.write.key_pair.clone(), None, auto_start, inboxes);

        let (outboxes, outbound_fs) = match &data.read.contact_public_key {
            Some(contact_key) => {
                let outboxes = OutboxesAgent::new(client.clone(), contact_key.clone(), &data.write.mailboxes);
                let outbound_fs = data.write.file_system_key_pair.as_ref().map(|key_pair| {
                    FileSystemWriter::new(client.clone(), key_pair.clone(), Some(contact_key.clone()), None)
                });
                (Some(Arc::new(outboxes)), outbound_fs)
            }
            None => (None, None),
        };

        let agent = Self {
            inner: Arc::new(ContactInner {
                client,
                interval,
                auto_start,
                state: watch::Sender::new(if data.read.contact_public_key.is_some() {
                    ContactState::Connected
                } else {
                    ContactState::Disconnected
                }),
                contact_data: watch::Sender::new(data.read.contact_data.clone()),
                data: RwLock::new(data),
                errors,
                first_contact_sub: Mutex::new(None),
                contact_sub: Mutex::new(None),
                inboxes,
                outboxes: RwLock::new(outboxes),
                inbound_fs: Mutex::new(None),
                outbound_fs: RwLock::new(outbound_fs),
                contact_queue: PublishQueue::new(),
            }),
        };
        let inbound = agent.inner.create_inbound_file_system();
        *agent.inner.inbound_fs.lock() = inbound;

        if auto_start {
            agent.start_all();
        }
        Ok(agent)
    }

    pub fn actor_address(&self) -> String {
        self.inner.data.read().read.actor_address.clone()
    }

    pub fn contact_public_key(&self) -> Option<PublicKey> {
        self.inner.contact_public_key()
    }

    pub fn state(&self) -> ContactState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ContactState::Connected
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ContactState> {
        self.inner.state.subscribe()
    }

    /// Latest contact data received from the peer.
    pub fn contact_data(&self) -> Option<ContactData> {
        self.inner.contact_data.borrow().clone()
    }

    pub fn subscribe_contact_data(&self) -> watch::Receiver<Option<ContactData>> {
        self.inner.contact_data.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<ContactAgentError> {
        self.inner.errors.subscribe()
    }

    pub fn inboxes(&self) -> &InboxesAgent {
        &self.inner.inboxes
    }

    pub fn outboxes(&self) -> Option<Arc<OutboxesAgent>> {
        self.inner.outboxes.read().clone()
    }

    /// Copy of the agent's persistable state.
    pub fn snapshot(&self) -> ContactAgentData {
        self.inner.data.read().clone()
    }

    /// Announce our contact key to the peer and load our outbound file
    /// system, concurrently. Both must succeed.
    pub async fn initialize(&self) -> FeedwireResult<()> {
        let (first_contact, contact_key) = {
            let data = self.inner.data.read();
            (data.write.first_contact.clone(), data.write.key_pair.public_key())
        };
        let outbound_fs = self.outbound_file_system();
        let client = &self.inner.client;

        let announce = async {
            if let Some(first_contact) = first_contact {
                let data = FirstContactData {
                    actor_address: first_contact.key_pair.address(),
                    contact_public_key: contact_key.to_hex(),
                };
                write_first_contact(client, &first_contact.params(), &data).await?;
                debug!(peer = %first_contact.actor_key.address(), "First contact written");
            }
            Ok::<_, FeedwireError>(())
        };
        let load_fs = async {
            match outbound_fs {
                Some(fs) => fs.initialize().await,
                None => Ok(()),
            }
        };

        futures::try_join!(announce, load_fs)?;
        Ok(())
    }

    /// Subscribe to the contact feed when connected, else to the peer's
    /// first contact.
    pub fn start(&self) {
        if let Some(contact_key) = self.contact_public_key() {
            self.create_contact_subscription(contact_key);
            return;
        }
        let first_contact = self.inner.data.read().read.first_contact.clone();
        if let Some(first_contact) = first_contact {
            self.create_first_contact_subscription(first_contact);
        }
    }

    pub fn stop(&self) {
        // First contact first: its delivery may open the contact subscription
        let first = self.inner.first_contact_sub.lock().take();
        drop(first);
        let contact = self.inner.contact_sub.lock().take();
        drop(contact);
    }

    /// Start the handshake or contact subscription, the inboxes and the
    /// file system loops.
    pub fn start_all(&self) {
        self.start();
        self.inner.inboxes.start_all();
        if let Some(fs) = self.inbound_file_system() {
            fs.start(Some(self.inner.interval));
        }
        if let Some(fs) = self.outbound_file_system() {
            fs.start(None);
        }
    }

    pub fn stop_all(&self) {
        self.stop();
        self.inner.inboxes.stop_all();
        let inbound = self.inner.inbound_fs.lock().clone();
        if let Some(fs) = inbound {
            fs.stop();
        }
        if let Some(fs) = self.outbound_file_system() {
            fs.stop();
        }
    }

    pub fn create_first_contact_subscription(&self, first_contact: FirstContactAgentData) {
        let on_next: Weak<ContactInner> = Arc::downgrade(&self.inner);
        let on_error = on_next.clone();
        let result = first_contact_subscriber(
            &self.inner.client,
            &first_contact.params(),
            self.inner.interval,
            move |data: FirstContactData| {
                if let Some(inner) = on_next.upgrade() {
                    ContactAgent { inner }.handle_first_contact(data);
                }
            },
            move |err| {
                if let Some(inner) = on_error.upgrade() {
                    inner.report(ContactErrorKind::FirstContact, err);
                }
            },
        );

        match result {
            Ok(sub) => {
                let previous = self.inner.first_contact_sub.lock().replace(sub);
                drop(previous);
            }
            Err(err) => self.inner.report(ContactErrorKind::FirstContact, Arc::new(err)),
        }
    }

    fn handle_first_contact(&self, data: FirstContactData) {
        let contact_key = match PublicKey::from_hex(&data.contact_public_key) {
            Ok(key) => key,
            Err(err) => {
                self.inner.report(ContactErrorKind::FirstContact, Arc::new(err));
                return;
            }
        };

        let rekeyed = {
            let mut state = self.inner.data.write();
            let previous = state.read.contact_public_key.replace(contact_key.clone());
            previous.is_some_and(|key| key != contact_key)
        };
        if rekeyed {
            if let Some(fs) = self.outbound_file_system() {
                fs.set_reader(Some(contact_key.clone()));
            }
        }

        self.create_contact_subscription(contact_key.clone());
        // Single use: this runs inside the subscription's own delivery
        let first = self.inner.first_contact_sub.lock().take();
        drop(first);

        info!(
            peer = %self.actor_address(),
            contact = %contact_key.address(),
            "Contact connected"
        );
        self.inner.state.send_replace(ContactState::Connected);
    }

    pub fn create_contact_subscription(&self, contact_key: PublicKey) {
        let key_pair = self.inner.data.read().write.key_pair.clone();
        let params = ContactParams {
            key_pair,
            contact_key,
        };
        let on_next: Weak<ContactInner> = Arc::downgrade(&self.inner);
        let on_error = on_next.clone();
        let result = contact_subscriber(
            &self.inner.client,
            &params,
            self.inner.interval,
            move |data: ContactData| {
                if let Some(inner) = on_next.upgrade() {
                    ContactAgent { inner }.handle_contact_data(data);
                }
            },
            move |err| {
                if let Some(inner) = on_error.upgrade() {
                    inner.report(ContactErrorKind::Contact, err);
                }
            },
        );

        match result {
            Ok(sub) => {
                let previous = self.inner.contact_sub.lock().replace(sub);
                drop(previous);
            }
            Err(err) => self.inner.report(ContactErrorKind::Contact, Arc::new(err)),
        }
    }

    fn handle_contact_data(&self, data: ContactData) {
        let empty = MailboxesRecord::new();
        if let Err(err) = self
            .inner
            .inboxes
            .change_inboxes(data.mailboxes.as_ref().unwrap_or(&empty))
        {
            self.inner.report(ContactErrorKind::Contact, Arc::new(err));
        }

        let fs_key_changed = {
            let mut state = self.inner.data.write();
            let previous = state.read.contact_data.replace(data.clone());
            previous.and_then(|c| c.file_system_key) != data.file_system_key
        };
        if fs_key_changed {
            let previous = self.inner.inbound_fs.lock().take();
            if let Some(fs) = previous {
                fs.stop();
            }
            let inbound = self.inner.create_inbound_file_system();
            if let Some(fs) = inbound.as_ref().filter(|_| self.inner.auto_start) {
                fs.start(Some(self.inner.interval));
            }
            *self.inner.inbound_fs.lock() = inbound;
        }

        debug!(peer = %self.actor_address(), "Contact data received");
        self.inner.contact_data.send_replace(Some(data));
    }

    /// Publish our side of the contact data. `Ok(false)` while the
    /// handshake has not completed.
    pub async fn push_contact_data(&self) -> FeedwireResult<bool> {
        let inner = &self.inner;
        inner
            .contact_queue
            .run(async {
                let (params, data) = {
                    let state = inner.data.read();
                    let Some(contact_key) = state.read.contact_public_key.clone() else {
                        return Ok(false);
                    };
                    let params = ContactParams {
                        key_pair: state.write.key_pair.clone(),
                        contact_key,
                    };
                    (params, state.write.contact_data())
                };
                write_contact(&inner.client, &params, &data).await?;
                debug!(peer = %self.actor_address(), "Contact data pushed");
                Ok(true)
            })
            .await
    }

    pub async fn set_profile(&self, profile: ProfileData) -> FeedwireResult<bool> {
        self.inner.data.write().write.profile = Some(profile);
        self.push_contact_data().await
    }

    /// Peer's file system, once they advertised a key.
    pub fn inbound_file_system(&self) -> Option<FileSystemReader> {
        let mut inbound = self.inner.inbound_fs.lock();
        if inbound.is_none() {
            *inbound = self.inner.create_inbound_file_system();
        }
        inbound.clone()
    }

    pub fn outbound_file_system(&self) -> Option<FileSystemWriter> {
        self.inner.outbound_fs.read().clone()
    }

    /// Create our file system for the peer and advertise its key.
    /// `Ok(false)` while the handshake has not completed.
    pub async fn create_outbound_file_system(&self) -> FeedwireResult<bool> {
        if self.outbound_file_system().is_some() {
            return Ok(true);
        }
        let Some(contact_key) = self.contact_public_key() else {
            return Ok(false);
        };

        let key_pair = {
            let mut state = self.inner.data.write();
            state
                .write
                .file_system_key_pair
                .get_or_insert_with(KeyPair::generate)
                .clone()
        };
        let fs = FileSystemWriter::new(
            self.inner.client.clone(),
            key_pair,
            Some(contact_key),
            Some(FilesRecord::new()),
        );
        if self.inner.auto_start {
            fs.start(None);
        }
        *self.inner.outbound_fs.write() = Some(fs);
        self.push_contact_data().await
    }

    /// Open our mailboxes for the peer. `Ok(false)` while the handshake
    /// has not completed.
    pub async fn create_outboxes(&self) -> FeedwireResult<bool> {
        if self.outboxes().is_some() {
            return Ok(true);
        }
        let Some(contact_key) = self.contact_public_key() else {
            return Ok(false);
        };
        let mailboxes = self.inner.data.read().write.mailboxes.clone();
        let outboxes = OutboxesAgent::new(self.inner.client.clone(), contact_key, &mailboxes);
        *self.inner.outboxes.write() = Some(Arc::new(outboxes));
        self.push_contact_data().await
    }

    /// Add a mailbox with a fresh key pair and advertise it.
    pub async fn add_outbox(&self, label: &str) -> FeedwireResult<bool> {
        let key_pair = KeyPair::generate();
        self.inner
            .data
            .write()
            .write
            .mailboxes
            .insert(label.to_string(), key_pair.clone());

        match self.outboxes() {
            None => self.create_outboxes().await,
            Some(outboxes) => {
                outboxes.set_outbox(label, &key_pair);
                self.push_contact_data().await
            }
        }
    }
}
