//! Stateful agents built on the protocols
//!
//! [`Agent`] owns an actor identity and one [`ContactAgent`] per peer,
//! keyed by the peer's actor address. Every piece of state an agent holds
//! can be captured with `snapshot()` and handed back to `new` to restore.

pub mod contact;
pub mod messaging;

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::client::FeedwireClient;
use crate::error::{FeedwireError, FeedwireResult};
use crate::feed::FeedPublisher;
use crate::identity::{KeyPair, PublicKey};
use crate::protocols::actor::{actor_publisher, read_actor};
use crate::types::{ActorData, ProfileData};

pub use contact::{
    ContactAgent, ContactAgentData, ContactAgentError, ContactErrorKind, ContactState, FirstContactAgentData,
    ReadContactAgentData, WriteContactAgentData,
};
pub use messaging::{
    InboxAgent, InboxData, InboxNewMessage, InboxState, InboxesAgent, OutboxesAgent,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorAgentData {
    pub key_pair: KeyPair,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileData>,
}

/// Persistable state of an [`Agent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentData {
    pub actor: ActorAgentData,
    /// Keyed by the peer's actor address
    #[serde(default)]
    pub contacts: BTreeMap<String, ContactAgentData>,
}

impl AgentData {
    pub fn generate() -> Self {
        Self {
            actor: ActorAgentData {
                key_pair: KeyPair::generate(),
                profile: None,
            },
            contacts: BTreeMap::new(),
        }
    }
}

/// An actor and its contacts.
///
/// Must be used within a tokio runtime.
pub struct Agent {
    client: FeedwireClient,
    key_pair: KeyPair,
    profile: RwLock<Option<ProfileData>>,
    actor: FeedPublisher<ActorData>,
    contacts: RwLock<BTreeMap<String, ContactAgent>>,
    auto_start: bool,
}

impl Agent {
    pub fn new(client: FeedwireClient, data: AgentData, auto_start: bool) -> FeedwireResult<Self> {
        let mut contacts = BTreeMap::new();
        for (address, contact) in data.contacts {
            contacts.insert(address, ContactAgent::new(client.clone(), contact, auto_start)?);
        }
        Ok(Self {
            actor: actor_publisher(&client, &data.actor.key_pair),
            client,
            key_pair: data.actor.key_pair,
            profile: RwLock::new(data.actor.profile),
            contacts: RwLock::new(contacts),
            auto_start,
        })
    }

    pub fn client(&self) -> &FeedwireClient {
        &self.client
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub fn address(&self) -> String {
        self.key_pair.address()
    }

    pub fn profile(&self) -> Option<ProfileData> {
        self.profile.read().clone()
    }

    /// Publish the actor feed, replacing the stored profile when one is
    /// given.
    pub async fn write_actor(&self, profile: Option<ProfileData>) -> FeedwireResult<String> {
        if let Some(profile) = profile {
            *self.profile.write() = Some(profile);
        }
        let data = ActorData {
            public_key: self.key_pair.public_key().to_hex(),
            profile: self.profile(),
        };
        self.actor.publish(&data).await
    }

    pub async fn lookup_actor(&self, address: &str) -> FeedwireResult<Option<ActorData>> {
        read_actor(&self.client, address).await
    }

    /// Start a relationship with the actor at `address`: announce a fresh
    /// contact key and wait for theirs. Returns the existing agent when
    /// the contact is already known.
    pub async fn add_contact(&self, address: &str) -> FeedwireResult<ContactAgent> {
        if let Some(existing) = self.contact(address) {
            return Ok(existing);
        }

        let actor = self
            .lookup_actor(address)
            .await?
            .ok_or_else(|| FeedwireError::ActorNotFound(address.to_string()))?;
        let actor_key = PublicKey::from_hex(&actor.public_key)?;
        if actor_key.address() != address {
            return Err(FeedwireError::InvalidCounterpartyKey(format!(
                "actor at {address} publishes the key of {}",
                actor_key.address()
            )));
        }

        let first_contact = FirstContactAgentData {
            key_pair: self.key_pair.clone(),
            actor_key,
        };
        let data = ContactAgentData {
            read: ReadContactAgentData {
                actor_address: address.to_string(),
                actor_data: Some(actor),
                contact_public_key: None,
                contact_data: None,
                first_contact: Some(first_contact.clone()),
            },
            write: WriteContactAgentData {
                first_contact: Some(first_contact),
                profile: self.profile(),
                ..WriteContactAgentData::new(KeyPair::generate())
            },
        };

        let contact = ContactAgent::new(self.client.clone(), data, self.auto_start)?;
        contact.initialize().await?;
        info!(peer = %address, "Contact added");

        let mut contacts = self.contacts.write();
        // A concurrent add for the same address may have won the race
        let contact = contacts.entry(address.to_string()).or_insert(contact).clone();
        Ok(contact)
    }

    /// Stop and forget the contact. Returns whether it was known.
    pub fn remove_contact(&self, address: &str) -> bool {
        let removed = self.contacts.write().remove(address);
        match removed {
            Some(contact) => {
                contact.stop_all();
                info!(peer = %address, "Contact removed");
                true
            }
            None => false,
        }
    }

    pub fn contact(&self, address: &str) -> Option<ContactAgent> {
        self.contacts.read().get(address).cloned()
    }

    pub fn contacts(&self) -> BTreeMap<String, ContactAgent> {
        self.contacts.read().clone()
    }

    pub fn start_all(&self) {
        for contact in self.contacts().values() {
            contact.start_all();
        }
    }

    pub fn stop_all(&self) {
        for contact in self.contacts().values() {
            contact.stop_all();
        }
    }

    pub fn snapshot(&self) -> AgentData {
        AgentData {
            actor: ActorAgentData {
                key_pair: self.key_pair.clone(),
                profile: self.profile(),
            },
            contacts: self
                .contacts()
                .into_iter()
                .map(|(address, contact)| (address, contact.snapshot()))
                .collect(),
        }
    }
}
