//! Contact and first-contact channels
//!
//! Both are pairwise encrypted feeds. For writes `peer` is the reader, for
//! reads it is the writer; either way the channel key is the ECDH secret
//! of `key_pair` and `peer`, so the same params struct serves both sides.

use std::sync::Arc;
use std::time::Duration;

use crate::client::FeedwireClient;
use crate::error::{FeedwireError, FeedwireResult};
use crate::feed::{ReaderParams, WriterParams};
use crate::identity::{KeyPair, PublicKey};
use crate::namespace::{CONTACT_NAME, FIRST_CONTACT_NAME};
use crate::subscription::Subscription;
use crate::types::{ContactData, FirstContactData};

/// Own contact key pair and the peer's contact public key.
#[derive(Debug, Clone)]
pub struct ContactParams {
    pub key_pair: KeyPair,
    pub contact_key: PublicKey,
}

impl ContactParams {
    fn writer(&self) -> WriterParams {
        WriterParams::new(self.key_pair.clone(), CONTACT_NAME).with_reader(Some(self.contact_key.clone()))
    }

    fn reader(&self) -> ReaderParams {
        ReaderParams::new(self.contact_key.clone(), CONTACT_NAME).with_key_pair(Some(self.key_pair.clone()))
    }
}

/// Own actor key pair and the peer's actor public key.
#[derive(Debug, Clone)]
pub struct FirstContactParams {
    pub key_pair: KeyPair,
    pub actor_key: PublicKey,
}

impl FirstContactParams {
    fn writer(&self) -> WriterParams {
        WriterParams::new(self.key_pair.clone(), FIRST_CONTACT_NAME).with_reader(Some(self.actor_key.clone()))
    }

    fn reader(&self) -> ReaderParams {
        ReaderParams::new(self.actor_key.clone(), FIRST_CONTACT_NAME).with_key_pair(Some(self.key_pair.clone()))
    }
}

pub async fn read_contact(client: &FeedwireClient, params: &ContactParams) -> FeedwireResult<Option<ContactData>> {
    client.read_feed(&params.reader()).await
}

pub async fn write_contact(
    client: &FeedwireClient,
    params: &ContactParams,
    data: &ContactData,
) -> FeedwireResult<String> {
    client.write_feed(&params.writer(), data).await
}

pub fn contact_subscriber<N, E>(
    client: &FeedwireClient,
    params: &ContactParams,
    interval: Duration,
    on_next: N,
    on_error: E,
) -> FeedwireResult<Subscription>
where
    N: FnMut(ContactData) + Send + 'static,
    E: FnMut(Arc<FeedwireError>) + Send + 'static,
{
    client.feed_subscriber(&params.reader(), interval, on_next, on_error)
}

pub async fn read_first_contact(
    client: &FeedwireClient,
    params: &FirstContactParams,
) -> FeedwireResult<Option<FirstContactData>> {
    client.read_feed(&params.reader()).await
}

pub async fn write_first_contact(
    client: &FeedwireClient,
    params: &FirstContactParams,
    data: &FirstContactData,
) -> FeedwireResult<String> {
    client.write_feed(&params.writer(), data).await
}

pub fn first_contact_subscriber<N, E>(
    client: &FeedwireClient,
    params: &FirstContactParams,
    interval: Duration,
    on_next: N,
    on_error: E,
) -> FeedwireResult<Subscription>
where
    N: FnMut(FirstContactData) + Send + 'static,
    E: FnMut(Arc<FeedwireError>) + Send + 'static,
{
    client.feed_subscriber(&params.reader(), interval, on_next, on_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::ProfileData;

    #[tokio::test]
    async fn test_first_contact_exchange() {
        let client = FeedwireClient::new(Arc::new(MemoryStore::new()));
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let alice_contact = KeyPair::generate();

        let data = FirstContactData {
            actor_address: alice.address(),
            contact_public_key: alice_contact.public_key().to_hex(),
        };
        write_first_contact(
            &client,
            &FirstContactParams {
                key_pair: alice.clone(),
                actor_key: bob.public_key(),
            },
            &data,
        )
        .await
        .unwrap();

        let read = read_first_contact(
            &client,
            &FirstContactParams {
                key_pair: bob,
                actor_key: alice.public_key(),
            },
        )
        .await
        .unwrap();
        assert_eq!(read, Some(data));
    }

    #[tokio::test]
    async fn test_contact_channels_are_directional() {
        let client = FeedwireClient::new(Arc::new(MemoryStore::new()));
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let to_bob = ContactParams {
            key_pair: alice.clone(),
            contact_key: bob.public_key(),
        };
        let to_alice = ContactParams {
            key_pair: bob,
            contact_key: alice.public_key(),
        };

        let data = ContactData {
            profile: Some(ProfileData::named("Alice")),
            ..Default::default()
        };
        write_contact(&client, &to_bob, &data).await.unwrap();

        // Bob reads what Alice wrote; Alice's own read targets Bob's feed
        assert_eq!(read_contact(&client, &to_alice).await.unwrap(), Some(data));
        assert!(read_contact(&client, &to_bob).await.unwrap().is_none());
    }
}
