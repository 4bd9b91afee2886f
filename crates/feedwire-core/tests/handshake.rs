//! Contact handshake end-to-end tests
//!
//! Two agents share one in-memory store and discover each other through
//! their actor feeds, then exchange contact data over the pairwise channel.

use std::sync::Arc;
use std::time::Duration;

use feedwire_core::protocols::{read_first_contact, write_first_contact, FirstContactParams};
use feedwire_core::{
    Agent, AgentData, ContactState, FeedwireClient, FeedwireConfig, FeedwireError, FirstContactData, KeyPair,
    MemoryStore, ProfileData,
};

const TICK: Duration = Duration::from_secs(1);

fn client() -> FeedwireClient {
    FeedwireClient::with_config(Arc::new(MemoryStore::new()), FeedwireConfig::with_poll_interval(TICK))
}

#[tokio::test]
async fn test_first_contact_carries_contact_key() {
    let client = client();
    let alice = KeyPair::generate();
    let bob = KeyPair::generate();
    let alice_contact = KeyPair::generate();

    write_first_contact(
        &client,
        &FirstContactParams {
            key_pair: alice.clone(),
            actor_key: bob.public_key(),
        },
        &FirstContactData {
            actor_address: alice.address(),
            contact_public_key: alice_contact.public_key().to_hex(),
        },
    )
    .await
    .unwrap();

    let received = read_first_contact(
        &client,
        &FirstContactParams {
            key_pair: bob,
            actor_key: alice.public_key(),
        },
    )
    .await
    .unwrap()
    .expect("Bob should see Alice's first contact");
    assert_eq!(received.contact_public_key, alice_contact.public_key().to_hex());
    assert_eq!(received.actor_address, alice.address());
}

#[tokio::test]
async fn test_first_contact_unreadable_by_third_party() {
    let client = client();
    let alice = KeyPair::generate();
    let bob = KeyPair::generate();
    let eve = KeyPair::generate();

    write_first_contact(
        &client,
        &FirstContactParams {
            key_pair: alice.clone(),
            actor_key: bob.public_key(),
        },
        &FirstContactData {
            actor_address: alice.address(),
            contact_public_key: KeyPair::generate().public_key().to_hex(),
        },
    )
    .await
    .unwrap();

    // Eve derives a different topic, so there is nothing to read
    let seen = read_first_contact(
        &client,
        &FirstContactParams {
            key_pair: eve,
            actor_key: alice.public_key(),
        },
    )
    .await
    .unwrap();
    assert!(seen.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_agents_complete_handshake_and_share_profiles() {
    let client = client();
    let alice = Agent::new(client.clone(), AgentData::generate(), true).unwrap();
    let bob = Agent::new(client.clone(), AgentData::generate(), true).unwrap();
    alice.write_actor(Some(ProfileData::named("Alice"))).await.unwrap();
    bob.write_actor(Some(ProfileData::named("Bob"))).await.unwrap();

    let to_bob = alice.add_contact(&bob.address()).await.unwrap();
    assert_eq!(to_bob.state(), ContactState::Disconnected);
    let to_alice = bob.add_contact(&alice.address()).await.unwrap();

    let mut state = to_bob.subscribe_state();
    tokio::time::timeout(TICK * 10, state.wait_for(|s| *s == ContactState::Connected))
        .await
        .expect("handshake should complete")
        .unwrap();
    tokio::time::sleep(TICK * 2).await;
    assert!(to_alice.is_connected());

    // Each side learned the other's contact key
    assert_eq!(
        to_bob.contact_public_key(),
        Some(to_alice.snapshot().write.key_pair.public_key())
    );
    assert_eq!(
        to_alice.contact_public_key(),
        Some(to_bob.snapshot().write.key_pair.public_key())
    );

    assert!(to_bob.push_contact_data().await.unwrap());
    tokio::time::sleep(TICK * 2).await;
    let profile = to_alice.contact_data().and_then(|c| c.profile);
    assert_eq!(profile, Some(ProfileData::named("Alice")));
}

#[tokio::test]
async fn test_add_contact_requires_published_actor() {
    let agent = Agent::new(client(), AgentData::generate(), false).unwrap();
    let err = agent.add_contact(&KeyPair::generate().address()).await.unwrap_err();
    assert!(matches!(err, FeedwireError::ActorNotFound(_)));
    assert!(err.is_recoverable());
}
