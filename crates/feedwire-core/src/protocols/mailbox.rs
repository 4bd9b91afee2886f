//! Mailboxes: encrypted message timelines with a single writer

use crate::client::FeedwireClient;
use crate::entity::{read_entity, EntityPayload};
use crate::error::FeedwireResult;
use crate::feed::{ReaderParams, WriterParams};
use crate::identity::{KeyPair, PublicKey};
use crate::namespace::{type_id, MAILBOX_NAME, MESSAGE_NAME};
use crate::timeline::{Chapter, Timeline, TimelinePublisher};
use crate::types::MessageData;

pub type MailboxWriter = TimelinePublisher<MessageData>;

/// Read side of the mailbox `writer` keeps for `key_pair`.
pub fn mailbox_reader(client: &FeedwireClient, key_pair: &KeyPair, writer: &PublicKey) -> FeedwireResult<Timeline> {
    client.read_timeline(
        &ReaderParams::new(writer.clone(), MAILBOX_NAME)
            .with_entity_type(MESSAGE_NAME)
            .with_key_pair(Some(key_pair.clone())),
    )
}

pub fn mailbox_writer(client: &FeedwireClient, key_pair: &KeyPair, reader: &PublicKey) -> MailboxWriter {
    client.timeline_publisher(
        &WriterParams::new(key_pair.clone(), MAILBOX_NAME)
            .with_entity_type(MESSAGE_NAME)
            .with_reader(Some(reader.clone())),
    )
}

/// Validate a mailbox chapter's content as a message entity.
pub fn read_message(client: &FeedwireClient, chapter: &Chapter) -> FeedwireResult<MessageData> {
    let payload: EntityPayload = serde_json::from_value(chapter.content.clone())?;
    read_entity(client.schemas(), &type_id(MESSAGE_NAME), payload)
}
