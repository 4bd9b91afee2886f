//! Namespaced names for channels and entity types
//!
//! Channel names look like `feedwire.contact.v0`; entity type ids add the
//! protocol prefix: `feedwire://feedwire.contact.v0`.

pub const PROTOCOL_NAME: &str = "feedwire://";
pub const NAMESPACE_PREFIX: &str = "feedwire";
pub const NAMESPACE_VERSION: &str = "v0";

pub const ACTOR_NAME: &str = "feedwire.actor.v0";
pub const CONTACT_NAME: &str = "feedwire.contact.v0";
pub const FILE_SYSTEM_NAME: &str = "feedwire.fileSystem.v0";
pub const FIRST_CONTACT_NAME: &str = "feedwire.firstContact.v0";
pub const MAILBOX_NAME: &str = "feedwire.mailbox.v0";
pub const MESSAGE_NAME: &str = "feedwire.message.v0";
pub const PEER_NAME: &str = "feedwire.peer.v0";
pub const PEER_CONTACT_NAME: &str = "feedwire.peerContact.v0";

/// `feedwire.<name>.<version>`
pub fn namespace(name: &str, version: &str) -> String {
    format!("{}.{}.{}", NAMESPACE_PREFIX, name, version)
}

/// Entity type id for a namespaced name; already-prefixed ids pass through.
pub fn type_id(name: &str) -> String {
    if name.starts_with(PROTOCOL_NAME) {
        name.to_string()
    } else {
        format!("{}{}", PROTOCOL_NAME, name)
    }
}
