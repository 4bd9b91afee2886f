//! Schemas of the builtin entity types

use super::{Format, Schema, SchemaRegistry};
use crate::namespace::{
    type_id, ACTOR_NAME, CONTACT_NAME, FILE_SYSTEM_NAME, FIRST_CONTACT_NAME, MESSAGE_NAME, PEER_CONTACT_NAME,
    PEER_NAME,
};

pub fn profile_schema() -> Schema {
    Schema::object()
        .optional("displayName", Schema::max_length(50))
        .optional("walletAddress", Schema::format(Format::Address))
}

pub fn actor_schema() -> Schema {
    Schema::object()
        .required("publicKey", Schema::format(Format::PublicKey))
        .optional("profile", profile_schema())
        .closed()
}

pub fn first_contact_schema() -> Schema {
    Schema::object()
        .required("actorAddress", Schema::format(Format::Address))
        .required("contactPublicKey", Schema::format(Format::PublicKey))
        .closed()
}

pub fn contact_schema() -> Schema {
    Schema::object()
        .optional("fileSystemKey", Schema::format(Format::PublicKey))
        .optional(
            "mailboxes",
            Schema::map(Format::MailboxLabel, Schema::format(Format::PublicKey)),
        )
        .optional("profile", profile_schema())
        .closed()
}

pub fn peer_schema() -> Schema {
    Schema::object()
        .required("publicKey", Schema::format(Format::PublicKey))
        .optional("profile", profile_schema())
        .closed()
}

pub fn peer_contact_schema() -> Schema {
    Schema::object()
        .required("contactPublicKey", Schema::format(Format::PublicKey))
        .required("peerAddress", Schema::format(Format::Address))
        .closed()
}

fn file_encryption_schema() -> Schema {
    Schema::object()
        .required("algorithm", Schema::string())
        .required("authTag", Schema::string())
        .required("iv", Schema::string())
        .required("key", Schema::string())
}

pub fn file_ref_schema() -> Schema {
    Schema::object()
        .required("hash", Schema::format(Format::Hash))
        .optional("contentType", Schema::string())
        .optional("encryption", file_encryption_schema())
        .optional("size", Schema::non_negative_integer())
}

pub fn file_system_schema() -> Schema {
    Schema::object().required(
        "files",
        Schema::map(Format::AbsolutePath, file_ref_schema()),
    )
}

pub fn message_schema() -> Schema {
    let attachment = Schema::object()
        .required("file", file_ref_schema())
        .optional("name", Schema::max_length(100));

    Schema::object()
        .required("body", Schema::string())
        .optional("attachments", Schema::array(attachment))
        .optional("replyTo", Schema::format(Format::Hash))
        .optional("thread", Schema::format(Format::Hash))
        .optional("title", Schema::max_length(100))
}

pub(super) fn register_all(registry: &mut SchemaRegistry) {
    registry.register(type_id(ACTOR_NAME), actor_schema());
    registry.register(type_id(CONTACT_NAME), contact_schema());
    registry.register(type_id(FILE_SYSTEM_NAME), file_system_schema());
    registry.register(type_id(FIRST_CONTACT_NAME), first_contact_schema());
    registry.register(type_id(MESSAGE_NAME), message_schema());
    registry.register(type_id(PEER_NAME), peer_schema());
    registry.register(type_id(PEER_CONTACT_NAME), peer_contact_schema());
}
