//! Builtin protocols
//!
//! Stateless helpers binding each entity type to its channel name. The
//! stateful engines built on top of them live in [`crate::agent`].

pub mod actor;
pub mod contact;
pub mod file_system;
pub mod mailbox;
pub mod peer;
pub mod peer_contact;

pub use actor::{actor_publisher, actor_subscriber, read_actor, write_actor};
pub use contact::{
    contact_subscriber, first_contact_subscriber, read_contact, read_first_contact, write_contact,
    write_first_contact, ContactParams, FirstContactParams,
};
pub use file_system::{
    download_file, upload_file, FileSystem, FileSystemChanges, FileSystemReader, FileSystemWriter,
    FileUploadParams, PullSyncState, PushSyncState,
};
pub use mailbox::{mailbox_reader, mailbox_writer, read_message, MailboxWriter};
pub use peer::{peer_publisher, peer_subscriber, read_peer, write_peer};
pub use peer_contact::{peer_contact_subscriber, read_peer_contact, write_peer_contact, PeerContactParams};
