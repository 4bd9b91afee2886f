//! Identity module for Feedwire
//!
//! Actors, contacts, file systems and mailboxes are all owned by
//! secp256k1 key pairs. A key pair's public half is exchanged as a
//! 130-character hex string (uncompressed SEC1 point) and its
//! [address](KeyPair::address) names the feeds it writes.
//!
//! ## Example
//!
//! ```rust
//! use feedwire_core::identity::KeyPair;
//!
//! let alice = KeyPair::generate();
//! let bob = KeyPair::generate();
//!
//! // ECDH is symmetric
//! assert_eq!(
//!     alice.shared_secret(&bob.public_key()),
//!     bob.shared_secret(&alice.public_key()),
//! );
//! assert_eq!(alice.address().len(), 42);
//! ```

mod keypair;

pub use keypair::{is_address, is_public_key_hex, KeyPair, PublicKey, PUBLIC_KEY_HEX_LEN};
