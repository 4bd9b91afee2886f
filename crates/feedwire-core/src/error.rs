//! Error types for Feedwire

use thiserror::Error;

/// Main error type for Feedwire operations
#[derive(Error, Debug)]
pub enum FeedwireError {
    // ------------------------------------------------------------------
    // Framing
    // ------------------------------------------------------------------
    /// The stream does not start with the expected magic byte
    #[error("Invalid stream: expected magic byte 0x{expected:02x}, got {found}")]
    InvalidStream { expected: u8, found: String },

    /// Input is truncated or malformed
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialized header does not fit the 2-byte length prefix
    #[error("Header size out of bounds: {0} (must be 0..=65535)")]
    OutOfBoundsHeaderSize(i64),

    // ------------------------------------------------------------------
    // Size policy
    // ------------------------------------------------------------------
    /// Declared body size is larger than the caller's limit
    #[error("Body size {size} exceeds max size {max_size}")]
    BodyExceedsMaxSize { size: u64, max_size: usize },

    /// More body bytes arrived than the effective buffer bound allows
    #[error("Max buffer size exceeded: more than {0} bytes received")]
    MaxBufferExceeded(u64),

    // ------------------------------------------------------------------
    // Crypto
    // ------------------------------------------------------------------
    /// AEAD tag check failed (wrong key or tampered data)
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Payload is encrypted but no key was provided
    #[error("Missing key to decrypt payload")]
    MissingKey,

    /// Only aes-256-gcm is supported
    #[error("Unsupported encryption algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Counterparty value is not a valid secp256k1 public key
    #[error("Invalid counterparty key: {0}")]
    InvalidCounterpartyKey(String),

    /// Other cryptographic failure (bad key length, invalid IV, ...)
    #[error("Crypto error: {0}")]
    Crypto(String),

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------
    /// Entity data does not match its schema
    #[error("Schema validation failed at {path}: {reason}")]
    SchemaValidation { path: String, reason: String },

    /// No schema is registered for this entity type
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    /// Entity payload type differs from the one expected by the reader
    #[error("Unexpected entity type: expected {expected}, got {found}")]
    UnexpectedEntityType { expected: String, found: String },

    // ------------------------------------------------------------------
    // Application-level not-found
    // ------------------------------------------------------------------
    /// No file at this path in the file system
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// No outbox registered under this label
    #[error("Invalid outbox label: {0}")]
    InvalidOutboxLabel(String),

    /// No actor published at this address
    #[error("Actor not found: {0}")]
    ActorNotFound(String),

    /// File system path does not match `^(/[^/]+)+$`
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    // ------------------------------------------------------------------
    // Sync state
    // ------------------------------------------------------------------
    /// A writer's initial pull is already running
    #[error("File system writer is already being initialized")]
    AlreadyInitializing,

    // ------------------------------------------------------------------
    // Collaborators
    // ------------------------------------------------------------------
    /// Error reported by the store
    #[error("Store error: {0}")]
    Store(String),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FeedwireError {
    /// Ordinary not-found conditions the caller is expected to handle.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FeedwireError::FileNotFound(_)
                | FeedwireError::InvalidOutboxLabel(_)
                | FeedwireError::ActorNotFound(_)
        )
    }

    pub(crate) fn schema(path: impl Into<String>, reason: impl Into<String>) -> Self {
        FeedwireError::SchemaValidation {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for FeedwireError {
    fn from(err: serde_json::Error) -> Self {
        FeedwireError::Serialization(err.to_string())
    }
}

/// Result type alias using FeedwireError
pub type FeedwireResult<T> = Result<T, FeedwireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FeedwireError::FileNotFound("/docs/a.txt".to_string());
        assert_eq!(format!("{}", err), "File not found: /docs/a.txt");

        let err = FeedwireError::schema("/profile/displayName", "too long");
        assert_eq!(
            format!("{}", err),
            "Schema validation failed at /profile/displayName: too long"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: FeedwireError = io_err.into();
        assert!(matches!(err, FeedwireError::Io(_)));
    }

    #[test]
    fn test_recoverable_class() {
        assert!(FeedwireError::InvalidOutboxLabel("x".into()).is_recoverable());
        assert!(FeedwireError::ActorNotFound("0x00".into()).is_recoverable());
        assert!(!FeedwireError::MissingKey.is_recoverable());
        assert!(!FeedwireError::AuthenticationFailed("tag".into()).is_recoverable());
    }
}
