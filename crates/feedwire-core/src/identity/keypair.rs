//! secp256k1 key pairs and public keys

use std::fmt;

use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto::keccak256;
use crate::error::{FeedwireError, FeedwireResult};

/// Length of a hex-encoded uncompressed public key (`04 || x || y`).
pub const PUBLIC_KEY_HEX_LEN: usize = 130;

/// A secp256k1 public key.
///
/// Serialized as lowercase hex of the uncompressed SEC1 encoding.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(k256::PublicKey);

impl PublicKey {
    /// Parse a 130-character hex public key.
    pub fn from_hex(value: &str) -> FeedwireResult<Self> {
        if value.len() != PUBLIC_KEY_HEX_LEN {
            return Err(FeedwireError::InvalidCounterpartyKey(format!(
                "expected {} hex chars, got {}",
                PUBLIC_KEY_HEX_LEN,
                value.len()
            )));
        }
        let bytes =
            hex::decode(value).map_err(|e| FeedwireError::InvalidCounterpartyKey(e.to_string()))?;
        Self::from_sec1_bytes(&bytes)
    }

    /// Parse a SEC1-encoded point (compressed or uncompressed).
    pub fn from_sec1_bytes(bytes: &[u8]) -> FeedwireResult<Self> {
        k256::PublicKey::from_sec1_bytes(bytes)
            .map(PublicKey)
            .map_err(|_| FeedwireError::InvalidCounterpartyKey("not a curve point".to_string()))
    }

    /// Uncompressed SEC1 bytes (65 bytes, leading `0x04`).
    pub fn to_uncompressed(&self) -> Vec<u8> {
        self.0.to_encoded_point(false).as_bytes().to_vec()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_uncompressed())
    }

    /// `0x` + last 20 bytes of keccak256 over the 64-byte `x || y`.
    pub fn address(&self) -> String {
        let uncompressed = self.to_uncompressed();
        let digest = keccak256(&uncompressed[1..]);
        format!("0x{}", hex::encode(&digest[12..]))
    }

    pub(crate) fn inner(&self) -> &k256::PublicKey {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "PublicKey({}…)", &hex[..16])
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::from_hex(&value).map_err(serde::de::Error::custom)
    }
}

/// A secp256k1 key pair.
///
/// Serialized as the hex of its 32-byte private scalar, so it can be
/// persisted inside agent snapshots.
#[derive(Clone)]
pub struct KeyPair {
    secret: k256::SecretKey,
}

impl KeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        loop {
            let mut seed = [0u8; 32];
            rand::rng().fill_bytes(&mut seed);
            // Zero or >= curve order is rejected; retry with fresh bytes
            if let Ok(secret) = k256::SecretKey::from_slice(&seed) {
                return Self { secret };
            }
        }
    }

    /// Restore a key pair from its 32-byte private scalar.
    pub fn from_bytes(bytes: &[u8]) -> FeedwireResult<Self> {
        let secret = k256::SecretKey::from_slice(bytes)
            .map_err(|_| FeedwireError::Crypto("invalid secp256k1 private key".to_string()))?;
        Ok(Self { secret })
    }

    /// Restore a key pair from the hex of its private scalar.
    pub fn from_private_hex(value: &str) -> FeedwireResult<Self> {
        let bytes = hex::decode(value.trim_start_matches("0x"))
            .map_err(|e| FeedwireError::Crypto(format!("invalid private key hex: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.secret.to_bytes().as_slice());
        out
    }

    pub fn private_key_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.secret.public_key())
    }

    /// Address of the feeds this key pair writes.
    pub fn address(&self) -> String {
        self.public_key().address()
    }

    /// Raw ECDH shared secret: the x-coordinate of `self.secret * other`.
    ///
    /// Used directly as the AES-256 channel key, without a KDF. Changing
    /// this would break compatibility with existing channels.
    pub fn shared_secret(&self, other: &PublicKey) -> [u8; 32] {
        let shared =
            k256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), other.inner().as_affine());
        let mut out = [0u8; 32];
        out.copy_from_slice(shared.raw_secret_bytes().as_slice());
        out
    }
}

impl PartialEq for KeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.public_key() == other.public_key()
    }
}

impl Eq for KeyPair {}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl Serialize for KeyPair {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.private_key_hex())
    }
}

impl<'de> Deserialize<'de> for KeyPair {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::from_private_hex(&value).map_err(serde::de::Error::custom)
    }
}

fn is_lower_hex(value: &str) -> bool {
    value.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// `^[0-9a-f]{130}$`
pub fn is_public_key_hex(value: &str) -> bool {
    value.len() == PUBLIC_KEY_HEX_LEN && is_lower_hex(value)
}

/// `^0x[0-9a-f]{40}$`
pub fn is_address(value: &str) -> bool {
    value.len() == 42 && value.starts_with("0x") && is_lower_hex(&value[2..])
}
