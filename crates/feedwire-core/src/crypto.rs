//! Symmetric encryption layer using AES-256-GCM
//!
//! Every encrypted payload on the wire, and every encrypted file blob,
//! goes through this module. The cipher is fixed to AES-256-GCM with a
//! 16-byte IV and a detached 16-byte authentication tag; the IV and tag
//! travel next to the ciphertext as base64 strings (see [`EncryptionParams`]).

use aes_gcm::{
    aead::{consts::U16, AeadInPlace, KeyInit},
    aes::Aes256,
    AesGcm, Nonce, Tag,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::error::{FeedwireError, FeedwireResult};

/// The only algorithm identifier accepted on the wire.
pub const CRYPTO_ALGORITHM: &str = "aes-256-gcm";

/// Symmetric key size in bytes
pub const KEY_SIZE: usize = 32;

/// IV size in bytes
pub const IV_SIZE: usize = 16;

/// Authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Cipher parameters carried alongside a ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionParams {
    pub algorithm: String,
    /// Base64-encoded IV
    pub iv: String,
    /// Base64-encoded GCM tag
    pub auth_tag: String,
}

/// Result of a single encryption call.
#[derive(Debug, Clone)]
pub struct EncryptedPayload {
    pub params: EncryptionParams,
    pub data: Vec<u8>,
}

/// Generate a fresh random 32-byte key.
pub fn generate_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    rand::rng().fill_bytes(&mut key);
    key
}

/// Keccak-256 digest, used for addresses, topics and blob hashes.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Fail with `UnsupportedAlgorithm` unless `algorithm` is aes-256-gcm.
pub fn check_algorithm(algorithm: &str) -> FeedwireResult<()> {
    if algorithm == CRYPTO_ALGORITHM {
        Ok(())
    } else {
        Err(FeedwireError::UnsupportedAlgorithm(algorithm.to_string()))
    }
}

fn cipher(key: &[u8]) -> FeedwireResult<Aes256Gcm16> {
    if key.len() != KEY_SIZE {
        return Err(FeedwireError::Crypto(format!(
            "key must be {} bytes, got {}",
            KEY_SIZE,
            key.len()
        )));
    }
    Aes256Gcm16::new_from_slice(key).map_err(|e| FeedwireError::Crypto(e.to_string()))
}

/// Encrypt `plaintext` with a fresh random IV.
pub fn encrypt(algorithm: &str, key: &[u8], plaintext: &[u8]) -> FeedwireResult<EncryptedPayload> {
    check_algorithm(algorithm)?;
    let cipher = cipher(key)?;

    let mut iv = [0u8; IV_SIZE];
    rand::rng().fill_bytes(&mut iv);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::<U16>::from_slice(&iv), b"", &mut buffer)
        .map_err(|e| FeedwireError::Crypto(format!("Encryption failed: {}", e)))?;

    Ok(EncryptedPayload {
        params: EncryptionParams {
            algorithm: algorithm.to_string(),
            iv: BASE64.encode(iv),
            auth_tag: BASE64.encode(tag),
        },
        data: buffer,
    })
}

/// Decrypt `ciphertext` using the IV and tag from `params`.
///
/// A wrong key or any tampering with the ciphertext, IV or tag yields
/// `AuthenticationFailed`.
pub fn decrypt(key: &[u8], params: &EncryptionParams, ciphertext: &[u8]) -> FeedwireResult<Vec<u8>> {
    check_algorithm(&params.algorithm)?;
    let cipher = cipher(key)?;

    let iv = decode_fixed(&params.iv, IV_SIZE, "iv")?;
    let tag = decode_fixed(&params.auth_tag, TAG_SIZE, "authTag")?;

    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::<U16>::from_slice(&iv),
            b"",
            &mut buffer,
            Tag::from_slice(&tag),
        )
        .map_err(|_| {
            FeedwireError::AuthenticationFailed("unable to authenticate data".to_string())
        })?;
    Ok(buffer)
}

fn decode_fixed(value: &str, len: usize, field: &str) -> FeedwireResult<Vec<u8>> {
    let bytes = BASE64
        .decode(value)
        .map_err(|e| FeedwireError::Crypto(format!("invalid base64 {}: {}", field, e)))?;
    if bytes.len() != len {
        return Err(FeedwireError::Crypto(format!(
            "{} must be {} bytes, got {}",
            field,
            len,
            bytes.len()
        )));
    }
    Ok(bytes)
}
