//! Payload framing codec
//!
//! Every message written to a feed or stored as a chapter goes through
//! this codec. The wire format is:
//!
//! ```text
//! ┌──────────┬──────────────────┬─────────────────────┬──────────────┐
//! │ 0xAE (1) │ header len (2,BE)│ header (JSON)       │ body         │
//! └──────────┴──────────────────┴─────────────────────┴──────────────┘
//!   header = {"size"?: uint, "encryption"?: {algorithm, iv, authTag}}
//! ```
//!
//! `size` is the exact byte length of the body as transmitted (after
//! encryption). Decoding checks it against the caller's `max_size` before
//! reading the body, and aborts as soon as more bytes arrive than the
//! effective bound allows, so a hostile stream cannot make the decoder
//! buffer unbounded data.

use std::io::{ErrorKind, Read};

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::crypto::{self, EncryptionParams, CRYPTO_ALGORITHM};
use crate::error::{FeedwireError, FeedwireResult};

/// Leading control byte of every framed payload
pub const MAGIC_BYTE: u8 = 0xAE;

/// Width of the header length prefix
pub const HEADER_SIZE_BYTES: usize = 2;

/// Largest header the length prefix can describe
pub const HEADER_MAX_SIZE: usize = 65_535;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Header of a framed payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionParams>,
}

/// Options for [`encode_payload`]
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodeOptions<'a> {
    /// 32-byte key; the body is encrypted when set
    pub key: Option<&'a [u8]>,
    /// Defaults to aes-256-gcm
    pub algorithm: Option<&'a str>,
}

impl<'a> EncodeOptions<'a> {
    pub fn with_key(key: Option<&'a [u8]>) -> Self {
        Self {
            key,
            algorithm: None,
        }
    }
}

/// Options for the decode functions
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions<'a> {
    pub key: Option<&'a [u8]>,
    pub max_size: Option<usize>,
}

impl<'a> DecodeOptions<'a> {
    pub fn new(key: Option<&'a [u8]>, max_size: Option<usize>) -> Self {
        Self { key, max_size }
    }
}

/// Encode a header length as 2 big-endian bytes.
pub fn encode_header_size(size: i64) -> FeedwireResult<[u8; HEADER_SIZE_BYTES]> {
    if !(0..=HEADER_MAX_SIZE as i64).contains(&size) {
        return Err(FeedwireError::OutOfBoundsHeaderSize(size));
    }
    Ok((size as u16).to_be_bytes())
}

/// Decode a 2-byte big-endian header length.
pub fn decode_header_size(bytes: &[u8]) -> FeedwireResult<usize> {
    match bytes {
        [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo]) as usize),
        _ => Err(FeedwireError::InvalidInput(format!(
            "header size must be {} bytes, got {}",
            HEADER_SIZE_BYTES,
            bytes.len()
        ))),
    }
}

/// Serialize `payload` as JSON and frame it.
pub fn encode_payload<T: Serialize + ?Sized>(
    payload: &T,
    options: EncodeOptions<'_>,
) -> FeedwireResult<Bytes> {
    let plain = serde_json::to_vec(payload)?;
    encode_raw(&plain, options)
}

/// Frame an already-serialized body.
pub fn encode_raw(plain: &[u8], options: EncodeOptions<'_>) -> FeedwireResult<Bytes> {
    let mut header = PayloadHeader::default();

    let body = match options.key {
        None => plain.to_vec(),
        Some(key) => {
            let algorithm = options.algorithm.unwrap_or(CRYPTO_ALGORITHM);
            let encrypted = crypto::encrypt(algorithm, key, plain)?;
            header.encryption = Some(encrypted.params);
            encrypted.data
        }
    };
    header.size = Some(body.len() as u64);

    let header_bytes = serde_json::to_vec(&header)?;
    let header_len = encode_header_size(header_bytes.len() as i64)?;

    let mut out = BytesMut::with_capacity(1 + HEADER_SIZE_BYTES + header_bytes.len() + body.len());
    out.put_u8(MAGIC_BYTE);
    out.put_slice(&header_len);
    out.put_slice(&header_bytes);
    out.put_slice(&body);
    Ok(out.freeze())
}

/// Decode a complete framed payload held in memory.
pub fn decode(bytes: &[u8], options: DecodeOptions<'_>) -> FeedwireResult<Vec<u8>> {
    decode_reader(bytes, options)
}

/// Decode a framed payload and deserialize its JSON body.
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8], options: DecodeOptions<'_>) -> FeedwireResult<T> {
    let body = decode(bytes, options)?;
    Ok(serde_json::from_slice(&body)?)
}

/// Decode from a blocking reader, reading the body incrementally.
pub fn decode_reader<R: Read>(mut reader: R, options: DecodeOptions<'_>) -> FeedwireResult<Vec<u8>> {
    let mut first = [0u8; 1];
    let magic = match reader.read_exact(&mut first) {
        Ok(()) => Some(first[0]),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
        Err(e) => return Err(e.into()),
    };
    check_magic(magic)?;

    let mut len_bytes = [0u8; HEADER_SIZE_BYTES];
    read_exact_or_invalid(&mut reader, &mut len_bytes)?;
    let header_len = decode_header_size(&len_bytes)?;

    let mut header_bytes = vec![0u8; header_len];
    read_exact_or_invalid(&mut reader, &mut header_bytes)?;
    let header = parse_header(&header_bytes)?;

    let mut limit = BodyLimit::prepare(&header, &options)?;
    let mut body = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        limit.accept(n)?;
        body.extend_from_slice(&chunk[..n]);
    }

    finish(&header, body, &options)
}

/// Decode from an async reader, reading the body incrementally.
pub async fn decode_stream<R: AsyncRead + Unpin>(
    mut reader: R,
    options: DecodeOptions<'_>,
) -> FeedwireResult<Vec<u8>> {
    let magic = match reader.read_u8().await {
        Ok(byte) => Some(byte),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
        Err(e) => return Err(e.into()),
    };
    check_magic(magic)?;

    let mut len_bytes = [0u8; HEADER_SIZE_BYTES];
    if let Err(e) = reader.read_exact(&mut len_bytes).await {
        return Err(eof_as_invalid(e));
    }
    let header_len = decode_header_size(&len_bytes)?;

    let mut header_bytes = vec![0u8; header_len];
    if let Err(e) = reader.read_exact(&mut header_bytes).await {
        return Err(eof_as_invalid(e));
    }
    let header = parse_header(&header_bytes)?;

    let mut limit = BodyLimit::prepare(&header, &options)?;
    let mut body = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        limit.accept(n)?;
        body.extend_from_slice(&chunk[..n]);
    }

    finish(&header, body, &options)
}

fn check_magic(found: Option<u8>) -> FeedwireResult<()> {
    match found {
        Some(MAGIC_BYTE) => Ok(()),
        Some(byte) => Err(FeedwireError::InvalidStream {
            expected: MAGIC_BYTE,
            found: format!("0x{:02x}", byte),
        }),
        None => Err(FeedwireError::InvalidStream {
            expected: MAGIC_BYTE,
            found: "end of stream".to_string(),
        }),
    }
}

fn eof_as_invalid(err: std::io::Error) -> FeedwireError {
    if err.kind() == ErrorKind::UnexpectedEof {
        FeedwireError::InvalidInput("stream ended before the header was complete".to_string())
    } else {
        err.into()
    }
}

fn read_exact_or_invalid<R: Read>(reader: &mut R, buf: &mut [u8]) -> FeedwireResult<()> {
    reader.read_exact(buf).map_err(eof_as_invalid)
}

fn parse_header(bytes: &[u8]) -> FeedwireResult<PayloadHeader> {
    if bytes.is_empty() {
        return Ok(PayloadHeader::default());
    }
    serde_json::from_slice(bytes)
        .map_err(|e| FeedwireError::InvalidInput(format!("malformed header: {}", e)))
}

/// Running byte count against `min(max_size, header.size)`.
struct BodyLimit {
    bound: Option<u64>,
    received: u64,
}

impl BodyLimit {
    /// Checks that can fail before any body byte is read.
    fn prepare(header: &PayloadHeader, options: &DecodeOptions<'_>) -> FeedwireResult<Self> {
        if let (Some(size), Some(max_size)) = (header.size, options.max_size) {
            if size > max_size as u64 {
                return Err(FeedwireError::BodyExceedsMaxSize { size, max_size });
            }
        }
        if let Some(encryption) = &header.encryption {
            crypto::check_algorithm(&encryption.algorithm)?;
            if options.key.is_none() {
                return Err(FeedwireError::MissingKey);
            }
        }

        let bound = match (options.max_size.map(|m| m as u64), header.size) {
            (Some(max), Some(size)) => Some(max.min(size)),
            (Some(max), None) => Some(max),
            (None, size) => size,
        };
        Ok(Self { bound, received: 0 })
    }

    fn accept(&mut self, n: usize) -> FeedwireResult<()> {
        self.received += n as u64;
        match self.bound {
            Some(bound) if self.received > bound => Err(FeedwireError::MaxBufferExceeded(bound)),
            _ => Ok(()),
        }
    }
}

fn finish(header: &PayloadHeader, body: Vec<u8>, options: &DecodeOptions<'_>) -> FeedwireResult<Vec<u8>> {
    if let Some(size) = header.size {
        if body.len() as u64 != size {
            return Err(FeedwireError::InvalidInput(format!(
                "body is {} bytes but header declares {}",
                body.len(),
                size
            )));
        }
    }

    match (&header.encryption, options.key) {
        (Some(params), Some(key)) => crypto::decrypt(key, params, &body),
        (Some(_), None) => Err(FeedwireError::MissingKey),
        (None, _) => Ok(body),
    }
}
