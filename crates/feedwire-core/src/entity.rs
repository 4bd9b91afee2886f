//! Typed entity envelopes
//!
//! Application data never hits the codec bare: it is wrapped as
//! `{"type": "<proto>://<namespace>.<entity>.<version>", "data": ...}` and
//! validated against the schema registered for `type`, both before
//! encoding and after decoding.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::{self, DecodeOptions, EncodeOptions};
use crate::error::{FeedwireError, FeedwireResult};
use crate::schema::SchemaRegistry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityPayload<T = Value> {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub data: T,
}

/// Validate `data` as `entity_type` and return the payload as JSON.
pub fn validate_entity<T: Serialize>(
    schemas: &SchemaRegistry,
    entity_type: &str,
    data: &T,
) -> FeedwireResult<EntityPayload> {
    let data = serde_json::to_value(data)?;
    schemas.validate(entity_type, &data)?;
    Ok(EntityPayload {
        entity_type: entity_type.to_string(),
        data,
    })
}

/// Validate and frame an entity, encrypting when `key` is set.
pub fn encode_entity<T: Serialize>(
    schemas: &SchemaRegistry,
    entity_type: &str,
    data: &T,
    key: Option<&[u8]>,
) -> FeedwireResult<Bytes> {
    let payload = validate_entity(schemas, entity_type, data)?;
    codec::encode_payload(&payload, EncodeOptions::with_key(key))
}

/// Check an already-decoded payload and convert its data.
pub fn read_entity<T: DeserializeOwned>(
    schemas: &SchemaRegistry,
    expected_type: &str,
    payload: EntityPayload,
) -> FeedwireResult<T> {
    if payload.entity_type != expected_type {
        return Err(FeedwireError::UnexpectedEntityType {
            expected: expected_type.to_string(),
            found: payload.entity_type,
        });
    }
    schemas.validate(&payload.entity_type, &payload.data)?;
    Ok(serde_json::from_value(payload.data)?)
}

/// Decode a framed entity of `expected_type`.
pub fn decode_entity<T: DeserializeOwned>(
    schemas: &SchemaRegistry,
    expected_type: &str,
    bytes: &[u8],
    options: DecodeOptions<'_>,
) -> FeedwireResult<T> {
    let payload: EntityPayload = codec::decode_json(bytes, options)?;
    read_entity(schemas, expected_type, payload)
}

/// FIFO queue with concurrency 1.
///
/// Publishes to one feed go through one queue so the store never sees two
/// in-flight writes for the same feed. Jobs run strictly in submission
/// order since tokio's mutex is fair.
#[derive(Debug, Clone, Default)]
pub struct PublishQueue {
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl PublishQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` once every earlier job has finished.
    pub async fn run<F, T>(&self, job: F) -> T
    where
        F: Future<Output = T>,
    {
        let _turn = self.lock.lock().await;
        job.await
    }
}
