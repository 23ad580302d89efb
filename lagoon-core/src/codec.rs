//! Pluggable payload serialization.
//!
//! Broadcast values travel through the consensus layer as opaque
//! [`Payload`]s. A [`PayloadCodec`] turns application values into payloads
//! and back; [`JsonCodec`] is the default.
//!
//! ```rust
//! use lagoon_core::{JsonCodec, PayloadCodec};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct Join { member: u32 }
//!
//! let payload = JsonCodec.encode(&Join { member: 3 }).unwrap();
//! let decoded: Join = JsonCodec.decode(&payload).unwrap();
//! assert_eq!(decoded, Join { member: 3 });
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::message::Payload;

/// Error type for codec operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Failed to encode a value into a payload.
    #[error("encode error: {0}")]
    Encode(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Failed to decode a payload into a value.
    #[error("decode error: {0}")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Serialization format for broadcast payloads.
pub trait PayloadCodec: Clone + 'static {
    /// Encode a value into a payload.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Payload, CodecError>;

    /// Decode a payload into a value.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if deserialization fails.
    fn decode<T: DeserializeOwned>(&self, payload: &Payload) -> Result<T, CodecError>;
}

/// JSON codec using serde_json.
#[derive(Clone, Default, Debug, Copy)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Payload, CodecError> {
        serde_json::to_vec(value)
            .map(Payload)
            .map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, payload: &Payload) -> Result<T, CodecError> {
        serde_json::from_slice(payload.as_bytes()).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}
