//! Opaque payloads and the message envelope handed to the context layer.
//!
//! The context layer never looks inside a [`Payload`]; encoding is the job of
//! a [`PayloadCodec`](crate::PayloadCodec). A [`Message`] pairs a payload with
//! a message name and free-form headers, and is what proposers queue and book.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Serialized value agreed on by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Payload(pub Vec<u8>);

impl Payload {
    /// Wrap raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Number of bytes in the payload.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the payload carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

/// Envelope carrying a payload through the protocol dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    name: String,
    payload: Payload,
    headers: BTreeMap<String, String>,
}

impl Message {
    /// Create a message with the given name and payload.
    pub fn new(name: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Return a copy of this message with the header `key` set to `value`.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Message name (protocol message type).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The carried payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Look up a header.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// A message is empty when it carries no payload bytes.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_message() {
        assert!(Message::default().is_empty());
        assert!(Message::new("propose", Vec::<u8>::new()).is_empty());
        assert!(!Message::new("propose", b"x".as_slice()).is_empty());
    }

    #[test]
    fn test_message_headers() {
        let msg = Message::new("propose", b"value".as_slice())
            .with_header("conversation-id", "42")
            .with_header("from", "cluster://10.0.0.1:5001");

        assert_eq!(msg.name(), "propose");
        assert_eq!(msg.payload().as_bytes(), b"value");
        assert_eq!(msg.header("conversation-id"), Some("42"));
        assert_eq!(msg.header("to"), None);
    }
}
