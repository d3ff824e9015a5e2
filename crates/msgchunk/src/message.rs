// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound and delivered message types.

use crate::transport::FrameId;
use std::collections::BTreeMap;
use std::time::SystemTime;

/// Message-level metadata.
///
/// Travels on whole frames and on the first frame of a chunk group; the
/// reassembled message carries the first chunk's copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMetadata {
    /// Name of the producer that published the message.
    pub producer_name: String,
    /// Per-message sequence id (shared by every chunk of a group).
    pub sequence_id: u64,
    /// Time the producer accepted the message.
    pub publish_time: SystemTime,
    /// Application event time, if set.
    pub event_time: Option<SystemTime>,
    /// Partition/ordering key, if set.
    pub key: Option<String>,
    /// User properties.
    pub properties: BTreeMap<String, String>,
}

impl MessageMetadata {
    /// Create metadata with only the producer identity filled in.
    pub fn new(producer_name: impl Into<String>, sequence_id: u64) -> Self {
        Self {
            producer_name: producer_name.into(),
            sequence_id,
            publish_time: SystemTime::now(),
            event_time: None,
            key: None,
            properties: BTreeMap::new(),
        }
    }
}

/// Message handed to [`Producer::send`](crate::Producer::send).
///
/// # Example
///
/// ```
/// use msgchunk::ProducerMessage;
///
/// let msg = ProducerMessage::new(vec![0u8; 16])
///     .key("sensor-7")
///     .property("unit", "celsius");
/// assert_eq!(msg.payload.len(), 16);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ProducerMessage {
    /// Payload bytes.
    pub payload: Vec<u8>,
    /// Partition/ordering key.
    pub key: Option<String>,
    /// Application event time.
    pub event_time: Option<SystemTime>,
    /// User properties.
    pub properties: BTreeMap<String, String>,
}

impl ProducerMessage {
    /// Create a message from a payload.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::default()
        }
    }

    /// Set the key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the event time.
    pub fn event_time(mut self, t: SystemTime) -> Self {
        self.event_time = Some(t);
        self
    }

    /// Add a user property.
    pub fn property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

/// Identifier of a published message.
///
/// A chunked message is identified by its first and last chunk frames; a
/// whole message has `first == last` and `chunk_count == 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId {
    /// Transport id of the first frame.
    pub first: FrameId,
    /// Transport id of the last frame.
    pub last: FrameId,
    /// Number of frames the message was sent as.
    pub chunk_count: u32,
}

impl MessageId {
    /// Identifier of a message sent as a single frame.
    pub fn single(id: FrameId) -> Self {
        Self {
            first: id,
            last: id,
            chunk_count: 1,
        }
    }

    /// Whether the message was split into chunks.
    pub fn is_chunked(&self) -> bool {
        self.chunk_count > 1
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_chunked() {
            write!(f, "{}..{} ({} chunks)", self.first, self.last, self.chunk_count)
        } else {
            write!(f, "{}", self.first)
        }
    }
}

/// Message delivered to the application.
#[derive(Debug, Clone)]
pub struct Message {
    pub(crate) id: MessageId,
    pub(crate) payload: Vec<u8>,
    pub(crate) metadata: MessageMetadata,
    pub(crate) frame_ids: Vec<FrameId>,
}

impl Message {
    /// Message identifier.
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Payload bytes (reassembled when the message was chunked).
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Message-level metadata.
    pub fn metadata(&self) -> &MessageMetadata {
        &self.metadata
    }

    /// Key, if the producer set one.
    pub fn key(&self) -> Option<&str> {
        self.metadata.key.as_deref()
    }

    /// User property lookup.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.metadata.properties.get(name).map(String::as_str)
    }

    /// Transport ids of every frame the message arrived in, in order.
    pub fn frame_ids(&self) -> &[FrameId] {
        &self.frame_ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_display() {
        let single = MessageId::single(FrameId(7));
        assert!(!single.is_chunked());
        assert_eq!(single.to_string(), "7");

        let chunked = MessageId {
            first: FrameId(3),
            last: FrameId(5),
            chunk_count: 3,
        };
        assert!(chunked.is_chunked());
        assert_eq!(chunked.to_string(), "3..5 (3 chunks)");
    }

    #[test]
    fn test_producer_message_builder() {
        let msg = ProducerMessage::new(b"abc".to_vec())
            .key("k")
            .property("a", "1")
            .property("b", "2");
        assert_eq!(msg.key.as_deref(), Some("k"));
        assert_eq!(msg.properties.len(), 2);
        assert!(msg.event_time.is_none());
    }
}
