// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message chunking and reassembly.
//!
//! Payloads larger than the broker's maximum frame size are split into an
//! ordered chunk group and reassembled on the consumer side:
//!
//! ```text
//! payload -> ChunkSplitter -> [chunk 0..N) -> transport -> ChunkReassembler
//!                                                               |
//!                                                    ChunkContextRegistry
//!                                         (create / update / evict / expire)
//!                                                               |
//!                                                     reassembled payload
//! ```
//!
//! - **Splitting**: [`ChunkSplitter`] resolves the effective chunk size and
//!   produces frames sharing one [`ChunkGroupKey`] and one sequence id
//! - **Registry**: [`ChunkContextRegistry`] holds partial groups, bounded by
//!   capacity (oldest evicted first) and by a TTL from creation
//! - **Reassembly**: [`ChunkReassembler`] drives the per-group state machine
//!   `ABSENT -> ACCUMULATING -> {COMPLETE | DISCARDED}`
//!
//! # Example
//!
//! ```
//! use msgchunk::chunk::{ChunkContextRegistry, ChunkGroupKey, ChunkReassembler, ChunkSplitter};
//! use msgchunk::metrics::ChunkMetrics;
//! use msgchunk::transport::FrameId;
//! use msgchunk::MessageMetadata;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let splitter = ChunkSplitter::new(5).unwrap();
//! let payload: Vec<u8> = (0..50).collect();
//! let key = ChunkGroupKey::for_message("producer-a", 1);
//! let frames = splitter
//!     .split(&payload, key, MessageMetadata::new("producer-a", 1))
//!     .unwrap();
//! assert_eq!(frames.len(), 10);
//!
//! let metrics = Arc::new(ChunkMetrics::new());
//! let registry = Arc::new(ChunkContextRegistry::new(8, Duration::from_secs(60), metrics.clone()));
//! let reassembler = ChunkReassembler::new(registry, metrics, 1 << 20);
//!
//! let mut complete = None;
//! for (i, frame) in frames.into_iter().enumerate() {
//!     complete = reassembler.on_chunk(frame, FrameId(i as u64)).unwrap();
//! }
//! assert_eq!(complete.unwrap().payload(), &payload[..]);
//! ```

mod reassembler;
mod registry;
mod splitter;
mod sweeper;

pub use reassembler::ChunkReassembler;
pub use registry::{
    ChunkContextRegistry, ChunkDropListener, ChunkGroupContents, ChunkUpdate, ContextSnapshot,
    DropReason, DroppedChunkGroup,
};
pub use splitter::{resolve_chunk_size, ChunkSplitter, MAX_CHUNK_COUNT};
pub use sweeper::{spawn_expiry_sweeper, ExpirySweeperHandle};

use crate::error::{Error, Result};
use crate::message::MessageMetadata;
use std::sync::Arc;

/// Identifier shared by every chunk of one oversized payload.
///
/// Generated once per payload by the producer; equality is by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkGroupKey(Arc<str>);

impl ChunkGroupKey {
    /// Wrap an existing token.
    pub fn new(token: impl Into<Arc<str>>) -> Self {
        Self(token.into())
    }

    /// Key for a producer's message: `<producer_name>-<sequence_id>`.
    pub fn for_message(producer_name: &str, sequence_id: u64) -> Self {
        Self(Arc::from(format!("{}-{}", producer_name, sequence_id)))
    }

    /// Token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChunkGroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChunkGroupKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// One chunk of a chunk group.
///
/// Invariant: `chunk_index < chunk_count`. Only the frame with
/// `chunk_index == 0` carries message-level metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFrame {
    /// Group this chunk belongs to.
    pub group_key: ChunkGroupKey,
    /// 0-based index within the group.
    pub chunk_index: u32,
    /// Total chunks in the group.
    pub chunk_count: u32,
    /// Size of the reassembled payload.
    pub total_payload_size: usize,
    /// This chunk's slice of the payload.
    pub payload: Vec<u8>,
    /// Sequence id shared by the whole group.
    pub sequence_id: u64,
    /// Message metadata (first chunk only).
    pub metadata: Option<MessageMetadata>,
}

impl ChunkFrame {
    /// Whether this is the first chunk of its group.
    pub fn is_first(&self) -> bool {
        self.chunk_index == 0
    }

    /// Whether this is the last chunk of its group.
    pub fn is_last(&self) -> bool {
        self.chunk_index + 1 == self.chunk_count
    }

    /// Check header consistency before the frame reaches the registry.
    ///
    /// `max_total_size` bounds the reassembly buffer a first chunk may
    /// request.
    pub fn validate(&self, max_total_size: usize) -> Result<()> {
        if self.chunk_count == 0 {
            return Err(Error::InvalidFrame(format!(
                "group {} declares zero chunks",
                self.group_key
            )));
        }
        if self.chunk_index >= self.chunk_count {
            return Err(Error::InvalidFrame(format!(
                "group {} chunk index {} >= count {}",
                self.group_key, self.chunk_index, self.chunk_count
            )));
        }
        // Every chunk of a split carries at least one byte, except the
        // single chunk of an empty payload.
        if self.chunk_count as usize > self.total_payload_size.max(1) {
            return Err(Error::InvalidFrame(format!(
                "group {} declares {} chunks for {} bytes",
                self.group_key, self.chunk_count, self.total_payload_size
            )));
        }
        if self.total_payload_size > max_total_size {
            return Err(Error::InvalidFrame(format!(
                "group {} declares {} bytes, limit is {}",
                self.group_key, self.total_payload_size, max_total_size
            )));
        }
        if self.payload.len() > self.total_payload_size {
            return Err(Error::InvalidFrame(format!(
                "group {} chunk {} carries {} bytes of a {} byte payload",
                self.group_key,
                self.chunk_index,
                self.payload.len(),
                self.total_payload_size
            )));
        }
        if self.is_first() && self.metadata.is_none() {
            return Err(Error::InvalidFrame(format!(
                "group {} first chunk has no metadata",
                self.group_key
            )));
        }
        Ok(())
    }
}
