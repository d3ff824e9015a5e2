// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Consumer-side chunk reassembly.
//!
//! Per-group state machine:
//!
//! ```text
//! ABSENT --chunk 0--> ACCUMULATING --last chunk--> COMPLETE (delivered, removed)
//!   |                     |
//!   | chunk k>0           +--out of order / bad size--> DISCARDED (error)
//!   v                     +--evicted / expired--------> DISCARDED (silent)
//! dropped (orphan)
//! ```

use super::registry::{ChunkContextRegistry, ChunkUpdate, DropReason, DroppedChunkGroup};
use super::{ChunkFrame, ChunkGroupKey};
use crate::error::Result;
use crate::message::{Message, MessageId};
use crate::metrics::ChunkMetrics;
use crate::transport::FrameId;
use std::sync::Arc;
use std::time::Duration;

/// Feeds chunk frames through the registry and yields completed messages.
///
/// Safe to share between delivery threads; all state lives in the registry.
pub struct ChunkReassembler {
    registry: Arc<ChunkContextRegistry>,
    metrics: Arc<ChunkMetrics>,
    max_reassembled_size: usize,
}

impl ChunkReassembler {
    /// Create a reassembler over `registry`.
    ///
    /// First chunks declaring more than `max_reassembled_size` bytes are
    /// rejected before any buffer is allocated.
    pub fn new(
        registry: Arc<ChunkContextRegistry>,
        metrics: Arc<ChunkMetrics>,
        max_reassembled_size: usize,
    ) -> Self {
        Self {
            registry,
            metrics,
            max_reassembled_size,
        }
    }

    /// Registry backing this reassembler.
    pub fn registry(&self) -> &Arc<ChunkContextRegistry> {
        &self.registry
    }

    /// Process one chunk.
    ///
    /// Returns `Ok(Some(message))` when `frame` completes its group,
    /// `Ok(None)` while the group is still accumulating or when the chunk was
    /// dropped (orphan, group evicted or expired).
    ///
    /// # Errors
    ///
    /// - `InvalidFrame` for inconsistent chunk headers or sizes
    /// - `CorruptChunkSequence` for a chunk that is not the next expected index
    ///
    /// In both cases the group, if live, is discarded and never delivered.
    pub fn on_chunk(&self, mut frame: ChunkFrame, frame_id: FrameId) -> Result<Option<Message>> {
        self.metrics.record_chunk_received();

        if let Err(e) = frame.validate(self.max_reassembled_size) {
            self.metrics.record_invalid_frame();
            log::warn!("[chunk-reasm] rejected frame {}: {}", frame_id, e);
            self.registry
                .discard(&frame.group_key, DropReason::Corrupt, Some(frame_id));
            return Err(e);
        }

        let key = frame.group_key.clone();
        if frame.is_first() {
            if let Some(metadata) = frame.metadata.take() {
                self.registry.add_if_absent(
                    &key,
                    frame.chunk_count,
                    frame.total_payload_size,
                    metadata,
                );
            }
        }

        match self
            .registry
            .update(&key, frame.chunk_index, &frame.payload, frame_id)
        {
            Ok(ChunkUpdate::Absent) => {
                log::debug!(
                    "[chunk-reasm] orphan chunk {}/{} for group={} (frame {})",
                    frame.chunk_index,
                    frame.chunk_count,
                    key,
                    frame_id
                );
                self.registry.report(vec![DroppedChunkGroup {
                    key,
                    reason: DropReason::Orphaned,
                    chunks_received: 0,
                    chunk_count: frame.chunk_count,
                    frame_ids: vec![frame_id],
                    age: Duration::ZERO,
                }]);
                Ok(None)
            }
            Ok(ChunkUpdate::Accumulating { .. }) => Ok(None),
            Ok(ChunkUpdate::Complete) => Ok(self.complete(&key)),
            Err(e) => {
                log::warn!("[chunk-reasm] discarding group={}: {}", key, e);
                self.registry
                    .discard(&key, DropReason::Corrupt, Some(frame_id));
                Err(e)
            }
        }
    }

    fn complete(&self, key: &ChunkGroupKey) -> Option<Message> {
        let contents = self.registry.remove(key)?;
        let first = *contents.frame_ids.first()?;
        let last = *contents.frame_ids.last()?;

        self.metrics
            .record_message_reassembled(contents.payload.len());
        log::debug!(
            "[chunk-reasm] group={} complete: {} bytes in {} chunks",
            key,
            contents.payload.len(),
            contents.chunk_count
        );

        Some(Message {
            id: MessageId {
                first,
                last,
                chunk_count: contents.chunk_count,
            },
            payload: contents.payload,
            metadata: contents.metadata,
            frame_ids: contents.frame_ids,
        })
    }
}

impl std::fmt::Debug for ChunkReassembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkReassembler")
            .field("registry", &self.registry)
            .field("max_reassembled_size", &self.max_reassembled_size)
            .finish()
    }
}
