// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Producer-side chunk splitting.

use super::{ChunkFrame, ChunkGroupKey};
use crate::error::{Error, Result};
use crate::message::MessageMetadata;

/// Largest chunk count a frame header can carry.
pub const MAX_CHUNK_COUNT: usize = u32::MAX as usize;

/// Resolve the effective chunk payload size.
///
/// The server budget is the advertised maximum frame size minus the fixed
/// metadata overhead; a user-configured size can only lower it.
///
/// # Errors
///
/// `InvalidChunkSize` when the result is zero (e.g. a configured size of 0,
/// or a server maximum no larger than the overhead).
pub fn resolve_chunk_size(
    configured: Option<usize>,
    server_max: usize,
    overhead: usize,
) -> Result<usize> {
    let server_budget = server_max.saturating_sub(overhead);
    let effective = configured.map_or(server_budget, |c| c.min(server_budget));
    if effective == 0 {
        return Err(Error::InvalidChunkSize {
            configured,
            server_max,
            overhead,
        });
    }
    Ok(effective)
}

/// Splits payloads into ordered chunk frames of at most `max_chunk_payload` bytes.
///
/// Stateless apart from the chunk size, so one splitter can serve any number
/// of concurrent senders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSplitter {
    max_chunk_payload: usize,
}

impl ChunkSplitter {
    /// Create a splitter with an already-resolved chunk size.
    pub fn new(max_chunk_payload: usize) -> Result<Self> {
        if max_chunk_payload == 0 {
            return Err(Error::InvalidChunkSize {
                configured: Some(0),
                server_max: 0,
                overhead: 0,
            });
        }
        Ok(Self { max_chunk_payload })
    }

    /// Create a splitter from a user override and the transport limit.
    pub fn resolve(configured: Option<usize>, server_max: usize, overhead: usize) -> Result<Self> {
        resolve_chunk_size(configured, server_max, overhead).map(|max_chunk_payload| Self {
            max_chunk_payload,
        })
    }

    /// Maximum payload bytes per chunk.
    pub fn max_payload(&self) -> usize {
        self.max_chunk_payload
    }

    /// Whether a payload of `len` bytes needs more than one chunk.
    pub fn needs_chunking(&self, len: usize) -> bool {
        len > self.max_chunk_payload
    }

    /// Number of chunks for a payload of `len` bytes: `ceil(len / M)`, at least 1.
    pub fn chunk_count(&self, len: usize) -> usize {
        len.div_ceil(self.max_chunk_payload).max(1)
    }

    /// Split `payload` into a chunk group.
    ///
    /// Every frame carries `group_key`, the chunk count, the total size and
    /// the metadata's sequence id; only chunk 0 carries `metadata`. All chunks
    /// are `max_payload()` bytes except possibly the last. An empty payload
    /// yields a single empty chunk.
    pub fn split(
        &self,
        payload: &[u8],
        group_key: ChunkGroupKey,
        metadata: MessageMetadata,
    ) -> Result<Vec<ChunkFrame>> {
        let chunk_count = self.chunk_count(payload.len());
        if chunk_count > MAX_CHUNK_COUNT {
            return Err(Error::TooManyChunks {
                chunks: chunk_count,
                max: MAX_CHUNK_COUNT,
            });
        }

        let sequence_id = metadata.sequence_id;
        let total = payload.len();
        let count = chunk_count as u32;
        let mut metadata = Some(metadata);

        let mut frames = Vec::with_capacity(chunk_count);
        let mut slices = payload.chunks(self.max_chunk_payload);
        for chunk_index in 0..count {
            let data = slices.next().unwrap_or(&[]);
            frames.push(ChunkFrame {
                group_key: group_key.clone(),
                chunk_index,
                chunk_count: count,
                total_payload_size: total,
                payload: data.to_vec(),
                sequence_id,
                metadata: metadata.take(),
            });
        }

        log::debug!(
            "[chunk-split] group={} seq={} {} bytes -> {} chunks of <= {} bytes",
            group_key,
            sequence_id,
            total,
            chunk_count,
            self.max_chunk_payload
        );

        Ok(frames)
    }
}
