// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Chunking counters.
//!
//! Eviction and expiry are silent at the API level; these counters are how
//! an operator sees them.
//!
//! # Thread Safety
//!
//! All methods use atomic operations (Relaxed ordering) for lock-free updates.
//! A snapshot is not atomic across counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Producer- and consumer-side chunking counters.
#[derive(Debug, Default)]
pub struct ChunkMetrics {
    /// Payloads sent as more than one chunk
    chunked_messages_sent: AtomicU64,
    /// Chunk frames handed to the transport
    chunks_sent: AtomicU64,
    /// Sends that failed part-way or before the first frame
    send_failures: AtomicU64,

    /// Chunk frames received
    chunks_received: AtomicU64,
    /// Chunk groups delivered
    messages_reassembled: AtomicU64,
    /// Bytes delivered from chunk groups
    bytes_reassembled: AtomicU64,

    groups_evicted: AtomicU64,
    groups_expired: AtomicU64,
    groups_corrupt: AtomicU64,
    orphan_chunks: AtomicU64,
    invalid_frames: AtomicU64,
}

/// Point-in-time copy of [`ChunkMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkMetricsSnapshot {
    pub chunked_messages_sent: u64,
    pub chunks_sent: u64,
    pub send_failures: u64,
    pub chunks_received: u64,
    pub messages_reassembled: u64,
    pub bytes_reassembled: u64,
    pub groups_evicted: u64,
    pub groups_expired: u64,
    pub groups_corrupt: u64,
    pub orphan_chunks: u64,
    pub invalid_frames: u64,
}

impl ChunkMetricsSnapshot {
    /// Groups lost for any reason (eviction, expiry, corruption).
    pub fn groups_dropped(&self) -> u64 {
        self.groups_evicted + self.groups_expired + self.groups_corrupt
    }
}

impl ChunkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A payload went out as `chunks` frames.
    pub fn record_chunked_send(&self, chunks: u64) {
        self.chunked_messages_sent.fetch_add(1, Ordering::Relaxed);
        self.chunks_sent.fetch_add(chunks, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk_received(&self) {
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_reassembled(&self, bytes: usize) {
        self.messages_reassembled.fetch_add(1, Ordering::Relaxed);
        self.bytes_reassembled
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_group_evicted(&self) {
        self.groups_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_group_expired(&self) {
        self.groups_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_group_corrupt(&self) {
        self.groups_corrupt.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_orphan_chunk(&self) {
        self.orphan_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid_frame(&self) {
        self.invalid_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Load every counter.
    pub fn snapshot(&self) -> ChunkMetricsSnapshot {
        ChunkMetricsSnapshot {
            chunked_messages_sent: self.chunked_messages_sent.load(Ordering::Relaxed),
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            messages_reassembled: self.messages_reassembled.load(Ordering::Relaxed),
            bytes_reassembled: self.bytes_reassembled.load(Ordering::Relaxed),
            groups_evicted: self.groups_evicted.load(Ordering::Relaxed),
            groups_expired: self.groups_expired.load(Ordering::Relaxed),
            groups_corrupt: self.groups_corrupt.load(Ordering::Relaxed),
            orphan_chunks: self.orphan_chunks.load(Ordering::Relaxed),
            invalid_frames: self.invalid_frames.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter.
    pub fn reset(&self) {
        for counter in [
            &self.chunked_messages_sent,
            &self.chunks_sent,
            &self.send_failures,
            &self.chunks_received,
            &self.messages_reassembled,
            &self.bytes_reassembled,
            &self.groups_evicted,
            &self.groups_expired,
            &self.groups_corrupt,
            &self.orphan_chunks,
            &self.invalid_frames,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
