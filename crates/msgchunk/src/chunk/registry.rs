// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded registry of partially received chunk groups.
//!
//! Holds one reassembly context per chunk group and enforces two memory
//! bounds:
//!
//! - **Capacity**: at most `capacity` live contexts. Admitting a new group
//!   when full evicts the oldest one (by creation order), discarding its
//!   bytes even if it was one chunk away from completion.
//! - **TTL**: a context older than `ttl` (measured from creation, not renewed
//!   by progress) is removed the first time a lookup, update or sweep
//!   observes it.
//!
//! Evicted and expired groups are lost by design. They are counted in
//! [`ChunkMetrics`] and reported to the optional [`ChunkDropListener`], which
//! runs after the registry lock is released.
//!
//! # Structure
//!
//! ```text
//! contexts: HashMap<ChunkGroupKey, Context{serial, ...}>
//! order:    BTreeMap<serial, ChunkGroupKey>   (oldest first)
//! ```
//!
//! Both live behind one mutex; the map is never exposed.

use super::ChunkGroupKey;
use crate::error::{Error, Result};
use crate::message::MessageMetadata;
use crate::metrics::ChunkMetrics;
use crate::transport::FrameId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound on the payload buffer reserved when a group is created.
/// Larger groups grow as chunks arrive.
pub(crate) const INITIAL_BUFFER_RESERVE: usize = 1024 * 1024;

/// Upper bound on the frame id list reserved when a group is created.
pub(crate) const INITIAL_FRAME_ID_RESERVE: usize = 1024;

/// Upper bound on the context map reserved up front.
const INITIAL_CONTEXT_RESERVE: usize = 1024;

/// Why a chunk group was dropped before completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Oldest group removed to admit a new one at capacity.
    Evicted,
    /// Group outlived the TTL.
    Expired,
    /// Chunk sequence violated ordering or size invariants.
    Corrupt,
    /// Non-first chunk for a group that does not exist here.
    Orphaned,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::Evicted => write!(f, "evicted"),
            DropReason::Expired => write!(f, "expired"),
            DropReason::Corrupt => write!(f, "corrupt"),
            DropReason::Orphaned => write!(f, "orphaned"),
        }
    }
}

/// Record of a chunk group dropped before completion.
#[derive(Debug, Clone)]
pub struct DroppedChunkGroup {
    /// Group key.
    pub key: ChunkGroupKey,
    /// Drop cause.
    pub reason: DropReason,
    /// Chunks accumulated before the drop.
    pub chunks_received: u32,
    /// Chunks the group declared.
    pub chunk_count: u32,
    /// Transport ids of the received chunks, in arrival order.
    pub frame_ids: Vec<FrameId>,
    /// Time since the group was created.
    pub age: Duration,
}

/// Observability hook for dropped chunk groups.
///
/// Called outside the registry lock; implementations may call back into the
/// registry.
pub trait ChunkDropListener: Send + Sync {
    /// A group was dropped and will never be delivered.
    fn on_chunk_group_dropped(&self, group: &DroppedChunkGroup);
}

/// Read-only view of a live context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSnapshot {
    /// Chunks the group declared.
    pub chunk_count: u32,
    /// Chunks accumulated so far.
    pub chunks_received: u32,
    /// Declared reassembled size.
    pub total_payload_size: usize,
    /// Bytes accumulated so far.
    pub received_bytes: usize,
    /// Time since creation.
    pub age: Duration,
}

/// Result of [`ChunkContextRegistry::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkUpdate {
    /// No live context (never created, completed, evicted or expired).
    Absent,
    /// Chunk stored, group still incomplete.
    Accumulating {
        /// Chunks received including this one.
        received: u32,
        /// Chunks the group declared.
        total: u32,
    },
    /// Chunk stored and the group is complete.
    Complete,
}

/// Accumulated state taken out of the registry by [`ChunkContextRegistry::remove`].
#[derive(Debug, Clone)]
pub struct ChunkGroupContents {
    /// Group key.
    pub key: ChunkGroupKey,
    /// Accumulated bytes (the full payload once complete).
    pub payload: Vec<u8>,
    /// Metadata captured from chunk 0.
    pub metadata: MessageMetadata,
    /// Transport ids of every received chunk, in order.
    pub frame_ids: Vec<FrameId>,
    /// Chunks received.
    pub chunks_received: u32,
    /// Chunks the group declared.
    pub chunk_count: u32,
}

impl ChunkGroupContents {
    /// Whether every declared chunk was received.
    pub fn is_complete(&self) -> bool {
        self.chunks_received == self.chunk_count
    }
}

/// Reassembly state for one chunk group.
#[derive(Debug)]
struct PartialMessageContext {
    /// Position in creation order.
    serial: u64,
    chunk_count: u32,
    total_payload_size: usize,
    /// Reserved up to `INITIAL_BUFFER_RESERVE`, grows with each chunk.
    buffer: Vec<u8>,
    chunks_received: u32,
    created_at: Instant,
    frame_ids: Vec<FrameId>,
    metadata: MessageMetadata,
}

impl PartialMessageContext {
    fn is_complete(&self) -> bool {
        self.chunks_received == self.chunk_count
    }

    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.created_at) > ttl
    }

    fn into_dropped(self, key: ChunkGroupKey, reason: DropReason, now: Instant) -> DroppedChunkGroup {
        DroppedChunkGroup {
            key,
            reason,
            chunks_received: self.chunks_received,
            chunk_count: self.chunk_count,
            frame_ids: self.frame_ids,
            age: now.saturating_duration_since(self.created_at),
        }
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    contexts: HashMap<ChunkGroupKey, PartialMessageContext>,
    order: BTreeMap<u64, ChunkGroupKey>,
    next_serial: u64,
}

impl RegistryInner {
    fn remove(&mut self, key: &ChunkGroupKey) -> Option<PartialMessageContext> {
        let ctx = self.contexts.remove(key)?;
        self.order.remove(&ctx.serial);
        Some(ctx)
    }

    /// Remove `key` if it is live but older than `ttl`.
    ///
    /// Returns true when the key is absent afterwards.
    fn expire_key(
        &mut self,
        key: &ChunkGroupKey,
        now: Instant,
        ttl: Duration,
        dropped: &mut Vec<DroppedChunkGroup>,
    ) -> bool {
        match self.contexts.get(key) {
            None => true,
            Some(ctx) if ctx.is_expired(now, ttl) => {
                if let Some(ctx) = self.remove(key) {
                    dropped.push(ctx.into_dropped(key.clone(), DropReason::Expired, now));
                }
                true
            }
            Some(_) => false,
        }
    }

    /// Remove every expired incomplete context.
    ///
    /// Creation order is age order, so the scan stops at the first live
    /// context. Complete contexts awaiting removal are left alone.
    fn expire_oldest(&mut self, now: Instant, ttl: Duration, dropped: &mut Vec<DroppedChunkGroup>) {
        let mut expired = Vec::new();
        for key in self.order.values() {
            let Some(ctx) = self.contexts.get(key) else {
                continue;
            };
            if !ctx.is_expired(now, ttl) {
                break;
            }
            if !ctx.is_complete() {
                expired.push(key.clone());
            }
        }
        for key in expired {
            if let Some(ctx) = self.remove(&key) {
                dropped.push(ctx.into_dropped(key, DropReason::Expired, now));
            }
        }
    }

    fn evict_oldest(&mut self, now: Instant, dropped: &mut Vec<DroppedChunkGroup>) {
        if let Some((_, key)) = self.order.pop_first() {
            if let Some(ctx) = self.contexts.remove(&key) {
                dropped.push(ctx.into_dropped(key, DropReason::Evicted, now));
            }
        }
    }
}

/// Bounded, thread-safe registry of partial chunk groups.
///
/// Operations: [`add_if_absent`](Self::add_if_absent), [`get`](Self::get),
/// [`update`](Self::update), [`remove`](Self::remove), plus
/// [`sweep_expired`](Self::sweep_expired) for the background sweeper.
pub struct ChunkContextRegistry {
    inner: Mutex<RegistryInner>,
    capacity: usize,
    ttl: Duration,
    metrics: Arc<ChunkMetrics>,
    listener: Option<Arc<dyn ChunkDropListener>>,
}

impl ChunkContextRegistry {
    /// Create a registry holding at most `capacity` groups for at most `ttl` each.
    ///
    /// A capacity of 0 is raised to 1.
    pub fn new(capacity: usize, ttl: Duration, metrics: Arc<ChunkMetrics>) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(RegistryInner {
                contexts: HashMap::with_capacity(capacity.min(INITIAL_CONTEXT_RESERVE)),
                order: BTreeMap::new(),
                next_serial: 0,
            }),
            capacity,
            ttl,
            metrics,
            listener: None,
        }
    }

    /// Attach a drop listener.
    pub fn with_drop_listener(mut self, listener: Arc<dyn ChunkDropListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Maximum number of live groups.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Time-to-live of a group.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of live groups (expired ones count until observed).
    pub fn len(&self) -> usize {
        self.inner.lock().contexts.len()
    }

    /// Whether no group is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create a context for `key` unless one is already live.
    ///
    /// At capacity, the oldest group is evicted first. Returns `true` when a
    /// context was created.
    pub fn add_if_absent(
        &self,
        key: &ChunkGroupKey,
        chunk_count: u32,
        total_payload_size: usize,
        metadata: MessageMetadata,
    ) -> bool {
        let now = Instant::now();
        let mut dropped = Vec::new();

        let created = {
            let mut inner = self.inner.lock();
            if !inner.expire_key(key, now, self.ttl, &mut dropped) {
                false
            } else {
                inner.expire_oldest(now, self.ttl, &mut dropped);
                while inner.contexts.len() >= self.capacity {
                    inner.evict_oldest(now, &mut dropped);
                }

                let serial = inner.next_serial;
                inner.next_serial += 1;
                inner.order.insert(serial, key.clone());
                inner.contexts.insert(
                    key.clone(),
                    PartialMessageContext {
                        serial,
                        chunk_count,
                        total_payload_size,
                        buffer: Vec::with_capacity(
                            total_payload_size.min(INITIAL_BUFFER_RESERVE),
                        ),
                        chunks_received: 0,
                        created_at: now,
                        frame_ids: Vec::with_capacity(
                            (chunk_count as usize).min(INITIAL_FRAME_ID_RESERVE),
                        ),
                        metadata,
                    },
                );
                true
            }
        };

        if created {
            log::debug!(
                "[chunk-registry] created group={} chunks={} size={}",
                key,
                chunk_count,
                total_payload_size
            );
        }
        self.report(dropped);
        created
    }

    /// Look up the live context for `key`.
    ///
    /// An expired context is removed and reported absent.
    pub fn get(&self, key: &ChunkGroupKey) -> Option<ContextSnapshot> {
        let now = Instant::now();
        let mut dropped = Vec::new();

        let snapshot = {
            let mut inner = self.inner.lock();
            if inner.expire_key(key, now, self.ttl, &mut dropped) {
                None
            } else {
                inner.contexts.get(key).map(|ctx| ContextSnapshot {
                    chunk_count: ctx.chunk_count,
                    chunks_received: ctx.chunks_received,
                    total_payload_size: ctx.total_payload_size,
                    received_bytes: ctx.buffer.len(),
                    age: now.saturating_duration_since(ctx.created_at),
                })
            }
        };

        self.report(dropped);
        snapshot
    }

    /// Append chunk `chunk_index` to the group's buffer.
    ///
    /// Chunks must arrive in increasing order without gaps. Completion is
    /// decided under the same lock as the counter increment, so it is
    /// reported exactly once.
    ///
    /// # Errors
    ///
    /// - `CorruptChunkSequence` when `chunk_index` is not the next expected index
    /// - `InvalidFrame` when the bytes overflow or underfill the declared size
    ///
    /// The context is left in place on error; the caller discards it.
    pub fn update(
        &self,
        key: &ChunkGroupKey,
        chunk_index: u32,
        chunk_payload: &[u8],
        frame_id: FrameId,
    ) -> Result<ChunkUpdate> {
        let now = Instant::now();
        let mut dropped = Vec::new();

        let outcome = {
            let mut inner = self.inner.lock();
            if inner.expire_key(key, now, self.ttl, &mut dropped) {
                Ok(ChunkUpdate::Absent)
            } else if let Some(ctx) = inner.contexts.get_mut(key) {
                Self::append(key, ctx, chunk_index, chunk_payload, frame_id)
            } else {
                Ok(ChunkUpdate::Absent)
            }
        };

        self.report(dropped);
        outcome
    }

    fn append(
        key: &ChunkGroupKey,
        ctx: &mut PartialMessageContext,
        chunk_index: u32,
        chunk_payload: &[u8],
        frame_id: FrameId,
    ) -> Result<ChunkUpdate> {
        if chunk_index != ctx.chunks_received {
            return Err(Error::CorruptChunkSequence {
                group: key.to_string(),
                expected: ctx.chunks_received,
                got: chunk_index,
            });
        }

        let new_len = ctx.buffer.len() + chunk_payload.len();
        if new_len > ctx.total_payload_size {
            return Err(Error::InvalidFrame(format!(
                "group {} chunk {} overflows declared size {} ({} bytes)",
                key, chunk_index, ctx.total_payload_size, new_len
            )));
        }

        if new_len > ctx.buffer.capacity() {
            // Double, but never past the declared size.
            let target = (ctx.buffer.capacity() * 2)
                .max(new_len)
                .min(ctx.total_payload_size);
            ctx.buffer.reserve_exact(target - ctx.buffer.len());
        }
        ctx.buffer.extend_from_slice(chunk_payload);
        ctx.frame_ids.push(frame_id);
        ctx.chunks_received += 1;

        if !ctx.is_complete() {
            return Ok(ChunkUpdate::Accumulating {
                received: ctx.chunks_received,
                total: ctx.chunk_count,
            });
        }

        if ctx.buffer.len() != ctx.total_payload_size {
            return Err(Error::InvalidFrame(format!(
                "group {} completed with {} of {} bytes",
                key,
                ctx.buffer.len(),
                ctx.total_payload_size
            )));
        }
        Ok(ChunkUpdate::Complete)
    }

    /// Delete the context for `key` unconditionally, returning its contents.
    pub fn remove(&self, key: &ChunkGroupKey) -> Option<ChunkGroupContents> {
        let ctx = self.inner.lock().remove(key)?;
        Some(ChunkGroupContents {
            key: key.clone(),
            payload: ctx.buffer,
            metadata: ctx.metadata,
            frame_ids: ctx.frame_ids,
            chunks_received: ctx.chunks_received,
            chunk_count: ctx.chunk_count,
        })
    }

    /// Remove every expired context. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut dropped = Vec::new();
        self.inner.lock().expire_oldest(now, self.ttl, &mut dropped);

        let count = dropped.len();
        if count > 0 {
            log::debug!("[chunk-registry] sweep expired {} groups", count);
        }
        self.report(dropped);
        count
    }

    /// Drop every context without reporting (consumer shutdown).
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.contexts.clear();
        inner.order.clear();
    }

    /// Remove `key` as a dropped group with the given reason.
    ///
    /// `trigger` is the frame that caused the drop, if it was not stored.
    pub(crate) fn discard(
        &self,
        key: &ChunkGroupKey,
        reason: DropReason,
        trigger: Option<FrameId>,
    ) -> bool {
        let now = Instant::now();
        let Some(ctx) = self.inner.lock().remove(key) else {
            return false;
        };
        let mut dropped = ctx.into_dropped(key.clone(), reason, now);
        dropped.frame_ids.extend(trigger);
        self.report(vec![dropped]);
        true
    }

    /// Count, log and publish dropped groups. Must run without the lock held.
    pub(crate) fn report(&self, dropped: Vec<DroppedChunkGroup>) {
        for group in dropped {
            match group.reason {
                DropReason::Evicted => {
                    self.metrics.record_group_evicted();
                    log::warn!(
                        "[chunk-registry] evicted group={} at capacity {} ({}/{} chunks, age={:?})",
                        group.key,
                        self.capacity,
                        group.chunks_received,
                        group.chunk_count,
                        group.age
                    );
                }
                DropReason::Expired => {
                    self.metrics.record_group_expired();
                    log::debug!(
                        "[chunk-registry] expired group={} ({}/{} chunks, age={:?})",
                        group.key,
                        group.chunks_received,
                        group.chunk_count,
                        group.age
                    );
                }
                DropReason::Corrupt => self.metrics.record_group_corrupt(),
                DropReason::Orphaned => self.metrics.record_orphan_chunk(),
            }
            if let Some(listener) = &self.listener {
                listener.on_chunk_group_dropped(&group);
            }
        }
    }
}

impl std::fmt::Debug for ChunkContextRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkContextRegistry")
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .field("live", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn registry(capacity: usize, ttl_ms: u64) -> ChunkContextRegistry {
        ChunkContextRegistry::new(
            capacity,
            Duration::from_millis(ttl_ms),
            Arc::new(ChunkMetrics::new()),
        )
    }

    fn meta() -> MessageMetadata {
        MessageMetadata::new("p", 1)
    }

    fn key(s: &str) -> ChunkGroupKey {
        ChunkGroupKey::from(s)
    }

    #[derive(Default)]
    struct Recorder(parking_lot::Mutex<Vec<(String, DropReason)>>);

    impl ChunkDropListener for Recorder {
        fn on_chunk_group_dropped(&self, group: &DroppedChunkGroup) {
            self.0.lock().push((group.key.to_string(), group.reason));
        }
    }

    #[test]
    fn test_add_if_absent_creates_once() {
        let reg = registry(4, 10_000);
        assert!(reg.add_if_absent(&key("a"), 2, 10, meta()));
        assert!(!reg.add_if_absent(&key("a"), 2, 10, meta()));
        assert_eq!(reg.len(), 1);

        let snap = reg.get(&key("a")).expect("live context");
        assert_eq!(snap.chunk_count, 2);
        assert_eq!(snap.chunks_received, 0);
        assert_eq!(snap.total_payload_size, 10);
    }

    #[test]
    fn test_update_in_order_completes() {
        let reg = registry(4, 10_000);
        reg.add_if_absent(&key("a"), 3, 7, meta());

        assert_eq!(
            reg.update(&key("a"), 0, &[1, 2, 3], FrameId(10)).unwrap(),
            ChunkUpdate::Accumulating { received: 1, total: 3 }
        );
        assert_eq!(
            reg.update(&key("a"), 1, &[4, 5, 6], FrameId(11)).unwrap(),
            ChunkUpdate::Accumulating { received: 2, total: 3 }
        );
        assert_eq!(
            reg.update(&key("a"), 2, &[7], FrameId(12)).unwrap(),
            ChunkUpdate::Complete
        );

        let contents = reg.remove(&key("a")).expect("contents");
        assert!(contents.is_complete());
        assert_eq!(contents.payload, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(contents.frame_ids, vec![FrameId(10), FrameId(11), FrameId(12)]);
        assert!(reg.get(&key("a")).is_none());
    }

    #[test]
    fn test_update_absent_is_noop() {
        let reg = registry(4, 10_000);
        assert_eq!(
            reg.update(&key("missing"), 1, &[0], FrameId(1)).unwrap(),
            ChunkUpdate::Absent
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn test_update_out_of_order_is_corrupt() {
        let reg = registry(4, 10_000);
        reg.add_if_absent(&key("a"), 3, 9, meta());
        reg.update(&key("a"), 0, &[0; 3], FrameId(1)).unwrap();

        let err = reg.update(&key("a"), 2, &[0; 3], FrameId(2)).unwrap_err();
        assert!(matches!(
            err,
            Error::CorruptChunkSequence { expected: 1, got: 2, .. }
        ));

        let err = reg.update(&key("a"), 0, &[0; 3], FrameId(3)).unwrap_err();
        assert!(matches!(err, Error::CorruptChunkSequence { .. }));
    }

    #[test]
    fn test_update_overflow_rejected() {
        let reg = registry(4, 10_000);
        reg.add_if_absent(&key("a"), 2, 4, meta());
        reg.update(&key("a"), 0, &[0; 3], FrameId(1)).unwrap();
        let err = reg.update(&key("a"), 1, &[0; 3], FrameId(2)).unwrap_err();
        assert!(matches!(err, Error::InvalidFrame(_)));
    }

    #[test]
    fn test_update_underfill_rejected() {
        let reg = registry(4, 10_000);
        reg.add_if_absent(&key("a"), 2, 10, meta());
        reg.update(&key("a"), 0, &[0; 3], FrameId(1)).unwrap();
        let err = reg.update(&key("a"), 1, &[0; 3], FrameId(2)).unwrap_err();
        assert!(matches!(err, Error::InvalidFrame(_)));
    }

    #[test]
    fn test_create_reserves_bounded_memory() {
        let reg = registry(4, 10_000);
        reg.add_if_absent(&key("huge"), u32::MAX, 64 << 20, meta());
        {
            let inner = reg.inner.lock();
            let ctx = inner.contexts.get(&key("huge")).expect("live context");
            assert!(ctx.buffer.capacity() <= INITIAL_BUFFER_RESERVE);
            assert!(ctx.frame_ids.capacity() <= INITIAL_FRAME_ID_RESERVE);
        }

        // A group larger than the initial reserve grows up to its declared size.
        let total = 3 * INITIAL_BUFFER_RESERVE + 5;
        let payload: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();
        let chunks: Vec<&[u8]> = payload.chunks(INITIAL_BUFFER_RESERVE).collect();
        reg.add_if_absent(&key("big"), chunks.len() as u32, total, meta());
        for (i, c) in chunks.iter().enumerate() {
            reg.update(&key("big"), i as u32, c, FrameId(i as u64)).unwrap();
        }
        let contents = reg.remove(&key("big")).expect("complete");
        assert_eq!(contents.payload, payload);
        assert!(contents.payload.capacity() <= total);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let listener = Arc::new(Recorder::default());
        let metrics = Arc::new(ChunkMetrics::new());
        let reg = ChunkContextRegistry::new(2, Duration::from_secs(10), metrics.clone())
            .with_drop_listener(listener.clone());

        reg.add_if_absent(&key("a"), 2, 10, meta());
        reg.add_if_absent(&key("b"), 2, 10, meta());
        reg.update(&key("a"), 0, &[0; 5], FrameId(1)).unwrap();
        reg.add_if_absent(&key("c"), 2, 10, meta());

        assert_eq!(reg.len(), 2);
        assert!(reg.get(&key("a")).is_none(), "oldest by creation is evicted");
        assert!(reg.get(&key("b")).is_some());
        assert!(reg.get(&key("c")).is_some());
        assert_eq!(metrics.snapshot().groups_evicted, 1);
        assert_eq!(
            listener.0.lock().as_slice(),
            &[("a".to_string(), DropReason::Evicted)]
        );
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let reg = registry(3, 10_000);
        for i in 0..50 {
            reg.add_if_absent(&key(&format!("g{}", i)), 2, 10, meta());
            assert!(reg.len() <= 3);
        }
        assert!(reg.get(&key("g49")).is_some());
        assert!(reg.get(&key("g46")).is_none());
    }

    #[test]
    fn test_completed_group_frees_slot_without_eviction() {
        let metrics = Arc::new(ChunkMetrics::new());
        let reg = ChunkContextRegistry::new(1, Duration::from_secs(10), metrics.clone());

        reg.add_if_absent(&key("a"), 1, 2, meta());
        assert_eq!(reg.update(&key("a"), 0, &[1, 2], FrameId(1)).unwrap(), ChunkUpdate::Complete);
        reg.remove(&key("a"));

        reg.add_if_absent(&key("b"), 1, 2, meta());
        assert_eq!(metrics.snapshot().groups_evicted, 0);
    }

    #[test]
    fn test_ttl_lazy_expiry_on_get() {
        let metrics = Arc::new(ChunkMetrics::new());
        let reg = ChunkContextRegistry::new(4, Duration::from_millis(300), metrics.clone());
        reg.add_if_absent(&key("test-uuid"), 2, 100, meta());
        assert!(reg.get(&key("test-uuid")).is_some());

        thread::sleep(Duration::from_millis(400));

        assert!(reg.get(&key("test-uuid")).is_none());
        assert!(reg.is_empty());
        assert_eq!(metrics.snapshot().groups_expired, 1);
    }

    #[test]
    fn test_ttl_reachable_before_deadline() {
        let reg = registry(4, 500);
        reg.add_if_absent(&key("a"), 2, 100, meta());
        thread::sleep(Duration::from_millis(100));
        assert!(reg.get(&key("a")).is_some());
    }

    #[test]
    fn test_ttl_not_renewed_by_progress() {
        let reg = registry(4, 300);
        reg.add_if_absent(&key("a"), 3, 30, meta());
        thread::sleep(Duration::from_millis(200));
        reg.update(&key("a"), 0, &[0; 10], FrameId(1)).unwrap();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(
            reg.update(&key("a"), 1, &[0; 10], FrameId(2)).unwrap(),
            ChunkUpdate::Absent
        );
    }

    #[test]
    fn test_sweep_expired() {
        let reg = registry(8, 100);
        reg.add_if_absent(&key("a"), 2, 10, meta());
        reg.add_if_absent(&key("b"), 2, 10, meta());
        thread::sleep(Duration::from_millis(150));
        reg.add_if_absent(&key("c"), 2, 10, meta());

        assert_eq!(reg.sweep_expired(), 0, "add_if_absent already expired a and b");
        assert_eq!(reg.len(), 1);

        thread::sleep(Duration::from_millis(150));
        assert_eq!(reg.sweep_expired(), 1);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_sweep_skips_complete_awaiting_removal() {
        let reg = registry(8, 50);
        reg.add_if_absent(&key("a"), 1, 1, meta());
        reg.update(&key("a"), 0, &[9], FrameId(1)).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(reg.sweep_expired(), 0);
        assert!(reg.remove(&key("a")).is_some());
    }

    #[test]
    fn test_discard_reports_reason() {
        let listener = Arc::new(Recorder::default());
        let metrics = Arc::new(ChunkMetrics::new());
        let reg = ChunkContextRegistry::new(4, Duration::from_secs(10), metrics.clone())
            .with_drop_listener(listener.clone());

        reg.add_if_absent(&key("a"), 2, 10, meta());
        assert!(reg.discard(&key("a"), DropReason::Corrupt, Some(FrameId(9))));
        assert!(!reg.discard(&key("a"), DropReason::Corrupt, None));
        assert_eq!(metrics.snapshot().groups_corrupt, 1);
        assert_eq!(listener.0.lock()[0].1, DropReason::Corrupt);
    }

    #[test]
    fn test_concurrent_add_respects_capacity() {
        let reg = Arc::new(registry(16, 10_000));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let reg = reg.clone();
                thread::spawn(move || {
                    for i in 0..200 {
                        let k = key(&format!("t{}-{}", t, i));
                        reg.add_if_absent(&k, 2, 4, MessageMetadata::new("p", i));
                        let _ = reg.update(&k, 0, &[0, 1], FrameId(i));
                        assert!(reg.len() <= 16);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("worker panicked");
        }
        assert!(reg.len() <= 16);
    }
}
