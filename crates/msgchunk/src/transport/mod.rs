// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport seams.
//!
//! The chunking layer never opens connections itself. It talks to the
//! transport through three narrow traits:
//!
//! | Trait | Direction | Used by |
//! |-------|-----------|---------|
//! | [`FrameSink`] | producer -> broker | [`Producer`](crate::Producer) |
//! | [`FrameHandler`] | broker -> consumer | [`Consumer`](crate::Consumer) |
//! | [`AckSink`] | consumer -> broker | [`Consumer`](crate::Consumer) |
//!
//! [`LoopbackBroker`] implements all of them in memory.

pub mod loopback;

pub use loopback::{DispatcherHandle, LoopbackBroker, ProducerLink};

use crate::chunk::ChunkFrame;
use crate::error::Result;
use crate::message::MessageMetadata;

/// Transport-assigned identifier of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u64);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message small enough to travel in one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFrame {
    /// Full message payload.
    pub payload: Vec<u8>,
    /// Message-level metadata.
    pub metadata: MessageMetadata,
}

/// Unit handed to and delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Whole message.
    Whole(MessageFrame),
    /// One chunk of a chunk group.
    Chunk(ChunkFrame),
}

impl Frame {
    /// Payload bytes carried by this frame.
    pub fn payload_len(&self) -> usize {
        match self {
            Frame::Whole(m) => m.payload.len(),
            Frame::Chunk(c) => c.payload.len(),
        }
    }

    /// Sequence id of the message this frame belongs to.
    pub fn sequence_id(&self) -> u64 {
        match self {
            Frame::Whole(m) => m.metadata.sequence_id,
            Frame::Chunk(c) => c.sequence_id,
        }
    }
}

/// Behaviour of [`FrameSink::enqueue`] when the pending queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Wait for room.
    Blocking,
    /// Return `ProducerQueueFull` immediately.
    FailFast,
}

/// Outbound side of a producer connection.
pub trait FrameSink: Send + Sync {
    /// Name the broker registered this producer under.
    ///
    /// Unique per broker; chunk group keys are derived from it.
    fn producer_name(&self) -> &str;

    /// Largest frame payload the broker accepts.
    fn max_frame_size(&self) -> usize;

    /// Queue one frame for publication and return its identifier.
    ///
    /// Frames enqueued by one caller are delivered in enqueue order.
    fn enqueue(&self, frame: Frame, mode: SendMode) -> Result<FrameId>;

    /// Frames accepted by [`enqueue`](Self::enqueue) and not yet handed to the broker.
    fn pending_frames(&self) -> usize;
}

/// Inbound frame callback, invoked once per frame in arrival order.
pub trait FrameHandler: Send + Sync {
    /// Handle one delivered frame. `frame_id` is what gets acknowledged later.
    fn on_frame(&self, frame: Frame, frame_id: FrameId);
}

/// Acknowledgment path back to the broker.
pub trait AckSink: Send + Sync {
    /// Acknowledge every id in `frame_ids` as one operation.
    fn acknowledge(&self, frame_ids: &[FrameId]) -> Result<()>;
}
