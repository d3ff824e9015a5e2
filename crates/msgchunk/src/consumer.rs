// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Consumer: frame intake, reassembly and delivery.
//!
//! ```text
//! FrameHandler::on_frame
//!   |-- Whole  ------------------------------------> delivery queue
//!   '-- Chunk  --> ChunkReassembler --(complete)---> delivery queue
//!                        |
//!                        '--(dropped)--> metrics / drop listener / auto-ack
//! ```
//!
//! Dropped groups (evicted, expired, corrupt, orphaned) never fail a receive
//! call. They show up in [`Consumer::metrics`] and, with
//! `auto_ack_incomplete_chunk`, their frames are acknowledged so the broker
//! does not redeliver them.

use crate::chunk::{
    spawn_expiry_sweeper, ChunkContextRegistry, ChunkDropListener, ChunkReassembler,
    DroppedChunkGroup, ExpirySweeperHandle,
};
use crate::config::ConsumerConfig;
use crate::error::{Error, Result};
use crate::message::{Message, MessageId};
use crate::metrics::{ChunkMetrics, ChunkMetricsSnapshot};
use crate::transport::{AckSink, Frame, FrameHandler, FrameId};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Poll period while blocked on a full or empty delivery queue.
const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Acknowledges the frames of dropped groups.
struct AutoAckListener {
    acks: Arc<dyn AckSink>,
}

impl ChunkDropListener for AutoAckListener {
    fn on_chunk_group_dropped(&self, group: &DroppedChunkGroup) {
        if group.frame_ids.is_empty() {
            return;
        }
        if let Err(e) = self.acks.acknowledge(&group.frame_ids) {
            log::warn!(
                "[consumer] auto-ack of {} group={} failed: {}",
                group.reason,
                group.key,
                e
            );
        }
    }
}

struct ConsumerInner {
    reassembler: ChunkReassembler,
    metrics: Arc<ChunkMetrics>,
    tx: Sender<Message>,
    rx: Receiver<Message>,
    acks: Arc<dyn AckSink>,
    closed: AtomicBool,
}

impl ConsumerInner {
    fn deliver(&self, mut message: Message) {
        loop {
            if self.closed.load(Ordering::Acquire) {
                log::debug!("[consumer] closed, dropping message {}", message.id());
                return;
            }
            match self.tx.send_timeout(message, CLOSE_POLL_INTERVAL) {
                Ok(()) => return,
                Err(SendTimeoutError::Timeout(m)) => message = m,
                Err(SendTimeoutError::Disconnected(_)) => return,
            }
        }
    }
}

impl FrameHandler for ConsumerInner {
    fn on_frame(&self, frame: Frame, frame_id: FrameId) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        match frame {
            Frame::Whole(whole) => self.deliver(Message {
                id: MessageId::single(frame_id),
                payload: whole.payload,
                metadata: whole.metadata,
                frame_ids: vec![frame_id],
            }),
            Frame::Chunk(chunk) => match self.reassembler.on_chunk(chunk, frame_id) {
                Ok(Some(message)) => self.deliver(message),
                Ok(None) => {}
                Err(e) => log::debug!("[consumer] chunk frame {} dropped: {}", frame_id, e),
            },
        }
    }
}

/// Receives frames, reassembles chunk groups and queues messages for the application.
///
/// Register [`handler`](Self::handler) with the transport; read with
/// [`receive`](Self::receive) and friends.
pub struct Consumer {
    inner: Arc<ConsumerInner>,
    config: ConsumerConfig,
    sweeper: Mutex<Option<ExpirySweeperHandle>>,
}

impl Consumer {
    /// Create a consumer acknowledging through `acks`.
    ///
    /// Starts the expiry sweeper when `expiry_sweep_interval` is set.
    pub fn new(config: ConsumerConfig, acks: Arc<dyn AckSink>) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(ChunkMetrics::new());
        let mut registry = ChunkContextRegistry::new(
            config.max_pending_chunked_message,
            config.expire_time_of_incomplete_chunk,
            metrics.clone(),
        );
        if config.auto_ack_incomplete_chunk {
            registry = registry.with_drop_listener(Arc::new(AutoAckListener {
                acks: acks.clone(),
            }));
        }
        let registry = Arc::new(registry);

        let sweeper = match config.expiry_sweep_interval {
            Some(interval) => Some(spawn_expiry_sweeper(&registry, interval)?),
            None => None,
        };

        let (tx, rx) = channel::bounded(config.receiver_queue_size);
        let inner = Arc::new(ConsumerInner {
            reassembler: ChunkReassembler::new(
                registry,
                metrics.clone(),
                config.max_reassembled_size,
            ),
            metrics,
            tx,
            rx,
            acks,
            closed: AtomicBool::new(false),
        });

        log::debug!(
            "[consumer] created (capacity={}, ttl={:?}, sweep={:?}, auto_ack={})",
            config.max_pending_chunked_message,
            config.expire_time_of_incomplete_chunk,
            config.expiry_sweep_interval,
            config.auto_ack_incomplete_chunk
        );

        Ok(Self {
            inner,
            config,
            sweeper: Mutex::new(sweeper),
        })
    }

    /// Frame callback to register with the transport.
    pub fn handler(&self) -> Arc<dyn FrameHandler> {
        self.inner.clone()
    }

    /// Configuration in effect.
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Wait for the next message.
    ///
    /// # Errors
    ///
    /// `ConsumerClosed` once the consumer is closed.
    pub fn receive(&self) -> Result<Message> {
        loop {
            match self.receive_timeout(CLOSE_POLL_INTERVAL) {
                Err(Error::Timeout) => continue,
                other => return other,
            }
        }
    }

    /// Wait up to `timeout` for the next message.
    ///
    /// # Errors
    ///
    /// `Timeout` when nothing arrived in time, `ConsumerClosed` once closed.
    pub fn receive_timeout(&self, timeout: Duration) -> Result<Message> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_closed() {
                return Err(Error::ConsumerClosed);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }
            match self.inner.rx.recv_timeout(remaining.min(CLOSE_POLL_INTERVAL)) {
                Ok(message) => return Ok(message),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(Error::ConsumerClosed),
            }
        }
    }

    /// Take the next message if one is queued.
    pub fn try_receive(&self) -> Result<Option<Message>> {
        if self.is_closed() {
            return Err(Error::ConsumerClosed);
        }
        match self.inner.rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::ConsumerClosed),
        }
    }

    /// Acknowledge every frame of `message` in one call.
    pub fn ack(&self, message: &Message) -> Result<()> {
        self.inner.acks.acknowledge(message.frame_ids())
    }

    /// Messages waiting in the delivery queue.
    pub fn queued(&self) -> usize {
        self.inner.rx.len()
    }

    /// Incomplete chunk groups currently held.
    pub fn pending_chunked_messages(&self) -> usize {
        self.inner.reassembler.registry().len()
    }

    /// Snapshot of the chunking counters.
    pub fn metrics(&self) -> ChunkMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Stop the sweeper, drop incomplete groups and refuse further receives.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.stop();
        }
        self.inner.reassembler.registry().clear();
        log::debug!("[consumer] closed");
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("config", &self.config)
            .field("queued", &self.queued())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ChunkFrame, ChunkGroupKey, ChunkSplitter};
    use crate::message::MessageMetadata;
    use crate::transport::MessageFrame;

    #[derive(Default)]
    struct AckLog(Mutex<Vec<FrameId>>);

    impl AckSink for AckLog {
        fn acknowledge(&self, frame_ids: &[FrameId]) -> Result<()> {
            self.0.lock().extend_from_slice(frame_ids);
            Ok(())
        }
    }

    fn chunks(seq: u64, len: usize, max: usize) -> Vec<ChunkFrame> {
        ChunkSplitter::new(max)
            .unwrap()
            .split(
                &vec![seq as u8; len],
                ChunkGroupKey::for_message("p", seq),
                MessageMetadata::new("p", seq),
            )
            .unwrap()
    }

    fn consumer(config: ConsumerConfig) -> (Consumer, Arc<AckLog>) {
        let acks = Arc::new(AckLog::default());
        (Consumer::new(config, acks.clone()).unwrap(), acks)
    }

    #[test]
    fn test_whole_frame_delivered() {
        let (consumer, _) = consumer(ConsumerConfig::default());
        consumer.handler().on_frame(
            Frame::Whole(MessageFrame {
                payload: b"hello".to_vec(),
                metadata: MessageMetadata::new("p", 0),
            }),
            FrameId(9),
        );
        let msg = consumer.try_receive().unwrap().expect("queued");
        assert_eq!(msg.payload(), b"hello");
        assert_eq!(msg.id(), MessageId::single(FrameId(9)));
    }

    #[test]
    fn test_chunked_message_delivered_and_acked() {
        let (consumer, acks) = consumer(ConsumerConfig::default());
        let handler = consumer.handler();
        for (i, c) in chunks(1, 23, 10).into_iter().enumerate() {
            handler.on_frame(Frame::Chunk(c), FrameId(i as u64 + 1));
        }

        let msg = consumer.receive_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(msg.payload().len(), 23);
        assert_eq!(msg.frame_ids(), &[FrameId(1), FrameId(2), FrameId(3)]);

        consumer.ack(&msg).unwrap();
        assert_eq!(acks.0.lock().as_slice(), &[FrameId(1), FrameId(2), FrameId(3)]);
    }

    #[test]
    fn test_receive_timeout_when_empty() {
        let (consumer, _) = consumer(ConsumerConfig::default());
        assert!(matches!(
            consumer.receive_timeout(Duration::from_millis(20)),
            Err(Error::Timeout)
        ));
        assert!(consumer.try_receive().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_group_not_delivered() {
        let (consumer, _) = consumer(ConsumerConfig::default());
        let handler = consumer.handler();
        let c = chunks(1, 30, 10);
        handler.on_frame(Frame::Chunk(c[0].clone()), FrameId(1));
        handler.on_frame(Frame::Chunk(c[2].clone()), FrameId(3));
        handler.on_frame(Frame::Chunk(c[1].clone()), FrameId(2));

        assert!(consumer.try_receive().unwrap().is_none());
        let m = consumer.metrics();
        assert_eq!(m.groups_corrupt, 1);
        assert_eq!(m.orphan_chunks, 1);
    }

    #[test]
    fn test_auto_ack_dropped_group() {
        let config = ConsumerConfig::default()
            .max_pending_chunked_message(1)
            .auto_ack_incomplete_chunk(true);
        let (consumer, acks) = consumer(config);
        let handler = consumer.handler();

        let a = chunks(1, 20, 10);
        let b = chunks(2, 20, 10);
        handler.on_frame(Frame::Chunk(a[0].clone()), FrameId(1));
        handler.on_frame(Frame::Chunk(b[0].clone()), FrameId(2));

        // Group 1 evicted: its received frame is acknowledged.
        assert_eq!(acks.0.lock().as_slice(), &[FrameId(1)]);
        assert_eq!(consumer.metrics().groups_evicted, 1);

        // Late chunk of group 1 is an orphan and acknowledged too.
        handler.on_frame(Frame::Chunk(a[1].clone()), FrameId(3));
        assert_eq!(acks.0.lock().as_slice(), &[FrameId(1), FrameId(3)]);
    }

    #[test]
    fn test_no_auto_ack_by_default() {
        let (consumer, acks) = consumer(ConsumerConfig::default().max_pending_chunked_message(1));
        let handler = consumer.handler();
        handler.on_frame(Frame::Chunk(chunks(1, 20, 10)[0].clone()), FrameId(1));
        handler.on_frame(Frame::Chunk(chunks(2, 20, 10)[0].clone()), FrameId(2));
        assert!(acks.0.lock().is_empty());
        assert_eq!(consumer.metrics().groups_evicted, 1);
    }

    #[test]
    fn test_close_rejects_receive() {
        let (consumer, _) = consumer(ConsumerConfig::default());
        consumer.handler().on_frame(Frame::Chunk(chunks(1, 20, 10)[0].clone()), FrameId(1));
        assert_eq!(consumer.pending_chunked_messages(), 1);

        consumer.close();
        assert!(consumer.is_closed());
        assert_eq!(consumer.pending_chunked_messages(), 0);
        assert!(matches!(consumer.receive(), Err(Error::ConsumerClosed)));
        assert!(matches!(consumer.try_receive(), Err(Error::ConsumerClosed)));
    }
}
