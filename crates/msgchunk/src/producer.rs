// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Producer: size check, chunk splitting and the all-or-nothing send.
//!
//! A send either enqueues every frame of the message or returns exactly one
//! error. Frames already enqueued before a failure are not recalled; the
//! consumer never completes that group and expires it.
//!
//! At most `max_pending_messages` frames sit in the sink at once. A full sink
//! fails the send with `ProducerQueueFull`, or waits for room when
//! `block_if_queue_full` is set.

use crate::chunk::{ChunkGroupKey, ChunkSplitter};
use crate::config::{ProducerConfig, CHUNK_METADATA_OVERHEAD};
use crate::error::{Error, Result};
use crate::message::{MessageId, MessageMetadata, ProducerMessage};
use crate::metrics::{ChunkMetrics, ChunkMetricsSnapshot};
use crate::transport::{Frame, FrameId, FrameSink, MessageFrame, SendMode};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Poll period while a blocking send waits for room in the sink.
const PENDING_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Publishes messages to a [`FrameSink`], chunking oversized payloads.
///
/// `send` may be called from any number of threads at once.
///
/// # Example
///
/// ```
/// use msgchunk::config::ProducerConfig;
/// use msgchunk::transport::LoopbackBroker;
/// use msgchunk::{Producer, ProducerMessage};
///
/// let broker = LoopbackBroker::new(1024);
/// let link = broker.create_producer_link("ingest-1", 64).unwrap();
/// let config = ProducerConfig::new("ingest-1")
///     .enable_chunking(true)
///     .disable_batching(true)
///     .chunk_max_message_size(100);
/// let producer = Producer::new(config, link).unwrap();
///
/// let id = producer.send(ProducerMessage::new(vec![7u8; 250])).unwrap();
/// assert_eq!(id.chunk_count, 3);
/// ```
pub struct Producer {
    config: ProducerConfig,
    sink: Arc<dyn FrameSink>,
    /// Present when chunking is enabled
    splitter: Option<ChunkSplitter>,
    max_frame_size: usize,
    mode: SendMode,
    /// Keeps each message's frames contiguous and the pending check exact
    send_lock: Mutex<()>,
    next_sequence_id: AtomicU64,
    metrics: Arc<ChunkMetrics>,
    closed: AtomicBool,
}

impl Producer {
    /// Create a producer over `sink`.
    ///
    /// # Errors
    ///
    /// - `Config` for an inconsistent configuration (chunking with batching),
    ///   or when `sink` is registered under a different producer name
    /// - `InvalidChunkSize` when the effective chunk size resolves to zero
    pub fn new(config: ProducerConfig, sink: Arc<dyn FrameSink>) -> Result<Self> {
        config.validate()?;
        if sink.producer_name() != config.producer_name {
            return Err(Error::Config(format!(
                "producer '{}' cannot send through link '{}'",
                config.producer_name,
                sink.producer_name()
            )));
        }

        let max_frame_size = sink.max_frame_size();
        let splitter = if config.enable_chunking {
            Some(ChunkSplitter::resolve(
                config.chunk_max_message_size,
                max_frame_size,
                CHUNK_METADATA_OVERHEAD,
            )?)
        } else {
            None
        };
        let mode = if config.block_if_queue_full {
            SendMode::Blocking
        } else {
            SendMode::FailFast
        };

        log::debug!(
            "[producer] '{}' created (max_frame={}, chunk_size={:?}, mode={:?})",
            config.producer_name,
            max_frame_size,
            splitter.map(|s| s.max_payload()),
            mode
        );

        Ok(Self {
            config,
            sink,
            splitter,
            max_frame_size,
            mode,
            send_lock: Mutex::new(()),
            next_sequence_id: AtomicU64::new(0),
            metrics: Arc::new(ChunkMetrics::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Producer name.
    pub fn name(&self) -> &str {
        &self.config.producer_name
    }

    /// Effective chunk payload size, or `None` when chunking is disabled.
    pub fn chunk_size(&self) -> Option<usize> {
        self.splitter.map(|s| s.max_payload())
    }

    /// Maximum frame payload advertised by the sink.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Snapshot of this producer's counters.
    pub fn metrics(&self) -> ChunkMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Publish one message.
    ///
    /// Payloads that fit in one frame go out whole. Larger payloads are
    /// split when chunking is enabled and rejected otherwise.
    ///
    /// # Errors
    ///
    /// - `ProducerClosed` after [`close`](Self::close)
    /// - `MessageTooLarge` for an oversized payload without chunking
    /// - `ProducerQueueFull` when `max_pending_messages` frames are pending
    ///   and the producer does not block
    /// - any enqueue error from the sink (e.g. `ProducerQueueFull`), returned
    ///   once, for the first frame that failed
    pub fn send(&self, message: ProducerMessage) -> Result<MessageId> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ProducerClosed);
        }

        let _guard = self.send_lock.lock();
        let sequence_id = self.next_sequence_id.fetch_add(1, Ordering::Relaxed);
        let metadata = MessageMetadata {
            producer_name: self.config.producer_name.clone(),
            sequence_id,
            publish_time: SystemTime::now(),
            event_time: message.event_time,
            key: message.key,
            properties: message.properties,
        };
        let payload = message.payload;

        let result = match self.splitter {
            Some(splitter) if splitter.needs_chunking(payload.len()) => {
                self.send_chunked(&splitter, &payload, metadata)
            }
            Some(_) => self.send_whole(payload, metadata),
            None if payload.len() > self.max_frame_size => Err(Error::MessageTooLarge {
                size: payload.len(),
                max: self.max_frame_size,
            }),
            None => self.send_whole(payload, metadata),
        };

        if let Err(ref e) = result {
            self.metrics.record_send_failure();
            log::debug!(
                "[producer] '{}' send seq={} failed: {}",
                self.config.producer_name,
                sequence_id,
                e
            );
        }
        result
    }

    /// Wait until the sink holds fewer than `max_pending_messages` frames.
    fn wait_for_room(&self) -> Result<()> {
        let max = self.config.max_pending_messages;
        while self.sink.pending_frames() >= max {
            if self.mode == SendMode::FailFast {
                log::debug!(
                    "[producer] '{}' has {} pending frames",
                    self.config.producer_name,
                    max
                );
                return Err(Error::ProducerQueueFull);
            }
            if self.is_closed() {
                return Err(Error::ProducerClosed);
            }
            std::thread::sleep(PENDING_POLL_INTERVAL);
        }
        Ok(())
    }

    fn enqueue(&self, frame: Frame) -> Result<FrameId> {
        self.wait_for_room()?;
        self.sink.enqueue(frame, self.mode)
    }

    fn send_whole(&self, payload: Vec<u8>, metadata: MessageMetadata) -> Result<MessageId> {
        let id = self.enqueue(Frame::Whole(MessageFrame { payload, metadata }))?;
        Ok(MessageId::single(id))
    }

    fn send_chunked(
        &self,
        splitter: &ChunkSplitter,
        payload: &[u8],
        metadata: MessageMetadata,
    ) -> Result<MessageId> {
        let key = ChunkGroupKey::for_message(&self.config.producer_name, metadata.sequence_id);
        let frames = splitter.split(payload, key.clone(), metadata)?;
        let chunk_count = frames.len() as u32;

        let mut first = None;
        let mut last = None;
        for frame in frames {
            let index = frame.chunk_index;
            let id = self.enqueue(Frame::Chunk(frame)).map_err(|e| {
                log::warn!(
                    "[producer] group={} chunk {}/{} enqueue failed: {}",
                    key,
                    index,
                    chunk_count,
                    e
                );
                e
            })?;
            first.get_or_insert(id);
            last = Some(id);
        }

        let (Some(first), Some(last)) = (first, last) else {
            return Err(Error::SendFailed(format!("group {} produced no frames", key)));
        };
        self.metrics.record_chunked_send(chunk_count as u64);
        log::debug!(
            "[producer] group={} sent as {} chunks ({}..{})",
            key,
            chunk_count,
            first,
            last
        );

        Ok(MessageId {
            first,
            last,
            chunk_count,
        })
    }

    /// Refuse further sends. In-flight sends complete normally.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            log::debug!("[producer] '{}' closed", self.config.producer_name);
        }
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("name", &self.config.producer_name)
            .field("chunk_size", &self.chunk_size())
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAX_MESSAGE_SIZE;
    use std::sync::atomic::AtomicUsize;

    /// Records frames; fails every enqueue from `fail_at` on.
    ///
    /// Recorded frames count as pending until [`drain`](Self::drain)ed.
    struct RecordingSink {
        max: usize,
        fail_at: Option<usize>,
        frames: Mutex<Vec<Frame>>,
        pending: AtomicUsize,
    }

    impl RecordingSink {
        fn new(max: usize, fail_at: Option<usize>) -> Arc<Self> {
            Arc::new(Self {
                max,
                fail_at,
                frames: Mutex::new(Vec::new()),
                pending: AtomicUsize::new(0),
            })
        }

        fn drain(&self) {
            self.pending.store(0, Ordering::SeqCst);
        }
    }

    impl FrameSink for RecordingSink {
        fn producer_name(&self) -> &str {
            "p"
        }

        fn max_frame_size(&self) -> usize {
            self.max
        }

        fn enqueue(&self, frame: Frame, _mode: SendMode) -> Result<FrameId> {
            let mut frames = self.frames.lock();
            if self.fail_at.is_some_and(|k| frames.len() >= k) {
                return Err(Error::ProducerQueueFull);
            }
            frames.push(frame);
            self.pending.fetch_add(1, Ordering::SeqCst);
            Ok(FrameId(frames.len() as u64))
        }

        fn pending_frames(&self) -> usize {
            self.pending.load(Ordering::SeqCst)
        }
    }

    fn chunking(name: &str) -> ProducerConfig {
        ProducerConfig::new(name)
            .enable_chunking(true)
            .disable_batching(true)
    }

    #[test]
    fn test_chunking_requires_batching_disabled() {
        let sink = RecordingSink::new(DEFAULT_MAX_MESSAGE_SIZE, None);
        let config = ProducerConfig::new("p").enable_chunking(true);
        assert!(matches!(Producer::new(config, sink), Err(Error::Config(_))));
    }

    #[test]
    fn test_producer_name_must_match_sink() {
        let sink = RecordingSink::new(1024, None);
        assert!(matches!(
            Producer::new(chunking("other"), sink.clone()),
            Err(Error::Config(_))
        ));
        assert!(Producer::new(chunking("p"), sink).is_ok());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let sink = RecordingSink::new(DEFAULT_MAX_MESSAGE_SIZE, None);
        let config = chunking("p").chunk_max_message_size(0);
        assert!(matches!(
            Producer::new(config, sink),
            Err(Error::InvalidChunkSize { .. })
        ));

        let tiny = RecordingSink::new(CHUNK_METADATA_OVERHEAD, None);
        assert!(matches!(
            Producer::new(chunking("p"), tiny),
            Err(Error::InvalidChunkSize { .. })
        ));
    }

    #[test]
    fn test_default_chunk_size_reserves_overhead() {
        let sink = RecordingSink::new(DEFAULT_MAX_MESSAGE_SIZE, None);
        let producer = Producer::new(chunking("p"), sink).unwrap();
        assert_eq!(
            producer.chunk_size(),
            Some(DEFAULT_MAX_MESSAGE_SIZE - CHUNK_METADATA_OVERHEAD)
        );
    }

    #[test]
    fn test_non_chunking_rejects_oversized() {
        let sink = RecordingSink::new(100, None);
        let producer = Producer::new(ProducerConfig::new("p"), sink.clone()).unwrap();

        assert!(producer.send(ProducerMessage::new(vec![0u8; 100])).is_ok());
        assert!(matches!(
            producer.send(ProducerMessage::new(vec![0u8; 101])),
            Err(Error::MessageTooLarge { size: 101, max: 100 })
        ));
        assert_eq!(sink.frames.lock().len(), 1);
        assert_eq!(producer.metrics().send_failures, 1);
    }

    #[test]
    fn test_small_payload_sent_whole() {
        let sink = RecordingSink::new(1024, None);
        let producer = Producer::new(chunking("p").chunk_max_message_size(10), sink.clone()).unwrap();

        let id = producer.send(ProducerMessage::new(vec![1u8; 10])).unwrap();
        assert!(!id.is_chunked());
        assert!(matches!(sink.frames.lock()[0], Frame::Whole(_)));
    }

    #[test]
    fn test_chunked_send_shares_key_and_sequence() {
        let sink = RecordingSink::new(1024, None);
        let producer = Producer::new(chunking("p").chunk_max_message_size(5), sink.clone()).unwrap();

        let id = producer
            .send(ProducerMessage::new((0..50).collect::<Vec<u8>>()).key("k"))
            .unwrap();
        assert_eq!(id.chunk_count, 10);
        assert_eq!(id.first, FrameId(1));
        assert_eq!(id.last, FrameId(10));

        let frames = sink.frames.lock();
        let chunks: Vec<_> = frames
            .iter()
            .filter_map(|f| match f {
                Frame::Chunk(c) => Some(c),
                Frame::Whole(_) => None,
            })
            .collect();
        assert_eq!(chunks.len(), 10);
        assert!(chunks.iter().all(|c| c.group_key.as_str() == "p-0"));
        assert!(chunks.iter().all(|c| c.sequence_id == 0));
        assert_eq!(
            chunks[0].metadata.as_ref().and_then(|m| m.key.as_deref()),
            Some("k")
        );
    }

    #[test]
    fn test_fresh_group_key_per_payload() {
        let sink = RecordingSink::new(1024, None);
        let producer = Producer::new(chunking("p").chunk_max_message_size(4), sink.clone()).unwrap();
        producer.send(ProducerMessage::new(vec![0u8; 8])).unwrap();
        producer.send(ProducerMessage::new(vec![0u8; 8])).unwrap();

        let keys: Vec<String> = sink
            .frames
            .lock()
            .iter()
            .filter_map(|f| match f {
                Frame::Chunk(c) => Some(c.group_key.to_string()),
                Frame::Whole(_) => None,
            })
            .collect();
        assert_eq!(keys, vec!["p-0", "p-0", "p-1", "p-1"]);
    }

    #[test]
    fn test_failure_at_every_chunk_returns_one_error() {
        for k in 0..10 {
            let sink = RecordingSink::new(1024, Some(k));
            let producer =
                Producer::new(chunking("p").chunk_max_message_size(5), sink.clone()).unwrap();

            let result = producer.send(ProducerMessage::new(vec![0u8; 50]));
            assert!(matches!(result, Err(Error::ProducerQueueFull)), "k={}", k);
            assert_eq!(sink.frames.lock().len(), k, "stops at the first failure");
            assert_eq!(producer.metrics().send_failures, 1);
            assert_eq!(producer.metrics().chunked_messages_sent, 0);
        }
    }

    #[test]
    fn test_closed_producer_rejects() {
        let sink = RecordingSink::new(1024, None);
        let producer = Producer::new(ProducerConfig::new("p"), sink).unwrap();
        producer.close();
        assert!(producer.is_closed());
        assert!(matches!(
            producer.send(ProducerMessage::new(vec![1])),
            Err(Error::ProducerClosed)
        ));
    }

    #[test]
    fn test_pending_limit_fails_fast() {
        let sink = RecordingSink::new(1024, None);
        let config = chunking("p")
            .chunk_max_message_size(5)
            .max_pending_messages(3)
            .block_if_queue_full(false);
        let producer = Producer::new(config, sink.clone()).unwrap();

        assert!(matches!(
            producer.send(ProducerMessage::new(vec![0u8; 50])),
            Err(Error::ProducerQueueFull)
        ));
        assert_eq!(sink.frames.lock().len(), 3);

        sink.drain();
        assert!(producer.send(ProducerMessage::new(vec![0u8; 15])).is_ok());
        assert_eq!(sink.pending_frames(), 3);
    }

    #[test]
    fn test_pending_limit_blocks_until_drained() {
        let sink = RecordingSink::new(1024, None);
        let config = chunking("p")
            .chunk_max_message_size(5)
            .max_pending_messages(2);
        let producer = Producer::new(config, sink.clone()).unwrap();

        let drainer = {
            let sink = sink.clone();
            std::thread::spawn(move || {
                while sink.frames.lock().len() < 10 {
                    std::thread::sleep(Duration::from_millis(2));
                    sink.drain();
                }
            })
        };

        let id = producer.send(ProducerMessage::new(vec![0u8; 50])).unwrap();
        assert_eq!(id.chunk_count, 10);
        drainer.join().unwrap();
    }

    #[test]
    fn test_close_releases_blocked_send() {
        let sink = RecordingSink::new(1024, None);
        let config = chunking("p")
            .chunk_max_message_size(5)
            .max_pending_messages(1);
        let producer = Arc::new(Producer::new(config, sink.clone()).unwrap());

        let closer = {
            let producer = producer.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                producer.close();
            })
        };

        assert!(matches!(
            producer.send(ProducerMessage::new(vec![0u8; 10])),
            Err(Error::ProducerClosed)
        ));
        closer.join().unwrap();
        assert_eq!(sink.frames.lock().len(), 1);
    }
}
