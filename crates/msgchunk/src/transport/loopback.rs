// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory broker for tests and tools.
//!
//! ```text
//! Producer -> ProducerLink (bounded queue) --+
//! Producer -> ProducerLink (bounded queue) --+-- dispatch() round-robin --> FrameHandler(s)
//!                                                                                |
//!                                                     LoopbackBroker <-- AckSink-+
//! ```
//!
//! Each link preserves its enqueue order. `dispatch()` takes one frame per
//! link per round, so chunk groups from concurrent producers arrive
//! interleaved, as they would from a real broker.

use super::{AckSink, Frame, FrameHandler, FrameId, FrameSink, SendMode};
use crate::error::{Error, Result};
use crate::worker::{PeriodicWorker, Tick};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use dashmap::DashSet;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

struct LinkQueue {
    name: String,
    tx: Sender<(FrameId, Frame)>,
    rx: Receiver<(FrameId, Frame)>,
    closed: AtomicBool,
}

struct BrokerInner {
    max_frame_size: usize,
    next_frame_id: AtomicU64,
    links: RwLock<Vec<Arc<LinkQueue>>>,
    handlers: RwLock<Vec<Arc<dyn FrameHandler>>>,
    acked: DashSet<FrameId>,
    /// Round-robin start position
    cursor: AtomicUsize,
    /// Serializes dispatch so per-link order holds at the handlers
    dispatch_lock: Mutex<()>,
    frames_published: AtomicU64,
    frames_delivered: AtomicU64,
}

impl BrokerInner {
    fn dispatch(&self) -> usize {
        let _guard = self.dispatch_lock.lock();
        let links: Vec<Arc<LinkQueue>> = self.links.read().clone();
        let handlers: Vec<Arc<dyn FrameHandler>> = self.handlers.read().clone();
        if links.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        loop {
            let start = self.cursor.fetch_add(1, Ordering::Relaxed);
            let mut progressed = false;
            for i in 0..links.len() {
                let link = &links[(start + i) % links.len()];
                if let Ok((id, frame)) = link.rx.try_recv() {
                    progressed = true;
                    delivered += 1;
                    Self::deliver(&handlers, frame, id);
                }
            }
            if !progressed {
                break;
            }
        }

        if delivered > 0 {
            self.frames_delivered
                .fetch_add(delivered as u64, Ordering::Relaxed);
            log::debug!("[loopback] dispatched {} frames", delivered);
        }
        delivered
    }

    fn deliver(handlers: &[Arc<dyn FrameHandler>], frame: Frame, id: FrameId) {
        let Some((last, rest)) = handlers.split_last() else {
            log::debug!("[loopback] no subscriber, frame {} dropped", id);
            return;
        };
        for handler in rest {
            handler.on_frame(frame.clone(), id);
        }
        last.on_frame(frame, id);
    }
}

/// In-memory broker.
///
/// Cloning yields another handle to the same broker.
#[derive(Clone)]
pub struct LoopbackBroker {
    inner: Arc<BrokerInner>,
}

impl LoopbackBroker {
    /// Create a broker accepting frame payloads up to `max_frame_size` bytes.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                max_frame_size,
                next_frame_id: AtomicU64::new(1),
                links: RwLock::new(Vec::new()),
                handlers: RwLock::new(Vec::new()),
                acked: DashSet::new(),
                cursor: AtomicUsize::new(0),
                dispatch_lock: Mutex::new(()),
                frames_published: AtomicU64::new(0),
                frames_delivered: AtomicU64::new(0),
            }),
        }
    }

    /// Largest accepted frame payload.
    pub fn max_frame_size(&self) -> usize {
        self.inner.max_frame_size
    }

    /// Open a producer link whose pending queue holds `max_pending` frames.
    ///
    /// Producer names are unique per broker: chunk group keys are derived
    /// from them.
    ///
    /// # Errors
    ///
    /// `Config` when a link named `name` was already opened on this broker.
    pub fn create_producer_link(
        &self,
        name: &str,
        max_pending: usize,
    ) -> Result<Arc<ProducerLink>> {
        let queue = {
            let mut links = self.inner.links.write();
            if links.iter().any(|l| l.name == name) {
                log::warn!("[loopback] producer name '{}' already in use", name);
                return Err(Error::Config(format!(
                    "producer name '{}' is already connected",
                    name
                )));
            }
            let (tx, rx) = channel::bounded(max_pending.max(1));
            let queue = Arc::new(LinkQueue {
                name: name.to_string(),
                tx,
                rx,
                closed: AtomicBool::new(false),
            });
            links.push(queue.clone());
            queue
        };
        log::debug!("[loopback] link '{}' opened (max_pending={})", name, max_pending);

        Ok(Arc::new(ProducerLink {
            broker: Arc::downgrade(&self.inner),
            queue,
            max_frame_size: self.inner.max_frame_size,
        }))
    }

    /// Register a frame handler; it receives every frame dispatched from now on.
    pub fn subscribe(&self, handler: Arc<dyn FrameHandler>) {
        self.inner.handlers.write().push(handler);
    }

    /// Drain every link into the subscribed handlers.
    ///
    /// Returns the number of frames delivered.
    pub fn dispatch(&self) -> usize {
        self.inner.dispatch()
    }

    /// Run [`dispatch`](Self::dispatch) on a background thread, polling every `interval` when idle.
    pub fn start_dispatcher(&self, interval: Duration) -> Result<DispatcherHandle> {
        let inner: Weak<BrokerInner> = Arc::downgrade(&self.inner);
        let worker = PeriodicWorker::spawn("msgchunk-loopback", "loopback", interval, move || {
            match inner.upgrade() {
                Some(inner) if inner.dispatch() > 0 => Tick::Busy,
                Some(_) => Tick::Idle,
                None => Tick::Stop,
            }
        })?;
        Ok(DispatcherHandle { worker })
    }

    /// Frames waiting in link queues.
    pub fn pending_frames(&self) -> usize {
        self.inner.links.read().iter().map(|l| l.rx.len()).sum()
    }

    /// Frames accepted from producers.
    pub fn frames_published(&self) -> u64 {
        self.inner.frames_published.load(Ordering::Relaxed)
    }

    /// Frames handed to subscribers.
    pub fn frames_delivered(&self) -> u64 {
        self.inner.frames_delivered.load(Ordering::Relaxed)
    }

    /// Whether `id` has been acknowledged.
    pub fn is_acked(&self, id: FrameId) -> bool {
        self.inner.acked.contains(&id)
    }

    /// Number of distinct acknowledged frames.
    pub fn acked_count(&self) -> usize {
        self.inner.acked.len()
    }
}

impl AckSink for LoopbackBroker {
    fn acknowledge(&self, frame_ids: &[FrameId]) -> Result<()> {
        for id in frame_ids {
            self.inner.acked.insert(*id);
        }
        Ok(())
    }
}

impl std::fmt::Debug for LoopbackBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackBroker")
            .field("max_frame_size", &self.inner.max_frame_size)
            .field("links", &self.inner.links.read().len())
            .field("pending_frames", &self.pending_frames())
            .finish()
    }
}

/// Producer connection to a [`LoopbackBroker`].
///
/// In [`SendMode::Blocking`] an enqueue on a full link waits until a
/// dispatcher drains it; without a running dispatcher it waits forever.
pub struct ProducerLink {
    broker: Weak<BrokerInner>,
    queue: Arc<LinkQueue>,
    max_frame_size: usize,
}

impl ProducerLink {
    /// Link name.
    pub fn name(&self) -> &str {
        &self.queue.name
    }

    /// Frames queued on this link.
    pub fn pending(&self) -> usize {
        self.queue.rx.len()
    }

    /// Refuse further frames. Queued frames are still dispatched.
    pub fn close(&self) {
        self.queue.closed.store(true, Ordering::Release);
    }
}

impl FrameSink for ProducerLink {
    fn producer_name(&self) -> &str {
        &self.queue.name
    }

    fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn enqueue(&self, frame: Frame, mode: SendMode) -> Result<FrameId> {
        if self.queue.closed.load(Ordering::Acquire) {
            return Err(Error::ProducerClosed);
        }
        let broker = self.broker.upgrade().ok_or(Error::ProducerClosed)?;

        let size = frame.payload_len();
        if size > self.max_frame_size {
            return Err(Error::MessageTooLarge {
                size,
                max: self.max_frame_size,
            });
        }

        let id = FrameId(broker.next_frame_id.fetch_add(1, Ordering::Relaxed));
        match mode {
            SendMode::Blocking => self
                .queue
                .tx
                .send((id, frame))
                .map_err(|_| Error::SendFailed("link disconnected".to_string()))?,
            SendMode::FailFast => match self.queue.tx.try_send((id, frame)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    log::debug!("[loopback] link '{}' queue full", self.queue.name);
                    return Err(Error::ProducerQueueFull);
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(Error::SendFailed("link disconnected".to_string()));
                }
            },
        }

        broker.frames_published.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    fn pending_frames(&self) -> usize {
        self.queue.rx.len()
    }
}

impl std::fmt::Debug for ProducerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerLink")
            .field("name", &self.queue.name)
            .field("pending", &self.pending())
            .finish()
    }
}

/// Handle to a background dispatcher. Dropping it stops the thread.
pub struct DispatcherHandle {
    worker: PeriodicWorker,
}

impl DispatcherHandle {
    /// Stop the dispatcher and wait for it to exit.
    pub fn stop(mut self) {
        self.worker.stop();
    }
}

impl std::fmt::Debug for DispatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherHandle")
            .field("running", &self.worker.is_running())
            .finish()
    }
}
