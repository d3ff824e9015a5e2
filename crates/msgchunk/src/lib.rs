// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # msgchunk - Message chunking for pub/sub clients
//!
//! Lets a producer publish payloads larger than the broker's maximum frame
//! size by splitting them into an ordered chunk group, and lets a consumer
//! reassemble those groups under bounded memory.
//!
//! ## Quick Start
//!
//! ```rust
//! use msgchunk::config::{ConsumerConfig, ProducerConfig};
//! use msgchunk::transport::LoopbackBroker;
//! use msgchunk::{Consumer, Producer, ProducerMessage, Result};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! fn main() -> Result<()> {
//!     let broker = LoopbackBroker::new(1024);
//!
//!     let consumer = Consumer::new(ConsumerConfig::default(), Arc::new(broker.clone()))?;
//!     broker.subscribe(consumer.handler());
//!
//!     let link = broker.create_producer_link("ingest-1", 64)?;
//!     let producer = Producer::new(
//!         ProducerConfig::new("ingest-1")
//!             .enable_chunking(true)
//!             .disable_batching(true),
//!         link,
//!     )?;
//!
//!     // 4 KiB against a 1 KiB frame limit: sent as a chunk group.
//!     let id = producer.send(ProducerMessage::new(vec![42u8; 4096]))?;
//!     assert!(id.is_chunked());
//!
//!     broker.dispatch();
//!     let msg = consumer.receive_timeout(Duration::from_secs(1))?;
//!     assert_eq!(msg.payload().len(), 4096);
//!     consumer.ack(&msg)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |  Producer::send                                                     |
//! |    size check -> ChunkSplitter -> FrameSink::enqueue (all or none)  |
//! +---------------------------------------------------------------------+
//! |  Transport (FrameSink / FrameHandler / AckSink, LoopbackBroker)     |
//! +---------------------------------------------------------------------+
//! |  Consumer (FrameHandler)                                            |
//! |    ChunkReassembler -> ChunkContextRegistry (capacity + TTL)        |
//! |    -> delivery queue -> receive() -> ack()                          |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`chunk`] - splitter, bounded registry, reassembler, expiry sweeper
//! - [`config`] - limits, producer/consumer configuration, YAML loading
//! - [`transport`] - transport traits and the in-memory loopback broker
//! - [`metrics`] - chunking counters (evictions, expiries, corruption)

/// Chunk splitting, partial-group registry and reassembly.
pub mod chunk;
/// Limits, defaults and producer/consumer configuration.
pub mod config;
/// Consumer-side frame intake and delivery.
mod consumer;
/// Error type.
pub mod error;
/// Message and message-id types.
mod message;
/// Chunking counters.
pub mod metrics;
/// Producer-side send path.
mod producer;
/// Transport traits and loopback broker.
pub mod transport;
mod worker;

pub use config::{ConsumerConfig, ProducerConfig};
pub use consumer::Consumer;
pub use error::{Error, Result};
pub use message::{Message, MessageId, MessageMetadata, ProducerMessage};
pub use metrics::{ChunkMetrics, ChunkMetricsSnapshot};
pub use producer::Producer;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
