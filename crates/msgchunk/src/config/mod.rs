// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! msgchunk configuration - single source of truth for limits and defaults.
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: Compile-time defaults (broker frame size, registry limits)
//! - **Level 2 (Dynamic)**: [`ProducerConfig`] / [`ConsumerConfig`] built in code
//!   or loaded from YAML (feature `config-loaders`)
//!
//! # Example
//!
//! ```
//! use msgchunk::config::{ConsumerConfig, ProducerConfig};
//! use std::time::Duration;
//!
//! let producer = ProducerConfig::new("ingest-1")
//!     .enable_chunking(true)
//!     .disable_batching(true)
//!     .chunk_max_message_size(64 * 1024);
//! assert!(producer.validate().is_ok());
//!
//! let consumer = ConsumerConfig::default()
//!     .max_pending_chunked_message(16)
//!     .expire_time_of_incomplete_chunk(Duration::from_secs(30));
//! assert!(consumer.validate().is_ok());
//! ```

#[cfg(feature = "config-loaders")]
mod loader;

#[cfg(feature = "config-loaders")]
pub use loader::{ClientConfigDocument, YamlConsumerConfig, YamlProducerConfig};

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

// =======================================================================
// Frame sizing
// =======================================================================

/// Default maximum frame payload accepted by the broker (1 MiB).
///
/// Used when the transport does not advertise its own limit.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Bytes reserved per chunk frame for message metadata and chunk header.
///
/// Subtracted from the server-advertised maximum, never from a
/// user-configured chunk size.
pub const CHUNK_METADATA_OVERHEAD: usize = 256;

/// Upper bound on the total size a first chunk may declare.
///
/// The reassembly buffer is allocated from this declaration, so anything
/// above it is rejected as an invalid frame.
pub const DEFAULT_MAX_REASSEMBLED_SIZE: usize = 64 * 1024 * 1024;

// =======================================================================
// Producer defaults
// =======================================================================

/// Default bound of the producer pending queue (frames awaiting the broker).
pub const DEFAULT_MAX_PENDING_MESSAGES: usize = 1000;

// =======================================================================
// Consumer defaults
// =======================================================================

/// Default number of concurrently pending incomplete chunk groups.
pub const DEFAULT_MAX_PENDING_CHUNKED_MESSAGES: usize = 100;

/// Default time-to-live of an incomplete chunk group.
pub const DEFAULT_EXPIRE_INCOMPLETE_CHUNK: Duration = Duration::from_secs(60);

/// Default capacity of the consumer delivery queue.
pub const DEFAULT_RECEIVER_QUEUE_SIZE: usize = 1000;

/// Upper bound on the sweep period when none is configured.
const MAX_DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

static PRODUCER_NAME_SEQ: AtomicU64 = AtomicU64::new(0);

/// Generate a process-unique producer name.
pub fn generate_producer_name() -> String {
    let n = PRODUCER_NAME_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("producer-{}-{}", std::process::id(), n)
}

// =======================================================================
// ProducerConfig
// =======================================================================

/// Producer-side configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerConfig {
    /// Producer name; prefixes every chunk group key.
    pub producer_name: String,
    /// Split payloads above the effective chunk size into chunk groups.
    pub enable_chunking: bool,
    /// Disable whole-message batching (required when chunking).
    pub disable_batching: bool,
    /// User override of the chunk payload size.
    pub chunk_max_message_size: Option<usize>,
    /// Bound of the pending queue feeding the transport.
    pub max_pending_messages: usize,
    /// Block when the pending queue is full instead of failing fast.
    pub block_if_queue_full: bool,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            producer_name: generate_producer_name(),
            enable_chunking: false,
            disable_batching: false,
            chunk_max_message_size: None,
            max_pending_messages: DEFAULT_MAX_PENDING_MESSAGES,
            block_if_queue_full: true,
        }
    }
}

impl ProducerConfig {
    /// Create a configuration with defaults and the given producer name.
    pub fn new(producer_name: impl Into<String>) -> Self {
        Self {
            producer_name: producer_name.into(),
            ..Self::default()
        }
    }

    /// Enable or disable chunking.
    pub fn enable_chunking(mut self, enabled: bool) -> Self {
        self.enable_chunking = enabled;
        self
    }

    /// Enable or disable whole-message batching (inverted flag).
    pub fn disable_batching(mut self, disabled: bool) -> Self {
        self.disable_batching = disabled;
        self
    }

    /// Override the chunk payload size.
    pub fn chunk_max_message_size(mut self, size: usize) -> Self {
        self.chunk_max_message_size = Some(size);
        self
    }

    /// Set the pending queue bound.
    pub fn max_pending_messages(mut self, max: usize) -> Self {
        self.max_pending_messages = max;
        self
    }

    /// Block (true) or fail fast (false) when the pending queue is full.
    pub fn block_if_queue_full(mut self, block: bool) -> Self {
        self.block_if_queue_full = block;
        self
    }

    /// Check configuration consistency.
    ///
    /// Chunking and batching are mutually exclusive: a batch cannot be split
    /// without breaking batch framing.
    pub fn validate(&self) -> Result<()> {
        if self.producer_name.is_empty() {
            return Err(Error::Config("producer_name must not be empty".to_string()));
        }
        if self.enable_chunking && !self.disable_batching {
            return Err(Error::Config(
                "chunking is only supported with batching disabled".to_string(),
            ));
        }
        if self.max_pending_messages == 0 {
            return Err(Error::Config(
                "max_pending_messages must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// =======================================================================
// ConsumerConfig
// =======================================================================

/// Consumer-side configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Registry capacity: maximum concurrently pending incomplete groups.
    pub max_pending_chunked_message: usize,
    /// Time-to-live of an incomplete group, measured from creation.
    pub expire_time_of_incomplete_chunk: Duration,
    /// Acknowledge the frames of dropped groups so they are not redelivered.
    pub auto_ack_incomplete_chunk: bool,
    /// Capacity of the delivery queue.
    pub receiver_queue_size: usize,
    /// Largest total size a first chunk may declare.
    pub max_reassembled_size: usize,
    /// Background sweep period; `None` relies on lazy expiry only.
    pub expiry_sweep_interval: Option<Duration>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_pending_chunked_message: DEFAULT_MAX_PENDING_CHUNKED_MESSAGES,
            expire_time_of_incomplete_chunk: DEFAULT_EXPIRE_INCOMPLETE_CHUNK,
            auto_ack_incomplete_chunk: false,
            receiver_queue_size: DEFAULT_RECEIVER_QUEUE_SIZE,
            max_reassembled_size: DEFAULT_MAX_REASSEMBLED_SIZE,
            expiry_sweep_interval: Some(default_sweep_interval(DEFAULT_EXPIRE_INCOMPLETE_CHUNK)),
        }
    }
}

/// Sweep at half the TTL, capped at one second.
pub fn default_sweep_interval(ttl: Duration) -> Duration {
    (ttl / 2).min(MAX_DEFAULT_SWEEP_INTERVAL).max(Duration::from_millis(1))
}

impl ConsumerConfig {
    /// Set the registry capacity.
    pub fn max_pending_chunked_message(mut self, max: usize) -> Self {
        self.max_pending_chunked_message = max;
        self
    }

    /// Set the incomplete-group TTL (also re-derives the sweep period).
    pub fn expire_time_of_incomplete_chunk(mut self, ttl: Duration) -> Self {
        self.expire_time_of_incomplete_chunk = ttl;
        if self.expiry_sweep_interval.is_some() {
            self.expiry_sweep_interval = Some(default_sweep_interval(ttl));
        }
        self
    }

    /// Acknowledge frames of dropped groups.
    pub fn auto_ack_incomplete_chunk(mut self, enabled: bool) -> Self {
        self.auto_ack_incomplete_chunk = enabled;
        self
    }

    /// Set the delivery queue capacity.
    pub fn receiver_queue_size(mut self, size: usize) -> Self {
        self.receiver_queue_size = size;
        self
    }

    /// Set the reassembly size bound.
    pub fn max_reassembled_size(mut self, size: usize) -> Self {
        self.max_reassembled_size = size;
        self
    }

    /// Set (or disable with `None`) the background sweep period.
    pub fn expiry_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.expiry_sweep_interval = interval;
        self
    }

    /// Check configuration consistency.
    pub fn validate(&self) -> Result<()> {
        if self.max_pending_chunked_message == 0 {
            return Err(Error::Config(
                "max_pending_chunked_message must be > 0".to_string(),
            ));
        }
        if self.expire_time_of_incomplete_chunk.is_zero() {
            return Err(Error::Config(
                "expire_time_of_incomplete_chunk must be > 0".to_string(),
            ));
        }
        if self.receiver_queue_size == 0 {
            return Err(Error::Config("receiver_queue_size must be > 0".to_string()));
        }
        if self.max_reassembled_size == 0 {
            return Err(Error::Config(
                "max_reassembled_size must be > 0".to_string(),
            ));
        }
        if matches!(self.expiry_sweep_interval, Some(d) if d.is_zero()) {
            return Err(Error::Config(
                "expiry_sweep_interval must be > 0 when set".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_producer_defaults_are_valid() {
        let cfg = ProducerConfig::default();
        assert!(!cfg.enable_chunking);
        assert!(cfg.block_if_queue_full);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_chunking_with_batching_rejected() {
        let cfg = ProducerConfig::new("p").enable_chunking(true);
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));

        let cfg = cfg.disable_batching(true);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_producer_names_unique() {
        let a = generate_producer_name();
        let b = generate_producer_name();
        assert_ne!(a, b);
    }

    #[test]
    fn test_consumer_validation() {
        assert!(ConsumerConfig::default().validate().is_ok());
        assert!(ConsumerConfig::default()
            .max_pending_chunked_message(0)
            .validate()
            .is_err());
        assert!(ConsumerConfig::default()
            .expire_time_of_incomplete_chunk(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ConsumerConfig::default()
            .expiry_sweep_interval(Some(Duration::ZERO))
            .validate()
            .is_err());
    }

    #[test]
    fn test_sweep_interval_follows_ttl() {
        let cfg = ConsumerConfig::default()
            .expire_time_of_incomplete_chunk(Duration::from_millis(300));
        assert_eq!(cfg.expiry_sweep_interval, Some(Duration::from_millis(150)));

        let cfg = ConsumerConfig::default()
            .expiry_sweep_interval(None)
            .expire_time_of_incomplete_chunk(Duration::from_millis(300));
        assert_eq!(cfg.expiry_sweep_interval, None);
    }
}
