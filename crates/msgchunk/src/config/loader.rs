// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! YAML producer/consumer configuration loader.
//!
//! # Example YAML
//!
//! ```yaml
//! # msgchunk.yaml
//! producer:
//!   producer_name: ingest-1
//!   enable_chunking: true
//!   disable_batching: true
//!   chunk_max_message_size: 65536
//!   max_pending_messages: 500
//!   block_if_queue_full: false
//!
//! consumer:
//!   max_pending_chunked_message: 16
//!   expire_time_of_incomplete_chunk_ms: 30000
//!   auto_ack_incomplete_chunk: true
//!   expiry_sweep_interval_ms: 500
//! ```
//!
//! Omitted fields keep their defaults from [`ProducerConfig`] and
//! [`ConsumerConfig`].

use super::{default_sweep_interval, ConsumerConfig, ProducerConfig};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Root YAML document.
#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfigDocument {
    /// Producer section.
    pub producer: Option<YamlProducerConfig>,
    /// Consumer section.
    pub consumer: Option<YamlConsumerConfig>,
}

/// Producer section in YAML format.
#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct YamlProducerConfig {
    pub producer_name: Option<String>,
    pub enable_chunking: Option<bool>,
    pub disable_batching: Option<bool>,
    pub chunk_max_message_size: Option<usize>,
    pub max_pending_messages: Option<usize>,
    pub block_if_queue_full: Option<bool>,
}

/// Consumer section in YAML format.
#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct YamlConsumerConfig {
    pub max_pending_chunked_message: Option<usize>,
    /// Incomplete-group TTL in milliseconds
    pub expire_time_of_incomplete_chunk_ms: Option<u64>,
    pub auto_ack_incomplete_chunk: Option<bool>,
    pub receiver_queue_size: Option<usize>,
    pub max_reassembled_size: Option<usize>,
    /// Sweep period in milliseconds; 0 disables the background sweep
    pub expiry_sweep_interval_ms: Option<u64>,
}

impl ClientConfigDocument {
    /// Load a configuration document from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::ConfigFileNotFound(path.display().to_string()));
        }
        let yaml_content = fs::read_to_string(path)?;
        Self::parse_yaml(&yaml_content)
    }

    /// Parse YAML content.
    pub fn parse_yaml(yaml_content: &str) -> Result<Self> {
        serde_yaml::from_str(yaml_content)
            .map_err(|e| Error::Config(format!("Failed to parse YAML: {}", e)))
    }

    /// Resolve the producer section over defaults and validate it.
    pub fn producer_config(&self) -> Result<ProducerConfig> {
        let mut cfg = ProducerConfig::default();
        if let Some(ref p) = self.producer {
            if let Some(ref name) = p.producer_name {
                cfg.producer_name = name.clone();
            }
            if let Some(v) = p.enable_chunking {
                cfg.enable_chunking = v;
            }
            if let Some(v) = p.disable_batching {
                cfg.disable_batching = v;
            }
            if p.chunk_max_message_size.is_some() {
                cfg.chunk_max_message_size = p.chunk_max_message_size;
            }
            if let Some(v) = p.max_pending_messages {
                cfg.max_pending_messages = v;
            }
            if let Some(v) = p.block_if_queue_full {
                cfg.block_if_queue_full = v;
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Resolve the consumer section over defaults and validate it.
    pub fn consumer_config(&self) -> Result<ConsumerConfig> {
        let mut cfg = ConsumerConfig::default();
        if let Some(ref c) = self.consumer {
            if let Some(v) = c.max_pending_chunked_message {
                cfg.max_pending_chunked_message = v;
            }
            if let Some(ms) = c.expire_time_of_incomplete_chunk_ms {
                let ttl = Duration::from_millis(ms);
                cfg.expire_time_of_incomplete_chunk = ttl;
                cfg.expiry_sweep_interval = Some(default_sweep_interval(ttl));
            }
            if let Some(v) = c.auto_ack_incomplete_chunk {
                cfg.auto_ack_incomplete_chunk = v;
            }
            if let Some(v) = c.receiver_queue_size {
                cfg.receiver_queue_size = v;
            }
            if let Some(v) = c.max_reassembled_size {
                cfg.max_reassembled_size = v;
            }
            match c.expiry_sweep_interval_ms {
                Some(0) => cfg.expiry_sweep_interval = None,
                Some(ms) => cfg.expiry_sweep_interval = Some(Duration::from_millis(ms)),
                None => {}
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }
}
