// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type shared by the producer and consumer sides.

/// Errors returned by msgchunk operations.
///
/// Producer-side errors are returned synchronously from `send()` and
/// construction. Consumer-side anomalies (corrupt sequences, eviction,
/// expiry) never fail a receive call; they only surface through metrics,
/// logs and the drop listener.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid or incompatible configuration (e.g. chunking with batching).
    Config(String),
    /// Configuration file not found at specified path.
    ConfigFileNotFound(String),

    // ========================================================================
    // Sizing Errors
    // ========================================================================
    /// Resolved chunk payload size is zero.
    InvalidChunkSize {
        /// User-configured chunk size, if any.
        configured: Option<usize>,
        /// Maximum frame size advertised by the transport.
        server_max: usize,
        /// Per-frame metadata reserve.
        overhead: usize,
    },
    /// Payload exceeds the maximum frame size and cannot be chunked.
    MessageTooLarge {
        /// Payload size in bytes.
        size: usize,
        /// Maximum accepted size in bytes.
        max: usize,
    },
    /// Payload would need more chunks than a frame can index.
    TooManyChunks {
        /// Chunks required.
        chunks: usize,
        /// Maximum representable chunk count.
        max: usize,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Pending queue is full and the producer is in fail-fast mode.
    ProducerQueueFull,
    /// Producer has been closed.
    ProducerClosed,
    /// Consumer has been closed.
    ConsumerClosed,
    /// Send operation failed.
    SendFailed(String),
    /// I/O error with underlying cause.
    IoError(std::io::Error),

    // ========================================================================
    // Consumer Errors
    // ========================================================================
    /// Chunk index did not follow the previous one for a live group.
    CorruptChunkSequence {
        /// Group key of the affected message.
        group: String,
        /// Next chunk index the group was waiting for.
        expected: u32,
        /// Chunk index that arrived.
        got: u32,
    },
    /// Frame failed validation before touching the registry.
    InvalidFrame(String),
    /// Receive deadline elapsed.
    Timeout,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::ConfigFileNotFound(path) => write!(f, "Config file not found: {}", path),
            Error::InvalidChunkSize {
                configured,
                server_max,
                overhead,
            } => write!(
                f,
                "Invalid effective chunk size (configured={:?}, server_max={}, overhead={})",
                configured, server_max, overhead
            ),
            Error::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes exceeds maximum {}", size, max)
            }
            Error::TooManyChunks { chunks, max } => {
                write!(f, "Too many chunks: {} exceeds maximum {}", chunks, max)
            }
            Error::ProducerQueueFull => write!(f, "Producer pending queue is full"),
            Error::ProducerClosed => write!(f, "Producer closed"),
            Error::ConsumerClosed => write!(f, "Consumer closed"),
            Error::SendFailed(msg) => write!(f, "Send failed: {}", msg),
            Error::IoError(e) => write!(f, "I/O error: {}", e),
            Error::CorruptChunkSequence {
                group,
                expected,
                got,
            } => write!(
                f,
                "Corrupt chunk sequence for group {}: expected chunk {}, got {}",
                group, expected, got
            ),
            Error::InvalidFrame(msg) => write!(f, "Invalid frame: {}", msg),
            Error::Timeout => write!(f, "Receive timeout"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e)
    }
}

/// Convenient alias for API results using the public `Error` type.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = Error::MessageTooLarge {
            size: 1_048_577,
            max: 1_048_576,
        };
        assert_eq!(
            e.to_string(),
            "Message too large: 1048577 bytes exceeds maximum 1048576"
        );

        let e = Error::CorruptChunkSequence {
            group: "p-1".to_string(),
            expected: 2,
            got: 4,
        };
        assert!(e.to_string().contains("expected chunk 2, got 4"));
    }

    #[test]
    fn test_io_error_source() {
        use std::error::Error as _;

        let e: Error = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(e.source().is_some());
        assert!(Error::Timeout.source().is_none());
    }
}
