// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Background expiry sweep for incomplete chunk groups.
//!
//! Lookups already expire stale groups lazily; the sweeper reclaims groups
//! that nobody looks up again (e.g. the rest of the chunks never arrive).

use super::registry::ChunkContextRegistry;
use crate::error::Result;
use crate::worker::{PeriodicWorker, Tick};
use std::sync::Arc;
use std::time::Duration;

/// Handle to a running expiry sweeper thread.
///
/// Dropping the handle stops the thread and joins it.
pub struct ExpirySweeperHandle {
    worker: PeriodicWorker,
    interval: Duration,
}

impl ExpirySweeperHandle {
    /// Sweep period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stop the sweeper and wait for it to exit.
    pub fn stop(mut self) {
        self.worker.stop();
    }
}

impl std::fmt::Debug for ExpirySweeperHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpirySweeperHandle")
            .field("interval", &self.interval)
            .field("running", &self.worker.is_running())
            .finish()
    }
}

/// Spawn a thread that calls [`ChunkContextRegistry::sweep_expired`] every `interval`.
///
/// The thread holds only a weak reference, so it exits on its own once the
/// registry is dropped.
///
/// # Errors
///
/// `IoError` if the OS refuses to spawn the thread.
pub fn spawn_expiry_sweeper(
    registry: &Arc<ChunkContextRegistry>,
    interval: Duration,
) -> Result<ExpirySweeperHandle> {
    let registry = Arc::downgrade(registry);
    let worker = PeriodicWorker::spawn("msgchunk-expiry", "expiry-sweeper", interval, move || {
        match registry.upgrade() {
            Some(registry) => {
                registry.sweep_expired();
                Tick::Idle
            }
            None => Tick::Stop,
        }
    })?;

    Ok(ExpirySweeperHandle { worker, interval })
}
