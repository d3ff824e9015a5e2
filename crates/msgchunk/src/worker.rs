// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Named background thread running a periodic tick.
//!
//! Used by the expiry sweeper and the loopback dispatcher. The tick reports
//! whether it found work; a busy tick runs again immediately, an idle tick
//! waits `interval` or until stopped.

use crate::error::Result;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// What a tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tick {
    /// Nothing to do; wait for the next interval.
    Idle,
    /// Work was done; tick again without waiting.
    Busy,
    /// Exit the thread.
    Stop,
}

struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

/// Owner of a periodic worker thread. Dropping it stops and joins the thread.
pub(crate) struct PeriodicWorker {
    signal: Arc<StopSignal>,
    thread: Option<JoinHandle<()>>,
    tag: &'static str,
}

impl PeriodicWorker {
    /// Spawn thread `name`, logging lifecycle under `[tag]`.
    pub(crate) fn spawn<F>(
        name: &str,
        tag: &'static str,
        interval: Duration,
        mut tick: F,
    ) -> Result<Self>
    where
        F: FnMut() -> Tick + Send + 'static,
    {
        let signal = Arc::new(StopSignal {
            stopped: Mutex::new(false),
            cond: Condvar::new(),
        });
        let thread_signal = signal.clone();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                log::debug!("[{}] Started with interval {:?}", tag, interval);

                let mut wait = true;
                loop {
                    {
                        let mut stopped = thread_signal.stopped.lock();
                        if wait && !*stopped {
                            thread_signal.cond.wait_for(&mut stopped, interval);
                        }
                        if *stopped {
                            break;
                        }
                    }
                    match tick() {
                        Tick::Idle => wait = true,
                        Tick::Busy => wait = false,
                        Tick::Stop => break,
                    }
                }

                log::debug!("[{}] Stopped", tag);
            })?;

        Ok(Self {
            signal,
            thread: Some(thread),
            tag,
        })
    }

    /// Whether the thread has not been stopped yet.
    pub(crate) fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Signal the thread and wait for it to exit. Idempotent.
    pub(crate) fn stop(&mut self) {
        *self.signal.stopped.lock() = true;
        self.signal.cond.notify_all();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::warn!("[{}] worker thread panicked", self.tag);
            }
        }
    }
}

impl Drop for PeriodicWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn test_idle_ticks_are_spaced() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let mut worker = PeriodicWorker::spawn("test-idle", "test", Duration::from_millis(20), move || {
            counter.fetch_add(1, Ordering::Relaxed);
            Tick::Idle
        })
        .expect("spawn");

        std::thread::sleep(Duration::from_millis(110));
        worker.stop();
        let n = ticks.load(Ordering::Relaxed);
        assert!((1..=6).contains(&n), "ticks = {}", n);
        assert!(!worker.is_running());
    }

    #[test]
    fn test_busy_ticks_run_back_to_back() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let _worker = PeriodicWorker::spawn("test-busy", "test", Duration::from_secs(60), move || {
            if counter.fetch_add(1, Ordering::Relaxed) < 100 {
                Tick::Busy
            } else {
                Tick::Stop
            }
        })
        .expect("spawn");

        let deadline = Instant::now() + Duration::from_secs(5);
        while ticks.load(Ordering::Relaxed) <= 100 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(ticks.load(Ordering::Relaxed) > 100);
    }

    #[test]
    fn test_stop_wakes_sleeping_worker() {
        let mut worker =
            PeriodicWorker::spawn("test-stop", "test", Duration::from_secs(60), || Tick::Idle)
                .expect("spawn");
        let start = Instant::now();
        worker.stop();
        worker.stop();
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
