//! Admission control for worker threads.
//!
//! Live workers are counted in a shared atomic. Each worker holds a
//! [`WorkerSlot`] that gives its place back when dropped, so the count stays
//! right even if the handler panics. There is no condition variable: a caller
//! at the cap polls, sleeping `interval` between checks.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WorkerGauge {
    live: Arc<AtomicUsize>,
    max: usize,
    interval: Duration,
}

/// One admitted worker.
#[derive(Debug)]
pub struct WorkerSlot {
    live: Arc<AtomicUsize>,
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

impl WorkerGauge {
    /// A cap of zero is treated as one.
    pub fn new(max: usize, interval: Duration) -> Self {
        Self {
            live: Arc::new(AtomicUsize::new(0)),
            max: max.max(1),
            interval,
        }
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn is_full(&self) -> bool {
        self.live() >= self.max
    }

    /// Block until fewer than `max` workers are live.
    pub fn wait_for_slot(&self) {
        while self.is_full() {
            log::warn!("Too many threads! {} live, limit {}", self.live(), self.max);
            thread::sleep(self.interval);
        }
    }

    fn acquire(&self) -> WorkerSlot {
        self.live.fetch_add(1, Ordering::AcqRel);
        WorkerSlot {
            live: Arc::clone(&self.live),
        }
    }

    /// Run `work` on a new named thread that holds a slot until it returns.
    pub fn spawn<F>(&self, name: &str, work: F) -> io::Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        let slot = self.acquire();
        thread::Builder::new().name(name.to_string()).spawn(move || {
            let _slot = slot;
            work();
        })
    }
}
