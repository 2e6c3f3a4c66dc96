//! Time and memory probes used by the coordinator.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use once_cell::sync::Lazy;

static BOOT: Lazy<Instant> = Lazy::new(Instant::now);

pub trait Clock: Send + Sync {
    /// Monotonic milliseconds
    fn now_ms(&self) -> u64;
}

/// Milliseconds since the process started
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        BOOT.elapsed().as_millis() as u64
    }
}

/// A clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

pub trait HeapProbe: Send + Sync {
    fn free_heap(&self) -> usize;
}

/// Host builds have no meaningful heap ceiling
#[derive(Debug, Clone, Copy, Default)]
pub struct UnlimitedHeap;

impl HeapProbe for UnlimitedHeap {
    fn free_heap(&self) -> usize {
        usize::MAX
    }
}
