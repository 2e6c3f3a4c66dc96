//! The periodic side of the image pipeline.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use anyhow::{anyhow, Result};
use log::*;

use crate::coordinator::{ImageUploadCoordinator, ProcessOutcome};

const STACK_SIZE: usize = 16 * 1024;

/// Drains pending display operations and polls the dismiss timeout
pub struct DisplayLoop {
    coordinator: Arc<ImageUploadCoordinator>,
}

impl DisplayLoop {
    pub fn new(coordinator: Arc<ImageUploadCoordinator>) -> Self {
        Self { coordinator }
    }

    /// One iteration of the owning loop
    pub fn tick(&self) -> ProcessOutcome {
        let outcome = self
            .coordinator
            .process_pending(self.coordinator.is_update_in_progress());
        match &outcome {
            ProcessOutcome::Idle | ProcessOutcome::Deferred => {}
            ProcessOutcome::Shown { operation, height } => info!("display loop: operation {operation} shown ({height} rows)"),
            ProcessOutcome::Dismissed { operation, .. } => info!("display loop: operation {operation} dismissed"),
            ProcessOutcome::Failed { operation, reason } => error!("display loop: operation {operation} failed: {reason}"),
            ProcessOutcome::TimedOut => info!("display loop: image timed out"),
        }
        outcome
    }

    /// Run `tick` every `period` on a thread of its own
    pub fn spawn(self, period: Duration) -> Result<DisplayLoopHandle> {
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();
        let thread = std::thread::Builder::new()
            .name("display-loop".to_string())
            .stack_size(STACK_SIZE)
            .spawn(move || {
                info!("display loop started, period {}ms", period.as_millis());
                while running_clone.load(Ordering::SeqCst) {
                    self.tick();
                    std::thread::sleep(period);
                }
                info!("display loop stopped");
            })
            .map_err(|err| anyhow!("display loop thread error:{err:?}"))?;
        Ok(DisplayLoopHandle { running, thread })
    }
}

pub struct DisplayLoopHandle {
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl DisplayLoopHandle {
    pub fn is_running(&self) -> bool {
        !self.thread.is_finished()
    }

    pub fn stop(self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        self.thread
            .join()
            .map_err(|err| anyhow!("display loop panicked:{err:?}"))
    }
}
