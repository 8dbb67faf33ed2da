//! Periodic sync scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::coordinator::Coordinator;
use super::cycle::SyncCycle;

/// Runs a cycle on a fixed interval and whenever a sync is requested.
///
/// The first cycle starts immediately.
pub struct SyncScheduler {
    coordinator: Coordinator,
    cycle: Arc<SyncCycle>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl SyncScheduler {
    pub fn new(coordinator: Coordinator, cycle: Arc<SyncCycle>, interval: Duration) -> Self {
        Self {
            coordinator,
            cycle,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawns the sync loop. Requests arriving during a cycle are coalesced
    /// into one follow-up cycle.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let coordinator = self.coordinator.clone();
        let cycle = Arc::clone(&self.cycle);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                if shutdown.load(Ordering::Acquire) {
                    break;
                }

                tokio::select! {
                    _ = timer.tick() => {},
                    msg = trigger_rx.recv() => match msg {
                        Ok(()) | Err(RecvError::Lagged(_)) => {
                            tracing::info!("sync requested");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }

                if shutdown.load(Ordering::Acquire) {
                    break;
                }
                while trigger_rx.try_recv().is_ok() {}

                let mut workspace = coordinator.exclusive().await;
                if let Err(e) = cycle.run(&mut workspace).await {
                    tracing::error!(error = %e, "sync cycle failed");
                }
            }
            tracing::debug!("sync scheduler stopped");
        })
    }

    /// Signals the loop to stop after the current cycle. A trigger wakes it
    /// if it is waiting.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}
