//! Fixed-cadence polling scheduler
//!
//! Fires once at start and then every interval, measured from the start
//! rather than from the end of the previous run. A firing that lands while
//! the previous run is still in flight is skipped, never queued.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Clears the in-flight flag when a run finishes, panics included
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PollingScheduler {
    interval: Duration,
    in_flight: Arc<AtomicBool>,
    skipped: AtomicU64,
}

impl PollingScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            in_flight: Arc::new(AtomicBool::new(false)),
            skipped: AtomicU64::new(0),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of firings dropped because a run was still in flight
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Drive `task` until `cancel` fires
    ///
    /// Each run is spawned as its own task so a slow run never delays the
    /// next tick. Runs already in flight at cancellation are left to finish.
    pub async fn run<F, Fut>(&self, task: F, cancel: CancellationToken)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Polling scheduler stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if self.in_flight.swap(true, Ordering::AcqRel) {
                        self.skipped.fetch_add(1, Ordering::Relaxed);
                        warn!("Previous polling cycle still running, skipping this one");
                        continue;
                    }

                    let guard = InFlight(Arc::clone(&self.in_flight));
                    let run = task();
                    tokio::spawn(async move {
                        let _guard = guard;
                        run.await;
                    });
                }
            }
        }
    }
}
