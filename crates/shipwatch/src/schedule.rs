//! Recurring cycle driver with a single-flight guard.
//!
//! A tick that fires while the previous cycle is still running is skipped,
//! never run concurrently: publish state and the checksum cache are owned by
//! one cycle at a time.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::reconcile::Watchdog;

/// Busy flag admitting at most one holder at a time.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the flag, or `None` if someone already holds it.
    pub fn try_acquire(&self) -> Option<FlightGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the flag on drop, including when the cycle panics.
#[derive(Debug)]
pub struct FlightGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Call `cycle` on a blocking thread every `interval`, starting immediately,
/// until `shutdown` resolves. The in-flight cycle is awaited before
/// returning. Returns how many cycles were started.
pub async fn run_every<F, S>(interval: Duration, shutdown: S, cycle: F) -> u64
where
    F: Fn() + Send + Sync + 'static,
    S: Future<Output = ()>,
{
    let flight = SingleFlight::new();
    let cycle = Arc::new(cycle);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    let mut started = 0u64;
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                let Some(guard) = flight.try_acquire() else {
                    warn!("previous cycle still running; skipping tick");
                    continue;
                };
                started += 1;
                let cycle = Arc::clone(&cycle);
                in_flight = Some(tokio::task::spawn_blocking(move || {
                    let _guard = guard;
                    cycle();
                }));
            }
        }
    }

    if let Some(handle) = in_flight
        && let Err(err) = handle.await
    {
        error!(error = %err, "cycle task failed");
    }
    started
}

/// Drive `watchdog` on `interval` until `shutdown` resolves.
pub async fn watch<S>(watchdog: Watchdog, interval: Duration, shutdown: S) -> u64
where
    S: Future<Output = ()>,
{
    let watchdog = Arc::new(Mutex::new(watchdog));
    info!(interval = %humantime::format_duration(interval), "watching for releases");

    run_every(interval, shutdown, move || {
        let mut watchdog = watchdog.lock().unwrap_or_else(PoisonError::into_inner);
        // Cycle errors are logged inside the cycle span; the next tick retries.
        let _ = watchdog.run_cycle();
    })
    .await
}
