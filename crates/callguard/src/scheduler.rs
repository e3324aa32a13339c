//! Cancellable periodic background work
//!
//! The rate limiter's queue drain and the cache's snapshot writer both run
//! on a [`PeriodicTask`]. Tasks hold only what the callback captures, so
//! components pass a `Weak` handle and let the task end itself once the
//! component is gone.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long `stop` waits for an in-flight tick to finish
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether the periodic callback wants to keep running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickFlow {
    Continue,
    Stop,
}

/// A background loop that invokes a callback every `period`
///
/// The first invocation happens one full period after spawning. Missed ticks
/// are skipped rather than bunched.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    /// Spawn the loop on the current Tokio runtime.
    ///
    /// Outside a runtime nothing is spawned and a warning is logged; the
    /// returned task reports `is_running() == false`.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TickFlow> + Send + 'static,
    {
        let cancel = CancellationToken::new();

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(task = name, "no Tokio runtime available, periodic task not started");
                return Self { name, cancel, handle: Mutex::new(None) };
            }
        };

        let token = cancel.clone();
        let handle = runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(task = name, "periodic task cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        if tick().await == TickFlow::Stop {
                            debug!(task = name, "periodic task finished");
                            break;
                        }
                    }
                }
            }
        });

        debug!(task = name, ?period, "periodic task started");
        Self { name, cancel, handle: Mutex::new(Some(handle)) }
    }

    /// True while the background loop is alive
    pub fn is_running(&self) -> bool {
        self.handle.lock().as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Cancel the loop and wait for it to exit.
    ///
    /// Idempotent. A tick in progress is allowed to finish first.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let handle = self.handle.lock().take();
        let Some(handle) = handle else {
            return;
        };

        match tokio::time::timeout(STOP_TIMEOUT, handle).await {
            Ok(Ok(())) => debug!(task = self.name, "periodic task stopped"),
            Ok(Err(e)) => warn!(task = self.name, error = %e, "periodic task panicked"),
            Err(_) => warn!(task = self.name, "periodic task did not stop within timeout"),
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
