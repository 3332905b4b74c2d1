//! Debounced write-back trigger
//!
//! Every index mutation arms the scheduler, which slides a single pending
//! deadline forward to now + delay. The flush action runs only once a full
//! quiet period has passed since the last arm; it never fires early and
//! never on a fixed cadence.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

/// One-shot, re-armable deadline driving the directory flush.
pub(crate) struct FlushScheduler {
    shared: Arc<Shared>,
    delay: Duration,
}

struct Shared {
    /// The single pending deadline; `None` while nothing is scheduled
    deadline: Mutex<Option<Instant>>,
    armed: Notify,
    shutdown: AtomicBool,
}

impl FlushScheduler {
    /// Spawn the waiter task. `flush` runs each time a deadline expires
    /// without having been re-armed in the meantime.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn<F>(delay: Duration, flush: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let shared = Arc::new(Shared {
            deadline: Mutex::new(None),
            armed: Notify::new(),
            shutdown: AtomicBool::new(false),
        });
        tokio::spawn(run(Arc::clone(&shared), flush));
        Self { shared, delay }
    }

    /// Schedule (or reschedule) the flush for one full delay from now.
    pub(crate) fn arm(&self) {
        *self.shared.deadline.lock() = Some(Instant::now() + self.delay);
        self.shared.armed.notify_one();
        trace!("flush deadline armed");
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
        self.shared.armed.notify_one();
    }
}

async fn run<F: Fn()>(shared: Arc<Shared>, flush: F) {
    loop {
        if shared.shutdown.load(Ordering::Relaxed) {
            break;
        }
        let deadline = *shared.deadline.lock();
        match deadline {
            None => shared.armed.notified().await,
            Some(when) => {
                tokio::select! {
                    () = tokio::time::sleep_until(when) => {
                        // Fire only if this is still the pending deadline;
                        // an arm during the sleep moved it forward.
                        let fire = {
                            let mut slot = shared.deadline.lock();
                            if *slot == Some(when) {
                                *slot = None;
                                true
                            } else {
                                false
                            }
                        };
                        if fire && !shared.shutdown.load(Ordering::Relaxed) {
                            flush();
                        }
                    }
                    () = shared.armed.notified() => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use tokio::time::{advance, sleep};

    fn counting_scheduler(delay: Duration) -> (FlushScheduler, Arc<AtomicU64>) {
        let fired = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&fired);
        let scheduler = FlushScheduler::spawn(delay, move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        (scheduler, fired)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_quiet_period() {
        let (scheduler, fired) = counting_scheduler(Duration::from_secs(20));

        scheduler.arm();
        sleep(Duration::from_secs(21)).await;

        assert_eq!(fired.load(Ordering::Relaxed), 1);

        // No further fires without a new arm.
        sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_slides_deadline() {
        let (scheduler, fired) = counting_scheduler(Duration::from_secs(20));

        scheduler.arm();
        advance(Duration::from_secs(15)).await;
        assert_eq!(fired.load(Ordering::Relaxed), 0);

        // Re-arm 5 s before the pending deadline; nothing fires at it.
        scheduler.arm();
        advance(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::Relaxed), 0);

        sleep(Duration::from_secs(11)).await;
        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_pending_fire() {
        let (scheduler, fired) = counting_scheduler(Duration::from_secs(20));

        scheduler.arm();
        drop(scheduler);
        sleep(Duration::from_secs(60)).await;

        assert_eq!(fired.load(Ordering::Relaxed), 0);
    }
}
