//! Cooperative stop signalling for the simulation's timer loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// One-way stop flag shared between a component and its loops.
///
/// Once stopped it stays stopped. Loops check [`is_stopped`] as the first
/// thing they do after every wake-up and may also race their waits against
/// [`stopped`] so they exit promptly instead of at the next period.
///
/// [`is_stopped`]: StopSignal::is_stopped
/// [`stopped`]: StopSignal::stopped
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    /// A signal that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Returns `true` only for the call that actually stopped.
    pub fn stop(&self) -> bool {
        let first = !self.stopped.swap(true, Ordering::AcqRel);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    /// Whether the signal has fired.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Resolve once the flag is raised.
    pub async fn stopped(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }

    /// Sleep for `period` unless stopped first.
    ///
    /// Returns `true` when the caller should go on with its next cycle.
    pub async fn sleep(&self, period: Duration) -> bool {
        tokio::select! {
            () = self.stopped() => false,
            () = tokio::time::sleep(period) => !self.is_stopped(),
        }
    }
}
