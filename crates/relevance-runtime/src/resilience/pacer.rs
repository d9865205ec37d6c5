//! Minimum spacing between backend calls.
//!
//! One pacer is shared by every worker in a run. Each caller reserves the
//! next free slot under the lock and then sleeps outside it, so concurrent
//! workers queue up `interval` apart instead of bursting.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::cancel::{CancellationSignal, Cancelled};

#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Claim the next call slot and return how long to wait for it.
    ///
    /// The first reservation of a run never waits.
    pub fn reserve(&self) -> Duration {
        let now = Instant::now();
        let mut next = self.next_slot.lock();
        let slot = match *next {
            Some(at) if at > now => at,
            _ => now,
        };
        *next = Some(slot + self.interval);
        slot.saturating_duration_since(now)
    }

    /// Wait for a call slot, or until the run is cancelled.
    pub async fn wait(&self, cancel: &CancellationSignal) -> Result<(), Cancelled> {
        let delay = self.reserve();
        if !delay.is_zero() {
            tracing::debug!(delay = ?delay, "Pacing backend call");
        }
        cancel.sleep(delay).await
    }
}
