use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// # NewRequestEvent
///
/// An edge-triggered wake-up gate shared by request producers and the
/// virtual engine loops.
///
/// ## Semantics
///
/// Every [`signal`](Self::signal) advances a generation counter and wakes all
/// parked waiters. A waiter passes the last generation it observed to
/// [`wait`](Self::wait) and returns as soon as the counter has moved past it,
/// so there is nothing to reset between cycles and no window in which a signal
/// can be lost between checking a flag and clearing it.
///
/// ## Implementation Details
///
/// `wait` registers its interest with the [`Notify`] *before* reading the
/// counter. A signal racing with that read either bumps the counter first (and
/// is seen by the read) or fires `notify_waiters` after registration (and wakes
/// the registered future).
#[derive(Debug, Default)]
pub struct NewRequestEvent {
    generation: AtomicU64,
    notify: Notify,
}

impl NewRequestEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the gate for every current waiter. Never blocks.
    ///
    /// Returns the new generation.
    pub fn signal(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.notify.notify_waiters();
        generation
    }

    /// The current generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Suspend until the generation advances past `seen` or `timeout` elapses.
    ///
    /// Returns the generation observed on wake-up, which equals `seen` only if
    /// the wait timed out.
    pub async fn wait(&self, seen: u64, timeout: Option<Duration>) -> u64 {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let current = self.generation();
            if current != seen {
                return current;
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.generation();
                    }
                }
                None => notified.await,
            }
        }
    }
}
