//! Collection-wide count of in-flight network operations.
//!
//! Feed fetches and image fetches each count as one operation from their
//! begin event to their completion event. The count lives inside a
//! `tokio::sync::watch` channel, which serializes every update, so an
//! external "network activity" indicator can subscribe and show busy
//! exactly while the count is above zero.

use tokio::sync::watch;

/// Reference-counted busy gate. Cloning yields another handle to the
/// same counter.
#[derive(Debug, Clone)]
pub struct NetworkActivity {
    count: watch::Sender<usize>,
}

impl NetworkActivity {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self { count }
    }

    /// Records the start of a network operation.
    pub fn begin(&self) {
        self.count.send_modify(|n| *n += 1);
    }

    /// Records the end of a network operation.
    ///
    /// An unmatched `end` leaves the count at zero rather than wrapping.
    pub fn end(&self) {
        self.count.send_if_modified(|n| {
            if *n == 0 {
                tracing::warn!("Network activity ended without a matching begin");
                return false;
            }
            *n -= 1;
            true
        });
    }

    pub fn in_flight(&self) -> usize {
        *self.count.borrow()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight() > 0
    }

    /// Receiver that observes every change of the in-flight count.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.count.subscribe()
    }
}

impl Default for NetworkActivity {
    fn default() -> Self {
        Self::new()
    }
}
