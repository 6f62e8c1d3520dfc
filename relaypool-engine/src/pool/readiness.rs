//! Readiness latch
//!
//! Two views of the same fact. `is_ready` flips the moment the first probe
//! succeeds; the latch that releases waiters flips when the batch holding
//! that success completes. Neither is ever reset.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug)]
pub struct Readiness {
    ready: AtomicBool,
    latch: watch::Sender<bool>,
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

impl Readiness {
    #[must_use]
    pub fn new() -> Self {
        let (latch, _) = watch::channel(false);
        Self {
            ready: AtomicBool::new(false),
            latch,
        }
    }

    /// Record that a relay has worked at least once
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Release every current and future waiter. Returns whether this call
    /// flipped the latch.
    pub fn announce(&self) -> bool {
        self.mark_ready();
        self.latch.send_if_modified(|announced| {
            if *announced {
                false
            } else {
                *announced = true;
                true
            }
        })
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn is_announced(&self) -> bool {
        *self.latch.borrow()
    }

    /// Wait for the latch, giving up after `timeout`. Returns whether the
    /// latch is set.
    pub async fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut rx = self.latch.subscribe();
        let released = async move {
            let result = rx.wait_for(|announced| *announced).await;
            result.is_ok()
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, released).await.unwrap_or(false),
            None => released.await,
        }
    }
}
