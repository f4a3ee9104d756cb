//! Cooperative stop signal shared by every worker of a node.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

#[derive(Default)]
struct StopperInner {
    stopped: AtomicBool,
    notify: Notify,
}

/// Shared stop flag. Loops poll [`Stopper::stopped`] at their head and
/// select on [`Stopper::wait`] at every blocking point.
#[derive(Clone, Default)]
pub struct Stopper {
    inner: Arc<StopperInner>,
}

impl Stopper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag and wake every waiter. Idempotent.
    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::SeqCst) {
            warn!("Stop requested");
        }
        self.inner.notify.notify_waiters();
    }

    pub fn stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Resolves once [`Stopper::stop`] has been called.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.stopped() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for Stopper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stopper").field("stopped", &self.stopped()).finish()
    }
}
