use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Cloneable cancellation signal for a running engine. Once requested, the
/// abort stays set.
#[derive(Clone, Debug, Default)]
pub struct AbortHandle {
    abort_requested: Arc<AtomicBool>,
    abort_notify: Arc<Notify>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_abort(&self) {
        self.abort_requested.store(true, Ordering::SeqCst);
        self.abort_notify.notify_waiters();
    }

    pub fn is_abort_requested(&self) -> bool {
        self.abort_requested.load(Ordering::SeqCst)
    }

    /// Resolves once an abort has been requested.
    pub async fn cancelled(&self) {
        let notified = self.abort_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_abort_requested() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(flavor = "current_thread")]
    async fn cancelled_resolves_after_request() {
        let handle = AbortHandle::new();
        let remote = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            remote.request_abort();
        });
        tokio::time::timeout(Duration::from_secs(1), handle.cancelled())
            .await
            .expect("abort should wake the waiter");
        assert!(handle.is_abort_requested());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cancelled_returns_immediately_when_already_requested() {
        let handle = AbortHandle::new();
        handle.request_abort();
        tokio::time::timeout(Duration::from_millis(50), handle.cancelled())
            .await
            .expect("already-set abort should not block");
    }
}
