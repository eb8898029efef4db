use tokio::sync::watch;

/// Caller-side cancellation for a relay.
///
/// Dropping the [`send_relay`](super::send_relay) future also cancels it; the context covers
/// callers that need to cancel from elsewhere while the future keeps running to clean up.
#[derive(Debug, Clone)]
pub struct RelayContext {
    cancelled: Option<watch::Receiver<bool>>,
}

/// Cancels every [`RelayContext`] created from it.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl RelayContext {
    /// A context that is never cancelled.
    #[must_use]
    pub fn background() -> Self {
        Self { cancelled: None }
    }

    /// A cancellable context and the handle that cancels it.
    #[must_use]
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (sender, receiver) = watch::channel(false);
        (Self { cancelled: Some(receiver) }, CancelHandle { sender })
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once the context is cancelled. Never resolves for a background context or
    /// after the handle was dropped without cancelling.
    pub async fn cancelled(&self) {
        let Some(receiver) = &self.cancelled else {
            return std::future::pending().await;
        };
        let mut receiver = receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for RelayContext {
    fn default() -> Self {
        Self::background()
    }
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}
