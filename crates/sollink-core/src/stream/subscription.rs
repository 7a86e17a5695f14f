use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::error::{CoreError, SubscriptionError};

use super::client::Inner;
use super::notification::{Notification, SubscriptionKind};

/// Handle to one live subscription.
///
/// Notifications are delivered in arrival order through a bounded queue.
/// When the subscription ends (connection loss, overflow, close, or the
/// server completing a one-shot subscription) every value already queued is
/// still delivered, followed by the terminal error. Subscriptions do not
/// survive a reconnect; callers re-subscribe.
pub struct Subscription {
    inner: Arc<Inner>,
    local_id: u64,
    remote_id: u64,
    kind: SubscriptionKind,
    generation: u64,
    results: mpsc::Receiver<Notification>,
    error: oneshot::Receiver<SubscriptionError>,
    terminal: Option<SubscriptionError>,
    released: bool,
}

impl Subscription {
    pub(crate) fn new(
        inner: Arc<Inner>,
        local_id: u64,
        remote_id: u64,
        kind: SubscriptionKind,
        generation: u64,
        results: mpsc::Receiver<Notification>,
        error: oneshot::Receiver<SubscriptionError>,
    ) -> Self {
        Self {
            inner,
            local_id,
            remote_id,
            kind,
            generation,
            results,
            error,
            terminal: None,
            released: false,
        }
    }

    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    /// Server-assigned subscription id.
    pub fn remote_id(&self) -> u64 {
        self.remote_id
    }

    /// Connection generation this subscription was opened on.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait for the next notification, the terminal error, or `cancel`.
    ///
    /// A queued value wins over a ready `cancel`. On cancellation the
    /// subscription is released server-side (best effort) and `Cancelled` is
    /// returned.
    pub async fn recv<F: Future>(&mut self, cancel: F) -> Result<Notification, CoreError> {
        if let Some(err) = &self.terminal {
            return Err(err.clone().into());
        }

        tokio::select! {
            biased;
            item = self.results.recv() => match item {
                Some(notification) => Ok(notification),
                None => Err(self.take_terminal().into()),
            },
            _ = cancel => {
                self.unsubscribe().await;
                Err(CoreError::Cancelled)
            }
        }
    }

    /// Release the subscription. Idempotent; only sent on the connection that
    /// created it.
    pub async fn unsubscribe(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.inner
            .release(self.remote_id, self.local_id, self.generation)
            .await;
    }

    fn take_terminal(&mut self) -> SubscriptionError {
        let err = self.error.try_recv().unwrap_or(SubscriptionError::Closed);
        self.terminal = Some(err.clone());
        err
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.released {
            self.inner
                .release_detached(self.remote_id, self.local_id, self.generation);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("remote_id", &self.remote_id)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
