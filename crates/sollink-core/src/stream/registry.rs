use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};

use crate::error::SubscriptionError;

use super::notification::{Notification, SubscriptionKind};

/// Sending half of one live subscription.
#[derive(Debug)]
pub(crate) struct Entry {
    pub(crate) local_id: u64,
    pub(crate) kind: SubscriptionKind,
    pub(crate) generation: u64,
    results: mpsc::Sender<Notification>,
    error: oneshot::Sender<SubscriptionError>,
}

pub(crate) enum Delivery {
    Delivered,
    /// The result queue is full; the subscription must be terminated.
    Overflow { capacity: usize },
    /// The handle was dropped without unsubscribing.
    Gone,
}

impl Entry {
    pub(crate) fn new(
        local_id: u64,
        kind: SubscriptionKind,
        generation: u64,
        results: mpsc::Sender<Notification>,
        error: oneshot::Sender<SubscriptionError>,
    ) -> Self {
        Self {
            local_id,
            kind,
            generation,
            results,
            error,
        }
    }

    pub(crate) fn deliver(&self, notification: Notification) -> Delivery {
        match self.results.try_send(notification) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Overflow {
                capacity: self.results.max_capacity(),
            },
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Gone,
        }
    }

    /// Terminate with `err`. The error is stored before the result queue
    /// closes, so the handle sees every buffered value first and then `err`.
    pub(crate) fn fail(self, err: SubscriptionError) {
        let _ = self.error.send(err);
    }
}

/// Live subscriptions of the current connection, keyed by the server-assigned
/// id.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: HashMap<u64, Entry>,
}

impl Registry {
    pub(crate) fn insert(&mut self, remote_id: u64, entry: Entry) -> Option<Entry> {
        self.entries.insert(remote_id, entry)
    }

    pub(crate) fn get(&self, remote_id: u64) -> Option<&Entry> {
        self.entries.get(&remote_id)
    }

    pub(crate) fn remove(&mut self, remote_id: u64) -> Option<Entry> {
        self.entries.remove(&remote_id)
    }

    /// Remove the entry only if it still belongs to the given handle. Remote
    /// ids can be reused by the server once released, so the local id and
    /// generation are checked too.
    pub(crate) fn release(
        &mut self,
        remote_id: u64,
        local_id: u64,
        generation: u64,
    ) -> Option<Entry> {
        match self.entries.get(&remote_id) {
            Some(entry) if entry.local_id == local_id && entry.generation == generation => {
                self.entries.remove(&remote_id)
            }
            _ => None,
        }
    }

    pub(crate) fn drain(&mut self) -> Vec<Entry> {
        self.entries.drain().map(|(_, entry)| entry).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::notification::SlotNotification;

    fn slot(n: u64) -> Notification {
        Notification::Slot(SlotNotification {
            slot: n,
            parent: n.saturating_sub(1),
            root: 0,
        })
    }

    fn entry(
        local_id: u64,
        capacity: usize,
    ) -> (Entry, mpsc::Receiver<Notification>, oneshot::Receiver<SubscriptionError>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (err_tx, err_rx) = oneshot::channel();
        (
            Entry::new(local_id, SubscriptionKind::Slot, 1, tx, err_tx),
            rx,
            err_rx,
        )
    }

    #[test]
    fn full_queue_reports_overflow() {
        let (entry, _rx, _err) = entry(1, 2);
        assert!(matches!(entry.deliver(slot(1)), Delivery::Delivered));
        assert!(matches!(entry.deliver(slot(2)), Delivery::Delivered));
        assert!(matches!(
            entry.deliver(slot(3)),
            Delivery::Overflow { capacity: 2 }
        ));
    }

    #[test]
    fn dropped_handle_is_gone() {
        let (entry, rx, _err) = entry(1, 2);
        drop(rx);
        assert!(matches!(entry.deliver(slot(1)), Delivery::Gone));
    }

    #[test]
    fn buffered_values_precede_terminal_error() {
        let (entry, mut rx, mut err) = entry(1, 4);
        entry.deliver(slot(1));
        entry.deliver(slot(2));
        entry.fail(SubscriptionError::ConnectionLost { generation: 1 });

        assert_eq!(rx.try_recv().expect("first"), slot(1));
        assert_eq!(rx.try_recv().expect("second"), slot(2));
        assert!(rx.try_recv().is_err());
        assert_eq!(
            err.try_recv().expect("error stored"),
            SubscriptionError::ConnectionLost { generation: 1 }
        );
    }

    #[test]
    fn release_checks_ownership() {
        let mut registry = Registry::default();
        let (first, _rx1, _e1) = entry(10, 1);
        registry.insert(7, first);

        assert!(registry.release(7, 11, 1).is_none());
        assert!(registry.release(7, 10, 2).is_none());
        assert!(registry.release(7, 10, 1).is_some());
        assert!(registry.release(7, 10, 1).is_none());
        assert_eq!(registry.len(), 0);
    }
}
