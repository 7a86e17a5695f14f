use std::collections::HashMap;

/// Request-id correlation table for requests multiplexed over one connection.
///
/// Ids come from a single monotonically increasing counter shared by every
/// request the client writes, so an id is never reused within the client's
/// lifetime. The requester removes its own entry when it stops waiting, and
/// the reader drains the table when the connection goes away.
#[derive(Debug)]
pub(crate) struct Correlator<T> {
    next_id: u64,
    pending: HashMap<u64, T>,
}

impl<T> Correlator<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Reserve an id for a request whose reply is not tracked.
    pub(crate) fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Reserve an id and park `value` until the reply arrives.
    pub(crate) fn register(&mut self, value: T) -> u64 {
        let id = self.next_id();
        self.pending.insert(id, value);
        id
    }

    pub(crate) fn resolve(&mut self, id: u64) -> Option<T> {
        self.pending.remove(&id)
    }

    pub(crate) fn drain(&mut self) -> Vec<T> {
        self.pending.drain().map(|(_, value)| value).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}
