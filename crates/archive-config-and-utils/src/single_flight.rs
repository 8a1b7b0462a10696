//! Coalescing of concurrent operations on the same key.
//!
//! The first caller for a key becomes the leader and runs the operation.
//! Every later caller becomes a follower and waits for the leader's result.
//! There is no internal lock; owners keep a [`SingleFlight`] behind the same
//! mutex that guards the rest of their registry.

use std::collections::HashMap;
use std::hash::Hash;
use tokio::sync::oneshot;

/// A list of callers waiting for one result.
#[derive(Debug)]
pub struct Waiters<T: Clone> {
    senders: Vec<oneshot::Sender<T>>,
    resolved: bool,
}

impl<T: Clone> Default for Waiters<T> {
    fn default() -> Self {
        Self {
            senders: Vec::new(),
            resolved: false,
        }
    }
}

impl<T: Clone> Waiters<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new waiter.
    ///
    /// Attaching after the list was resolved yields a receiver that reports
    /// a closed channel.
    pub fn attach(&mut self) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        if !self.resolved {
            self.senders.push(tx);
        }
        rx
    }

    /// Deliver `value` to every waiter. Only the first call has an effect.
    ///
    /// Returns the number of waiters that were still listening.
    pub fn resolve(&mut self, value: T) -> usize {
        if self.resolved {
            return 0;
        }
        self.resolved = true;
        let mut delivered = 0;
        for tx in self.senders.drain(..) {
            if tx.send(value.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

/// Outcome of joining a key.
#[derive(Debug)]
pub enum Join<T> {
    /// No operation was running; the caller must run it and call
    /// [`SingleFlight::complete`].
    Leader(oneshot::Receiver<T>),
    /// An operation is already running; await the receiver.
    Follower(oneshot::Receiver<T>),
}

impl<T> Join<T> {
    pub fn is_leader(&self) -> bool {
        matches!(self, Join::Leader(_))
    }

    pub fn into_receiver(self) -> oneshot::Receiver<T> {
        match self {
            Join::Leader(rx) | Join::Follower(rx) => rx,
        }
    }
}

/// Map of in-flight operations keyed by `K`.
#[derive(Debug)]
pub struct SingleFlight<K, T: Clone> {
    inflight: HashMap<K, Waiters<T>>,
}

impl<K: Eq + Hash, T: Clone> Default for SingleFlight<K, T> {
    fn default() -> Self {
        Self {
            inflight: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, T: Clone> SingleFlight<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the operation for `key`, starting one if none is in flight.
    pub fn join(&mut self, key: K) -> Join<T> {
        match self.inflight.get_mut(&key) {
            Some(waiters) => Join::Follower(waiters.attach()),
            None => {
                let mut waiters = Waiters::new();
                let rx = waiters.attach();
                self.inflight.insert(key, waiters);
                Join::Leader(rx)
            }
        }
    }

    /// Finish the operation for `key`, delivering `value` to all joined callers.
    ///
    /// Returns the number of callers reached. Completing an unknown key is a no-op.
    pub fn complete(&mut self, key: &K, value: T) -> usize {
        match self.inflight.remove(key) {
            Some(mut waiters) => waiters.resolve(value),
            None => 0,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inflight.contains_key(key)
    }

    /// Drop the operation for `key` without a result. Waiters see a closed channel.
    pub fn remove(&mut self, key: &K) -> bool {
        self.inflight.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }
}
