//! Pub-sub subject with dynamic named subscribers.
//!
//! A `Subject` is a first-class object passed by reference; there is no
//! process-wide registry. Fan-out is best effort over bounded channels:
//! when a subscriber's channel is full the value is dropped for that
//! subscriber (drop-newest), so slow consumers never block producers.

use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

/// Default per-subscriber channel capacity.
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubjectError {
    #[error("subscriber {0:?} already registered")]
    DuplicateSubscriber(String),
}

/// A pub-sub subject over values of type `T`.
pub struct Subject<T: Clone + Send + 'static> {
    subscribers: RwLock<HashMap<String, mpsc::Sender<T>>>,
}

impl<T: Clone + Send + 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Subject<T> {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a named subscriber with the default channel capacity.
    pub fn register(&self, name: &str) -> Result<mpsc::Receiver<T>, SubjectError> {
        self.register_with_capacity(name, DEFAULT_CAPACITY)
    }

    /// Register a named subscriber with an explicit channel capacity.
    /// The capacity bounds how far the subscriber may lag before values
    /// are dropped for it.
    pub fn register_with_capacity(
        &self,
        name: &str,
        capacity: usize,
    ) -> Result<mpsc::Receiver<T>, SubjectError> {
        let mut subs = self.subscribers.write();
        if subs.contains_key(name) {
            return Err(SubjectError::DuplicateSubscriber(name.to_string()));
        }
        let (tx, rx) = mpsc::channel(capacity);
        subs.insert(name.to_string(), tx);
        Ok(rx)
    }

    /// Remove a subscriber. Returns whether it existed.
    pub fn deregister(&self, name: &str) -> bool {
        self.subscribers.write().remove(name).is_some()
    }

    /// Fan a value out to all subscribers, best effort.
    pub fn notify(&self, value: T) {
        let mut closed = Vec::new();
        {
            let subs = self.subscribers.read();
            for (name, tx) in subs.iter() {
                match tx.try_send(value.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        trace!(subscriber = %name, "subscriber lagging, dropping value");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        closed.push(name.clone());
                    }
                }
            }
        }
        if !closed.is_empty() {
            let mut subs = self.subscribers.write();
            for name in closed {
                subs.remove(&name);
            }
        }
    }

    /// Number of live subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
