//! Message broker for the consensus engine.
//!
//! Messages can arrive at any time; the next round's messages can come
//! "early" because other nodes may change rounds before this one. The
//! broker lets the single-threaded instance pull exactly the messages it
//! needs by index, which also removes concurrency from the instance
//! itself: many network listeners push, one instance pulls.
//!
//! # Purge semantics
//!
//! [`MessageQueue::purge`] empties exactly one bucket. A message indexed
//! under several keys stays reachable through its other buckets; the
//! consensus engine relies on this when it purges `change-round-all/...`
//! after a partial-quorum bump while the round-specific change-round
//! buckets keep serving the full-quorum path. A message whose only index
//! was the purged bucket stays in the id lookup until the queue is dropped;
//! queues live per duty, so this is bounded.

use parking_lot::Mutex;
use ssv_types::NetworkEnvelope;
use std::collections::{HashMap, VecDeque};
use tracing::trace;
use uuid::Uuid;

pub mod indexes;

pub use indexes::{
    change_round_all_index_key, decided_index_key, ibft_index_key, sig_index_key, sync_index_key,
};

/// Computes zero or more index keys for a message.
pub type IndexFn = Box<dyn Fn(&NetworkEnvelope) -> Vec<String> + Send + Sync>;

struct MessageContainer {
    msg: NetworkEnvelope,
    indexes: Vec<String>,
}

#[derive(Default)]
struct Inner {
    /// FIFO bucket of container ids per index key.
    buckets: HashMap<String, VecDeque<Uuid>>,
    /// Authoritative container lookup.
    by_id: HashMap<Uuid, MessageContainer>,
}

/// Multi-index in-memory message queue. Thread safe.
pub struct MessageQueue {
    index_fns: Vec<IndexFn>,
    inner: Mutex<Inner>,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue {
    /// A queue with the standard index families registered.
    pub fn new() -> Self {
        Self {
            index_fns: vec![
                indexes::ibft_message_index(),
                indexes::change_round_all_index(),
                indexes::sig_message_index(),
                indexes::decided_message_index(),
                indexes::sync_message_index(),
            ],
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Register an additional index function applied to every new message.
    pub fn add_index_fn(&mut self, f: IndexFn) {
        self.index_fns.push(f);
    }

    /// Index a message and append it to each computed bucket.
    pub fn add(&self, msg: NetworkEnvelope) {
        let indexes: Vec<String> = self.index_fns.iter().flat_map(|f| f(&msg)).collect();
        if indexes.is_empty() {
            trace!("message matched no index, dropping");
            return;
        }
        let id = Uuid::new_v4();
        let mut inner = self.inner.lock();
        for idx in &indexes {
            inner.buckets.entry(idx.clone()).or_default().push_back(id);
        }
        inner.by_id.insert(id, MessageContainer { msg, indexes });
    }

    /// Pop the oldest message tagged with `index`, removing it from every
    /// bucket it was indexed under.
    pub fn pop(&self, index: &str) -> Option<NetworkEnvelope> {
        let mut inner = self.inner.lock();
        loop {
            let id = inner.buckets.get_mut(index)?.pop_front()?;
            // Ids left behind by purge have no container anymore; skip them.
            let Some(container) = inner.by_id.remove(&id) else {
                continue;
            };
            for idx in &container.indexes {
                if idx.as_str() != index {
                    if let Some(bucket) = inner.buckets.get_mut(idx) {
                        bucket.retain(|other| *other != id);
                    }
                }
            }
            return Some(container.msg);
        }
    }

    /// Snapshot of all messages in a bucket, keyed by container id. No
    /// mutation.
    pub fn peek_all(&self, index: &str) -> HashMap<String, NetworkEnvelope> {
        let inner = self.inner.lock();
        let Some(bucket) = inner.buckets.get(index) else {
            return HashMap::new();
        };
        bucket
            .iter()
            .filter_map(|id| {
                inner
                    .by_id
                    .get(id)
                    .map(|c| (id.to_string(), c.msg.clone()))
            })
            .collect()
    }

    /// Number of messages in a bucket.
    pub fn count(&self, index: &str) -> usize {
        let inner = self.inner.lock();
        inner
            .buckets
            .get(index)
            .map(|b| b.iter().filter(|id| inner.by_id.contains_key(id)).count())
            .unwrap_or(0)
    }

    /// Total number of distinct messages held.
    pub fn len(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty one bucket. Other buckets are untouched; see the module docs
    /// for the exact semantics.
    pub fn purge(&self, index: &str) {
        let mut inner = self.inner.lock();
        let Some(bucket) = inner.buckets.get_mut(index) else {
            return;
        };
        let ids: Vec<Uuid> = bucket.drain(..).collect();
        // Drop containers that are no longer reachable from any bucket.
        for id in ids {
            let reachable = inner
                .by_id
                .get(&id)
                .map(|c| {
                    c.indexes.iter().any(|idx| {
                        idx.as_str() != index
                            && inner
                                .buckets
                                .get(idx)
                                .is_some_and(|b| b.contains(&id))
                    })
                })
                .unwrap_or(false);
            if !reachable {
                inner.by_id.remove(&id);
            }
        }
    }

    /// Remove a set of messages from every bucket and the id lookup.
    pub fn delete_by_ids(&self, ids: &[String]) {
        let mut inner = self.inner.lock();
        for id_str in ids {
            let Ok(id) = Uuid::parse_str(id_str) else {
                continue;
            };
            let Some(container) = inner.by_id.remove(&id) else {
                continue;
            };
            for idx in &container.indexes {
                if let Some(bucket) = inner.buckets.get_mut(idx) {
                    bucket.retain(|other| *other != id);
                }
            }
        }
    }
}
