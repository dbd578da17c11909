//! Serialising execution queue.
//!
//! Tasks run strictly one at a time on a dedicated worker with a
//! configurable inter-task delay. `queue_distinct` deduplicates by key
//! against both queued and currently-running tasks, which is what prevents
//! concurrent setup for the same validator. Task errors are accumulated and
//! never stop the worker.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tracing::trace;

/// Error produced by a queued task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TaskError(pub String);

impl TaskError {
    pub fn new(msg: impl Into<String>) -> Self {
        TaskError(msg.into())
    }
}

type TaskFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send>>;

struct QueuedTask {
    key: Option<String>,
    task: TaskFuture,
}

struct State {
    pending: VecDeque<QueuedTask>,
    running_key: Option<String>,
    running: bool,
    errors: Vec<TaskError>,
    stopped: bool,
    /// pending + running, mirrored into the watch channel for `wait`.
    outstanding: usize,
}

struct Inner {
    state: Mutex<State>,
    wake: Notify,
    outstanding_tx: watch::Sender<usize>,
    interval: Duration,
}

/// A serialising async task runner.
///
/// Cloning is cheap; all clones share the same worker and state.
#[derive(Clone)]
pub struct ExecutionQueue {
    inner: Arc<Inner>,
}

impl ExecutionQueue {
    /// Create a queue and spawn its worker. `interval` is the delay between
    /// consecutive tasks.
    pub fn new(interval: Duration) -> Self {
        let (outstanding_tx, _) = watch::channel(0usize);
        let inner = Arc::new(Inner {
            state: Mutex::new(State {
                pending: VecDeque::new(),
                running_key: None,
                running: false,
                errors: Vec::new(),
                stopped: false,
                outstanding: 0,
            }),
            wake: Notify::new(),
            outstanding_tx,
            interval,
        });
        tokio::spawn(worker(Arc::downgrade(&inner)));
        Self { inner }
    }

    /// Enqueue a task.
    pub fn queue<F>(&self, task: F)
    where
        F: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.push(None, Box::pin(task));
    }

    /// Enqueue a task unless one with the same key is already queued or
    /// running. Returns whether the task was accepted.
    pub fn queue_distinct<F>(&self, task: F, key: &str) -> bool
    where
        F: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        {
            let state = self.inner.state.lock();
            let duplicate = state.running_key.as_deref() == Some(key)
                || state
                    .pending
                    .iter()
                    .any(|t| t.key.as_deref() == Some(key));
            if duplicate {
                trace!(key, "skipping duplicate task");
                return false;
            }
        }
        self.push(Some(key.to_string()), Box::pin(task));
        true
    }

    fn push(&self, key: Option<String>, task: TaskFuture) {
        {
            let mut state = self.inner.state.lock();
            if state.stopped {
                return;
            }
            state.pending.push_back(QueuedTask { key, task });
            state.outstanding += 1;
            self.inner.outstanding_tx.send_replace(state.outstanding);
        }
        self.inner.wake.notify_one();
    }

    /// Wait until the queue is empty and no task is running.
    pub async fn wait(&self) {
        let mut rx = self.inner.outstanding_tx.subscribe();
        // Ignore a closed channel: the worker only exits once drained.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Drain the errors accumulated since the last call.
    pub fn errors(&self) -> Vec<TaskError> {
        std::mem::take(&mut self.inner.state.lock().errors)
    }

    /// Number of queued plus running tasks.
    pub fn len(&self) -> usize {
        self.inner.state.lock().outstanding
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard pending tasks and stop the worker. The currently running
    /// task, if any, finishes first.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            state.stopped = true;
            state.pending.clear();
            state.outstanding = usize::from(state.running);
            self.inner.outstanding_tx.send_replace(state.outstanding);
        }
        self.inner.wake.notify_one();
    }
}

async fn worker(weak: Weak<Inner>) {
    loop {
        let inner = match weak.upgrade() {
            Some(inner) => inner,
            None => return,
        };

        let next = {
            let mut state = inner.state.lock();
            if state.stopped {
                return;
            }
            let task = state.pending.pop_front();
            if let Some(t) = &task {
                state.running = true;
                state.running_key = t.key.clone();
            }
            task
        };

        match next {
            Some(queued) => {
                let result = queued.task.await;
                {
                    let mut state = inner.state.lock();
                    state.running = false;
                    state.running_key = None;
                    state.outstanding = state.outstanding.saturating_sub(1);
                    if let Err(e) = result {
                        state.errors.push(e);
                    }
                    inner.outstanding_tx.send_replace(state.outstanding);
                }
                let interval = inner.interval;
                drop(inner);
                tokio::time::sleep(interval).await;
            }
            None => {
                // Bounded idle wait so the worker notices when every queue
                // handle has been dropped without an explicit stop.
                let wake = inner.wake.notified();
                tokio::select! {
                    _ = wake => {}
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                }
                drop(inner);
            }
        }
    }
}
