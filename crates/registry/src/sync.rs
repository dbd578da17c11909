//! Event-log replay with resumable offsets.

use crate::client::Eth1Client;
use crate::events::{Event, EventData};
use ssv_storage::{StoreError, SyncOffsetStore};
use ssv_tasks::{ExecutionQueue, SubjectError, TaskError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Block number of the first event the production contract emitted.
pub const DEFAULT_SYNC_OFFSET: u64 = 0x4e706f;

/// Subscriber name used on the contract client's event subject.
const SUBSCRIBER: &str = "registry-sync";

/// Delay between handler invocations on the execution queue.
const HANDLER_INTERVAL: Duration = Duration::from_millis(5);

/// Subscription depth for replayed history. The subject drops values for
/// lagging subscribers, so the replay channel must absorb a full burst of
/// historical events between collector wake-ups.
const REPLAY_CHANNEL_CAPACITY: usize = 4096;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to register on contract events subject: {0}")]
    Subscription(#[from] SubjectError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{failures} event handlers failed during sync")]
    HandlerFailures { failures: usize },
    #[error("contract client error: {0}")]
    Client(String),
    #[error("event handler error: {0}")]
    Handler(String),
}

/// Handler invoked for every replayed event, at least once.
pub type RegistryEventHandler = Arc<dyn Fn(Event) -> Result<(), RegistryError> + Send + Sync>;

/// Decide where a replay starts, by priority:
/// 1. the last persisted offset,
/// 2. an explicitly provided offset (from config),
/// 3. the contract genesis block.
pub fn determine_sync_offset(store: &SyncOffsetStore, explicit: Option<u64>) -> u64 {
    match store.get_offset() {
        Ok(Some(offset)) => {
            debug!(offset, "using last sync offset");
            return offset;
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "failed to get sync offset"),
    }
    if let Some(offset) = explicit {
        debug!(offset, "using provided sync offset");
        return offset;
    }
    debug!(offset = DEFAULT_SYNC_OFFSET, "using default sync offset");
    DEFAULT_SYNC_OFFSET
}

/// Replay contract events from the stored offset to the chain head.
///
/// Every event is fed through a serialising execution queue into
/// `handler`. When the replay's `SyncEnded` event arrives the queue is
/// drained; any handler failure aborts with a single aggregated error and
/// leaves the offset untouched. On success the offset advances to the
/// highest replayed block, and if the head moved during the replay the
/// whole procedure runs once more from the new offset.
pub async fn sync_registry_events(
    client: Arc<dyn Eth1Client>,
    offset_store: Arc<SyncOffsetStore>,
    explicit_offset: Option<u64>,
    handler: RegistryEventHandler,
) -> Result<(), RegistryError> {
    loop {
        let offset = determine_sync_offset(&offset_store, explicit_offset);
        info!(offset, "syncing registry contract events");

        // A subscription failure is fatal: without it we would silently
        // miss events.
        let rx = client
            .events_subject()
            .register_with_capacity(SUBSCRIBER, REPLAY_CHANNEL_CAPACITY)?;
        let queue = ExecutionQueue::new(HANDLER_INTERVAL);
        let collector = spawn_collector(rx, queue.clone(), handler.clone());

        let replay_result = client.sync_history(offset).await;
        client.events_subject().deregister(SUBSCRIBER);
        let sync_ended = collector.await.unwrap_or(None);

        if let Err(e) = replay_result {
            queue.stop();
            return Err(e);
        }

        queue.wait().await;
        let failures = queue.errors();
        queue.stop();
        if !failures.is_empty() {
            error!(count = failures.len(), "failed to handle events from sync");
            return Err(RegistryError::HandlerFailures {
                failures: failures.len(),
            });
        }

        let new_offset = upgrade_sync_offset(&offset_store, offset, sync_ended)?;

        // Events may have fired while we were replaying; close the window.
        match client.current_block().await {
            Err(e) => {
                warn!(error = %e, "could not get current block to fetch events fired during sync");
                return Ok(());
            }
            Ok(head) if head > new_offset => {
                info!(head, offset = new_offset, "head moved during sync, re-entering");
                continue;
            }
            Ok(_) => return Ok(()),
        }
    }
}

/// Collect events from the subject into the execution queue until the
/// terminal `SyncEnded` arrives or the subject closes.
fn spawn_collector(
    mut rx: tokio::sync::mpsc::Receiver<Event>,
    queue: ExecutionQueue,
    handler: RegistryEventHandler,
) -> JoinHandle<Option<Event>> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if event.is_sync_ended() {
                return Some(event);
            }
            debug!(block_number = event.log.block_number, "got event from registry sync");
            let handler = handler.clone();
            queue.queue(async move {
                handler(event).map_err(|e| TaskError::new(e.to_string()))
            });
        }
        None
    })
}

/// Advance the persisted offset after a successful replay. Returns the
/// offset now in effect.
fn upgrade_sync_offset(
    store: &SyncOffsetStore,
    offset: u64,
    sync_ended: Option<Event>,
) -> Result<u64, RegistryError> {
    let Some(Event {
        data: EventData::SyncEnded { logs, success },
        ..
    }) = sync_ended
    else {
        return Ok(offset);
    };
    if logs.is_empty() {
        return Ok(offset);
    }
    if !success {
        warn!("could not parse all events from the contract");
        return Ok(offset);
    }
    let highest = logs.iter().map(|l| l.block_number).max().unwrap_or(offset);
    if highest > offset {
        debug!(offset = highest, "upgrading sync offset");
        store.save_offset(highest)?;
        return Ok(highest);
    }
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{OperatorShare, RawLog};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use ssv_storage::MemDb;
    use ssv_tasks::Subject;
    use std::collections::VecDeque;

    fn raw_log(block_number: u64) -> RawLog {
        RawLog {
            block_number,
            tx_hash: vec![0xaa],
            log_index: 0,
        }
    }

    fn operator_added(block_number: u64) -> Event {
        Event {
            log: raw_log(block_number),
            data: EventData::OperatorAdded {
                id: block_number,
                pubkey: vec![1, 2, 3],
                name: format!("operator-{block_number}"),
            },
        }
    }

    fn validator_added(block_number: u64) -> Event {
        Event {
            log: raw_log(block_number),
            data: EventData::ValidatorAdded {
                pubkey: vec![9, 9],
                shares: vec![OperatorShare {
                    operator_pubkey: vec![1],
                    share_pubkey: vec![2],
                    encrypted_key: vec![3],
                }],
            },
        }
    }

    fn sync_ended(blocks: &[u64], success: bool) -> Event {
        Event {
            log: raw_log(blocks.iter().copied().max().unwrap_or(0)),
            data: EventData::SyncEnded {
                logs: blocks.iter().map(|b| raw_log(*b)).collect(),
                success,
            },
        }
    }

    /// Scripted contract client: each `sync_history` call publishes the
    /// next batch; each `current_block` call pops the next head answer.
    struct MockClient {
        subject: Arc<Subject<Event>>,
        batches: Mutex<VecDeque<Vec<Event>>>,
        heads: Mutex<VecDeque<Result<u64, String>>>,
        sync_calls: Mutex<Vec<u64>>,
    }

    impl MockClient {
        fn new(batches: Vec<Vec<Event>>, heads: Vec<Result<u64, String>>) -> Arc<Self> {
            Arc::new(Self {
                subject: Arc::new(Subject::new()),
                batches: Mutex::new(batches.into()),
                heads: Mutex::new(heads.into()),
                sync_calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Eth1Client for MockClient {
        fn events_subject(&self) -> Arc<Subject<Event>> {
            self.subject.clone()
        }

        async fn sync_history(&self, from_block: u64) -> Result<(), RegistryError> {
            self.sync_calls.lock().push(from_block);
            let batch = self
                .batches
                .lock()
                .pop_front()
                .ok_or_else(|| RegistryError::Client("no more batches".into()))?;
            for event in batch {
                self.subject.notify(event);
            }
            Ok(())
        }

        async fn current_block(&self) -> Result<u64, RegistryError> {
            self.heads
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err("no head scripted".into()))
                .map_err(RegistryError::Client)
        }
    }

    fn recording_handler() -> (RegistryEventHandler, Arc<Mutex<Vec<u64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let handler: RegistryEventHandler = Arc::new(move |event: Event| {
            seen_clone.lock().push(event.log.block_number);
            Ok(())
        });
        (handler, seen)
    }

    #[tokio::test]
    async fn replays_all_events_and_persists_offset() {
        let start = DEFAULT_SYNC_OFFSET;
        let batch = vec![
            operator_added(start + 1),
            validator_added(start + 50),
            operator_added(start + 100),
            sync_ended(&[start + 1, start + 50, start + 100], true),
        ];
        let client = MockClient::new(vec![batch], vec![Ok(start + 100)]);
        let store = Arc::new(SyncOffsetStore::new(Arc::new(MemDb::new())));
        let (handler, seen) = recording_handler();

        sync_registry_events(client.clone(), store.clone(), None, handler)
            .await
            .unwrap();

        assert_eq!(*seen.lock(), vec![start + 1, start + 50, start + 100]);
        assert_eq!(store.get_offset().unwrap(), Some(start + 100));
        assert_eq!(*client.sync_calls.lock(), vec![start]);
    }

    #[tokio::test]
    async fn reenters_when_head_moved_during_replay() {
        let start = 1000u64;
        let first = vec![
            operator_added(start + 10),
            operator_added(start + 100),
            sync_ended(&[start + 10, start + 100], true),
        ];
        let second = vec![
            operator_added(start + 110),
            sync_ended(&[start + 110], true),
        ];
        // Head is past the first batch once, then settled.
        let client = MockClient::new(
            vec![first, second],
            vec![Ok(start + 110), Ok(start + 110)],
        );
        let store = Arc::new(SyncOffsetStore::new(Arc::new(MemDb::new())));
        let (handler, seen) = recording_handler();

        sync_registry_events(client.clone(), store.clone(), Some(start), handler)
            .await
            .unwrap();

        assert_eq!(*seen.lock(), vec![start + 10, start + 100, start + 110]);
        assert_eq!(store.get_offset().unwrap(), Some(start + 110));
        // Second pass started from the first pass's persisted offset.
        assert_eq!(*client.sync_calls.lock(), vec![start, start + 100]);
    }

    #[tokio::test]
    async fn handler_failures_aggregate_and_block_offset_advance() {
        let start = 500u64;
        let batch = vec![
            operator_added(start + 1),
            operator_added(start + 2),
            operator_added(start + 3),
            sync_ended(&[start + 1, start + 2, start + 3], true),
        ];
        let client = MockClient::new(vec![batch], vec![Ok(start + 3)]);
        let store = Arc::new(SyncOffsetStore::new(Arc::new(MemDb::new())));

        let handler: RegistryEventHandler = Arc::new(|event: Event| {
            if event.log.block_number % 2 == 0 {
                Err(RegistryError::Handler("cannot decode share".into()))
            } else {
                Ok(())
            }
        });

        let err = sync_registry_events(client, store.clone(), Some(start), handler)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::HandlerFailures { failures: 1 }));
        // No partial offset advance on an unsuccessful batch.
        assert_eq!(store.get_offset().unwrap(), None);
    }

    #[tokio::test]
    async fn unsuccessful_sync_ended_keeps_offset() {
        let start = 700u64;
        let batch = vec![
            operator_added(start + 5),
            sync_ended(&[start + 5], false),
        ];
        // Head equals the explicit offset: the unparsed batch must not
        // trigger a re-entry loop.
        let client = MockClient::new(vec![batch], vec![Ok(start)]);
        let store = Arc::new(SyncOffsetStore::new(Arc::new(MemDb::new())));
        let (handler, _seen) = recording_handler();

        sync_registry_events(client, store.clone(), Some(start), handler)
            .await
            .unwrap();
        assert_eq!(store.get_offset().unwrap(), None);
    }

    #[tokio::test]
    async fn unavailable_head_exits_cleanly() {
        let start = 300u64;
        let batch = vec![
            operator_added(start + 1),
            sync_ended(&[start + 1], true),
        ];
        let client = MockClient::new(vec![batch], vec![Err("eth1 node is down".into())]);
        let store = Arc::new(SyncOffsetStore::new(Arc::new(MemDb::new())));
        let (handler, seen) = recording_handler();

        sync_registry_events(client, store.clone(), Some(start), handler)
            .await
            .unwrap();
        assert_eq!(*seen.lock(), vec![start + 1]);
        // The offset from the successful batch still persisted.
        assert_eq!(store.get_offset().unwrap(), Some(start + 1));
    }

    #[tokio::test]
    async fn offset_priority_stored_then_explicit_then_default() {
        let store = SyncOffsetStore::new(Arc::new(MemDb::new()));
        assert_eq!(determine_sync_offset(&store, None), DEFAULT_SYNC_OFFSET);
        assert_eq!(determine_sync_offset(&store, Some(42)), 42);
        store.save_offset(99).unwrap();
        assert_eq!(determine_sync_offset(&store, Some(42)), 99);
    }
}
