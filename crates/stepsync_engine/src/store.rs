//! Remote cumulative store abstraction.

use crate::error::{SubscriptionError, SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stepsync_protocol::CumulativeRecord;
use tokio::sync::{mpsc, Semaphore};
use tracing::debug;

/// Stream of record changes delivered by a store subscription.
pub type RecordStream = mpsc::UnboundedReceiver<Result<CumulativeRecord, SubscriptionError>>;

/// The durable store that holds one cumulative record per user.
///
/// This trait abstracts the backend, allowing for different implementations
/// (document store, HTTP API, in-memory for testing).
///
/// `write` must support at-least-once delivery. Each write fully replaces the
/// record, which makes a duplicated write idempotent.
#[async_trait]
pub trait RemoteCumulativeStore: Send + Sync {
    /// Subscribes to changes of a user's record.
    ///
    /// The current record, if one exists, is delivered first.
    async fn subscribe(&self, user_id: &str) -> SyncResult<RecordStream>;

    /// Replaces a user's record. `Ok` is SYNC_OK, `Err` is SYNC_FAILED.
    async fn write(&self, user_id: &str, record: CumulativeRecord) -> SyncResult<()>;

    /// Reads a user's record, `None` if it has never been written.
    async fn fetch(&self, user_id: &str) -> SyncResult<Option<CumulativeRecord>>;
}

type Subscriber = mpsc::UnboundedSender<Result<CumulativeRecord, SubscriptionError>>;

/// An in-memory store for tests, demos and the CLI.
///
/// Besides the store contract it can:
/// - fail upcoming writes with queued errors
/// - hold writes in flight until released, to exercise concurrent callers
/// - apply records from "another device" and fan them out to subscribers
#[derive(Debug, Default)]
pub struct MemoryCumulativeStore {
    records: RwLock<HashMap<String, CumulativeRecord>>,
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
    accepted_writes: RwLock<Vec<CumulativeRecord>>,
    write_attempts: AtomicU64,
    failures: Mutex<VecDeque<SyncError>>,
    write_gate: Mutex<Option<Arc<Semaphore>>>,
    blocked_writes: AtomicUsize,
    offline: AtomicBool,
}

impl MemoryCumulativeStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds a record.
    pub fn with_record(record: CumulativeRecord) -> Self {
        let store = Self::new();
        store
            .records
            .write()
            .insert(record.user_id.clone(), record);
        store
    }

    /// Returns the stored record for a user.
    pub fn record(&self, user_id: &str) -> Option<CumulativeRecord> {
        self.records.read().get(user_id).cloned()
    }

    /// Returns every write the store accepted, in order.
    pub fn accepted_writes(&self) -> Vec<CumulativeRecord> {
        self.accepted_writes.read().clone()
    }

    /// Returns the number of write attempts, failed ones included.
    pub fn write_attempts(&self) -> u64 {
        self.write_attempts.load(Ordering::SeqCst)
    }

    /// Queues an error returned by the next write.
    pub fn push_failure(&self, error: SyncError) {
        self.failures.lock().push_back(error);
    }

    /// Makes the next `count` writes fail with a retryable error.
    pub fn fail_next_writes(&self, count: usize, message: &str) {
        let mut failures = self.failures.lock();
        for _ in 0..count {
            failures.push_back(SyncError::store_retryable(message));
        }
    }

    /// Sets whether the store is reachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Holds every subsequent write until `release_writes` or `resume_writes`.
    pub fn pause_writes(&self) {
        let mut gate = self.write_gate.lock();
        if gate.is_none() {
            *gate = Some(Arc::new(Semaphore::new(0)));
        }
    }

    /// Lets `count` held writes proceed while keeping the store paused.
    pub fn release_writes(&self, count: usize) {
        if let Some(gate) = self.write_gate.lock().as_ref() {
            gate.add_permits(count);
        }
    }

    /// Lets all held and future writes proceed.
    pub fn resume_writes(&self) {
        if let Some(gate) = self.write_gate.lock().take() {
            gate.close();
        }
    }

    /// Returns how many writes are currently held by `pause_writes`.
    pub fn blocked_writes(&self) -> usize {
        self.blocked_writes.load(Ordering::SeqCst)
    }

    /// Waits until at least `count` writes are held.
    pub async fn wait_for_blocked_writes(&self, count: usize) {
        while self.blocked_writes() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Stores a record written by another writer and notifies subscribers.
    pub fn apply_external(&self, record: CumulativeRecord) {
        debug!(user_id = %record.user_id, steps = record.steps, "external write");
        self.records
            .write()
            .insert(record.user_id.clone(), record.clone());
        self.notify(&record.user_id, Ok(record.clone()));
    }

    /// Sends a failure to every subscriber of a user.
    pub fn fail_subscription(&self, user_id: &str, error: SubscriptionError) {
        self.notify(user_id, Err(error));
    }

    /// Drops every subscription, ending the subscribers' streams.
    pub fn close_subscriptions(&self) {
        self.subscribers.write().clear();
    }

    /// Returns the number of live subscriptions for a user.
    pub fn subscriber_count(&self, user_id: &str) -> usize {
        self.subscribers
            .read()
            .get(user_id)
            .map_or(0, |subs| subs.iter().filter(|tx| !tx.is_closed()).count())
    }

    fn notify(&self, user_id: &str, item: Result<CumulativeRecord, SubscriptionError>) {
        let mut subscribers = self.subscribers.write();
        if let Some(subs) = subscribers.get_mut(user_id) {
            subs.retain(|tx| tx.send(item.clone()).is_ok());
        }
    }

    fn check_online(&self) -> SyncResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(SyncError::store_retryable("store unreachable"))
        } else {
            Ok(())
        }
    }

    async fn pass_gate(&self) {
        let gate = self.write_gate.lock().clone();
        if let Some(gate) = gate {
            let _held = HeldWrite::new(&self.blocked_writes);
            // A closed gate means writes were resumed.
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }
}

/// Counts a held write; released on drop so a cancelled write is uncounted.
struct HeldWrite<'a>(&'a AtomicUsize);

impl<'a> HeldWrite<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for HeldWrite<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteCumulativeStore for MemoryCumulativeStore {
    async fn subscribe(&self, user_id: &str) -> SyncResult<RecordStream> {
        self.check_online()?;
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(current) = self.record(user_id) {
            // The receiver is still in scope, so this cannot fail.
            let _ = tx.send(Ok(current));
        }
        self.subscribers
            .write()
            .entry(user_id.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    async fn write(&self, user_id: &str, record: CumulativeRecord) -> SyncResult<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        self.check_online()?;

        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        if record.user_id != user_id {
            return Err(SyncError::store_fatal(format!(
                "record for {} written under {}",
                record.user_id, user_id
            )));
        }
        record.validate()?;

        self.records
            .write()
            .insert(user_id.to_string(), record.clone());
        self.accepted_writes.write().push(record.clone());
        self.notify(user_id, Ok(record));
        Ok(())
    }

    async fn fetch(&self, user_id: &str) -> SyncResult<Option<CumulativeRecord>> {
        self.check_online()?;
        Ok(self.record(user_id))
    }
}
