//! Cumulative sync coordinator.

use crate::config::SyncConfig;
use crate::error::{SubscriptionError, SyncError, SyncResult};
use crate::ledger::{CoordinatorState, RemoteApply, SyncLedger};
use crate::store::RemoteCumulativeStore;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use stepsync_core::{CumulativeEvent, CumulativeFeed, UpdateSource};
use stepsync_protocol::{CumulativeRecord, HealthSample, SyncProposal};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Statistics about coordinator activity.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Proposals the store acknowledged.
    pub proposals_committed: u64,
    /// Writes the store failed or that were abandoned before it answered.
    pub write_failures: u64,
    /// Calls whose sample was folded into another caller's write.
    pub coalesced: u64,
    /// Retries performed by `update_with_retry`.
    pub retries: u64,
    /// Sensor counter drops clamped to a zero increment.
    pub counter_resets: u64,
    /// Remote records adopted as the cumulative base.
    pub remote_updates_applied: u64,
    /// Echoes of this coordinator's own superseded writes that were dropped.
    pub stale_remote_records: u64,
    /// Errors reported by the remote subscription.
    pub subscription_errors: u64,
    /// Time of the last acknowledged write.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a successful `update_cumulative_data` call.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// This call wrote a proposal and the store acknowledged it.
    Committed(SyncProposal),
    /// Nothing was left to write: the sample was already folded into a write
    /// made by a concurrent caller.
    Coalesced {
        /// Cumulative value after that write.
        total: u64,
    },
}

impl SyncOutcome {
    /// Returns the cumulative value the call ended with.
    pub fn total(&self) -> u64 {
        match self {
            SyncOutcome::Committed(proposal) => proposal.proposed_total,
            SyncOutcome::Coalesced { total } => *total,
        }
    }
}

/// State shared with the remote listener task.
struct Shared {
    user_id: String,
    ledger: Mutex<SyncLedger>,
    published: watch::Sender<Option<u64>>,
    feed: CumulativeFeed,
    stats: RwLock<SyncStats>,
}

impl Shared {
    fn publish(&self, total: u64, source: UpdateSource) {
        let changed = self.published.send_if_modified(|current| {
            if *current == Some(total) {
                false
            } else {
                *current = Some(total);
                true
            }
        });
        if changed {
            self.feed.publish(self.user_id.as_str(), total, source);
        }
    }

    fn apply_remote(&self, record: CumulativeRecord) {
        if record.user_id != self.user_id {
            debug!(user_id = %self.user_id, other = %record.user_id, "ignoring record for another user");
            return;
        }
        let steps = record.steps;
        let outcome = self.ledger.lock().apply_remote(record);
        match outcome {
            RemoteApply::Bootstrapped(total) => {
                info!(user_id = %self.user_id, total, "initialized from remote record");
                self.publish(total, UpdateSource::Remote);
            }
            RemoteApply::Applied(total) => {
                debug!(user_id = %self.user_id, total, "applied remote record");
                self.stats.write().remote_updates_applied += 1;
                self.publish(total, UpdateSource::Remote);
            }
            RemoteApply::Deferred => {
                debug!(user_id = %self.user_id, steps, "deferring remote record until write resolves");
            }
            RemoteApply::Echo => {
                debug!(user_id = %self.user_id, steps, "received echo of in-flight write");
            }
            RemoteApply::Stale => {
                debug!(user_id = %self.user_id, steps, "dropping echo of superseded write");
                self.stats.write().stale_remote_records += 1;
            }
            RemoteApply::Ignored => {}
        }
    }

    fn record_failure(&self, message: String) {
        let mut stats = self.stats.write();
        stats.write_failures += 1;
        stats.last_error = Some(message);
    }

    fn subscription_failed(&self, error: &SubscriptionError) {
        warn!(user_id = %self.user_id, error = %error, "remote subscription error");
        let mut stats = self.stats.write();
        stats.subscription_errors += 1;
        stats.last_error = Some(error.to_string());
    }
}

/// Fails the in-flight proposal if the write future is dropped before the
/// store answers, e.g. by a caller's timeout or an aborted task.
struct WriteAttempt<'a> {
    shared: &'a Shared,
    pending: bool,
}

impl<'a> WriteAttempt<'a> {
    fn new(shared: &'a Shared) -> Self {
        Self {
            shared,
            pending: true,
        }
    }

    fn resolved(&mut self) {
        self.pending = false;
    }
}

impl Drop for WriteAttempt<'_> {
    fn drop(&mut self) {
        if !self.pending {
            return;
        }
        if self.shared.ledger.lock().fail().is_ok() {
            warn!(
                user_id = %self.shared.user_id,
                "cumulative write abandoned, keeping increment for retry"
            );
            self.shared.record_failure("write abandoned before the store answered".into());
        }
    }
}

/// Merges session increments into the last known remote cumulative value and
/// commits the result.
///
/// - One write at a time; samples submitted while a write is in flight are
///   coalesced into the next one.
/// - `last_known_cumulative` and `session_start_steps` only change together,
///   under one lock, as transitions of [`SyncLedger`].
/// - The published value follows store acknowledgments and remote records;
///   it is never updated optimistically.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use stepsync_engine::{CumulativeSyncCoordinator, MemoryCumulativeStore, SyncConfig};
///
/// # let runtime = tokio::runtime::Runtime::new().unwrap();
/// # runtime.block_on(async {
/// let store = Arc::new(MemoryCumulativeStore::new());
/// let coordinator = CumulativeSyncCoordinator::new(SyncConfig::new("user-1"), store);
///
/// let outcome = coordinator.update_cumulative_data(1500, 68, 7.0).await.unwrap();
/// assert_eq!(outcome.total(), 1500);
/// # });
/// ```
pub struct CumulativeSyncCoordinator<S: RemoteCumulativeStore> {
    config: SyncConfig,
    store: Arc<S>,
    shared: Arc<Shared>,
    gate: tokio::sync::Mutex<()>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<S: RemoteCumulativeStore + 'static> CumulativeSyncCoordinator<S> {
    /// Creates a coordinator in `Initializing`.
    pub fn new(config: SyncConfig, store: Arc<S>) -> Self {
        let ledger = SyncLedger::new(config.initial_session_start);
        Self::with_ledger(config, store, ledger)
    }

    /// Creates a coordinator that resumes from a known base, e.g. values
    /// persisted locally before a process restart.
    pub fn resume(
        config: SyncConfig,
        store: Arc<S>,
        last_known_cumulative: u64,
        session_start_steps: u64,
    ) -> Self {
        let ledger = SyncLedger::with_base(last_known_cumulative, session_start_steps);
        let coordinator = Self::with_ledger(config, store, ledger);
        coordinator
            .shared
            .published
            .send_replace(Some(last_known_cumulative));
        coordinator
    }

    fn with_ledger(config: SyncConfig, store: Arc<S>, ledger: SyncLedger) -> Self {
        let (published, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            user_id: config.user_id.clone(),
            ledger: Mutex::new(ledger),
            published,
            feed: CumulativeFeed::with_max_history(config.feed_history),
            stats: RwLock::new(SyncStats::default()),
        });
        Self {
            config,
            store,
            shared,
            gate: tokio::sync::Mutex::new(()),
            listener: Mutex::new(None),
        }
    }

    /// Subscribes to the user's remote record and starts the listener task.
    ///
    /// Must be called from within a tokio runtime. Calling it again replaces
    /// the previous subscription.
    pub async fn start(&self) -> SyncResult<()> {
        let mut stream = self.store.subscribe(&self.config.user_id).await?;
        let shared = Arc::clone(&self.shared);

        let handle = tokio::spawn(async move {
            while let Some(item) = stream.recv().await {
                match item {
                    Ok(record) => shared.apply_remote(record),
                    Err(error) => {
                        shared.subscription_failed(&error);
                        if error == SubscriptionError::Closed {
                            break;
                        }
                    }
                }
            }
            debug!(user_id = %shared.user_id, "remote subscription ended");
        });

        if let Some(previous) = self.listener.lock().replace(handle) {
            previous.abort();
        }
        info!(user_id = %self.config.user_id, "coordinator started");
        Ok(())
    }

    /// Merges the sensor counter into the cumulative value and writes it.
    ///
    /// Fails with `InvalidInput` if `current_sensor_steps` is negative (or the
    /// vitals are malformed). A counter below the session start is treated as
    /// a sensor reset: nothing is credited and the session start is rebased.
    pub async fn update_cumulative_data(
        &self,
        current_sensor_steps: i64,
        heart_rate: i32,
        sleep_hours: f64,
    ) -> SyncResult<SyncOutcome> {
        let sample = HealthSample::try_new(current_sensor_steps, heart_rate, sleep_hours)?;
        self.submit(sample).await
    }

    /// Submits an already validated sample.
    pub async fn submit(&self, sample: HealthSample) -> SyncResult<SyncOutcome> {
        self.shared.ledger.lock().enqueue(sample)?;
        let _guard = self.gate.lock().await;
        if self.state() == CoordinatorState::Closed {
            // close() discarded the sample while this call waited
            return Err(SyncError::Cancelled);
        }
        let outcome = self.sync_pending().await?;
        if matches!(outcome, SyncOutcome::Coalesced { .. }) {
            self.shared.stats.write().coalesced += 1;
        }
        Ok(outcome)
    }

    /// Writes the pending sample, if any.
    ///
    /// This is the caller-driven retry after a failed write.
    pub async fn flush(&self) -> SyncResult<SyncOutcome> {
        let _guard = self.gate.lock().await;
        self.sync_pending().await
    }

    /// Like `update_cumulative_data`, retrying retryable failures with
    /// exponential backoff per the configured `RetryConfig`.
    pub async fn update_with_retry(
        &self,
        current_sensor_steps: i64,
        heart_rate: i32,
        sleep_hours: f64,
    ) -> SyncResult<SyncOutcome> {
        let sample = HealthSample::try_new(current_sensor_steps, heart_rate, sleep_hours)?;
        let retry = &self.config.retry;

        let mut result = self.submit(sample).await;
        for retry_number in 1..retry.max_attempts {
            match &result {
                Err(e) if e.is_retryable() => {}
                _ => break,
            }
            let delay = retry.delay_before_retry(retry_number);
            debug!(user_id = %self.config.user_id, retry_number, ?delay, "retrying sync");
            tokio::time::sleep(delay).await;
            self.shared.stats.write().retries += 1;
            result = self.flush().await;
        }
        result
    }

    /// Ends the session.
    ///
    /// Stops the remote listener and discards the unsynced sample. A write
    /// already in flight is allowed to complete; callers waiting behind it
    /// fail with `SyncError::Cancelled` and later calls with
    /// `SyncError::Closed`.
    pub fn close(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
        let discarded = self.shared.ledger.lock().close();
        match discarded {
            Some(sample) => warn!(
                user_id = %self.config.user_id,
                sensor_steps = sample.sensor_steps,
                "coordinator closed with unsynced sample"
            ),
            None => info!(user_id = %self.config.user_id, "coordinator closed"),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> CoordinatorState {
        self.shared.ledger.lock().state()
    }

    /// Returns the last acknowledged or observed cumulative value.
    pub fn last_known_cumulative(&self) -> u64 {
        self.shared.ledger.lock().last_known_cumulative()
    }

    /// Returns the sensor counter the next increment is measured from.
    pub fn session_start_steps(&self) -> u64 {
        self.shared.ledger.lock().session_start_steps()
    }

    /// Returns a copy of the ledger.
    pub fn ledger(&self) -> SyncLedger {
        self.shared.ledger.lock().clone()
    }

    /// Returns a view of the published cumulative value.
    ///
    /// `None` until a remote value has been observed.
    pub fn cumulative_steps(&self) -> watch::Receiver<Option<u64>> {
        self.shared.published.subscribe()
    }

    /// Subscribes to published cumulative events.
    pub fn subscribe_events(&self) -> Receiver<CumulativeEvent> {
        self.shared.feed.subscribe()
    }

    /// Returns the cumulative feed for polling.
    pub fn feed(&self) -> &CumulativeFeed {
        &self.shared.feed
    }

    /// Returns the current stats.
    pub fn stats(&self) -> SyncStats {
        self.shared.stats.read().clone()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Bootstraps from the store if no remote value has been observed yet.
    async fn ensure_initialized(&self) -> SyncResult<()> {
        if self.state() != CoordinatorState::Initializing {
            return Ok(());
        }
        let record = self.store.fetch(&self.config.user_id).await?;
        let base = self.shared.ledger.lock().bootstrap(record.as_ref());
        if let Some(total) = base {
            info!(user_id = %self.config.user_id, total, "initialized from fetched record");
            self.shared.publish(total, UpdateSource::Remote);
        }
        Ok(())
    }

    /// Runs one synchronization attempt. The caller holds `gate`.
    async fn sync_pending(&self) -> SyncResult<SyncOutcome> {
        self.ensure_initialized().await?;

        let written_at = Utc::now();
        let prepared = self
            .shared
            .ledger
            .lock()
            .begin(self.config.user_id.as_str(), written_at)?;
        let Some(prepared) = prepared else {
            return Ok(SyncOutcome::Coalesced {
                total: self.last_known_cumulative(),
            });
        };
        let mut attempt = WriteAttempt::new(&self.shared);

        if let Some(previous) = prepared.rebased_from {
            debug!(
                user_id = %self.config.user_id,
                previous,
                sensor_steps = prepared.proposal.sample.sensor_steps,
                "sensor counter dropped below session start, rebasing"
            );
            self.shared.stats.write().counter_resets += 1;
        }

        let result = self.write_record(prepared.record).await;
        attempt.resolved();

        match result {
            Ok(()) => {
                let total = self.shared.ledger.lock().acknowledge()?;
                {
                    let mut stats = self.shared.stats.write();
                    stats.proposals_committed += 1;
                    stats.last_sync_time = Some(written_at);
                    stats.last_error = None;
                }
                info!(
                    user_id = %self.config.user_id,
                    base = prepared.proposal.base_value,
                    increment = prepared.proposal.session_delta,
                    total,
                    "cumulative value committed"
                );
                self.shared.publish(total, UpdateSource::Local);
                Ok(SyncOutcome::Committed(prepared.proposal))
            }
            Err(error) => {
                self.shared.ledger.lock().fail()?;
                self.shared.record_failure(error.to_string());
                warn!(
                    user_id = %self.config.user_id,
                    proposed = prepared.proposal.proposed_total,
                    error = %error,
                    "cumulative write failed, keeping increment for retry"
                );
                Err(error)
            }
        }
    }

    async fn write_record(&self, record: CumulativeRecord) -> SyncResult<()> {
        let write = self.store.write(&self.config.user_id, record);
        match self.config.write_timeout {
            Some(limit) => tokio::time::timeout(limit, write)
                .await
                .map_err(|_| SyncError::Timeout)?,
            None => write.await,
        }
    }
}

impl<S: RemoteCumulativeStore> Drop for CumulativeSyncCoordinator<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::store::MemoryCumulativeStore;
    use std::time::Duration;

    fn coordinator(
        store: &Arc<MemoryCumulativeStore>,
    ) -> CumulativeSyncCoordinator<MemoryCumulativeStore> {
        CumulativeSyncCoordinator::resume(SyncConfig::new("u1"), Arc::clone(store), 1000, 500)
    }

    #[tokio::test]
    async fn scenario_increment_committed() {
        let store = Arc::new(MemoryCumulativeStore::new());
        let coordinator = coordinator(&store);

        let outcome = coordinator.update_cumulative_data(700, 72, 7.5).await.unwrap();
        let SyncOutcome::Committed(proposal) = outcome else {
            panic!("expected a committed proposal");
        };
        assert_eq!(proposal.session_delta, 200);
        assert_eq!(proposal.proposed_total, 1200);

        assert_eq!(coordinator.last_known_cumulative(), 1200);
        assert_eq!(coordinator.session_start_steps(), 700);
        assert_eq!(coordinator.state(), CoordinatorState::Idle);

        let stored = store.record("u1").unwrap();
        assert_eq!(stored.steps, 1200);
        assert_eq!(stored.heart_rate, 72);
        assert_eq!(stored.sleep_hours, 7.5);
        assert_eq!(*coordinator.cumulative_steps().borrow(), Some(1200));
    }

    #[tokio::test]
    async fn scenario_sensor_reset() {
        let store = Arc::new(MemoryCumulativeStore::new());
        let coordinator = CumulativeSyncCoordinator::resume(
            SyncConfig::new("u1"),
            Arc::clone(&store),
            1000,
            700,
        );

        let outcome = coordinator.update_cumulative_data(50, 70, 7.0).await.unwrap();
        assert_eq!(outcome.total(), 1000);
        assert_eq!(coordinator.last_known_cumulative(), 1000);
        assert_eq!(coordinator.session_start_steps(), 50);
        assert_eq!(coordinator.stats().counter_resets, 1);
    }

    #[tokio::test]
    async fn negative_input_is_rejected() {
        let store = Arc::new(MemoryCumulativeStore::new());
        let coordinator = coordinator(&store);

        let err = coordinator.update_cumulative_data(-1, 70, 7.0).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));
        assert_eq!(store.write_attempts(), 0);
        assert_eq!(coordinator.last_known_cumulative(), 1000);
    }

    #[tokio::test]
    async fn failure_then_flush_credits_once() {
        let store = Arc::new(MemoryCumulativeStore::new());
        store.fail_next_writes(3, "unavailable");
        let coordinator = coordinator(&store);

        assert!(coordinator.update_cumulative_data(700, 72, 7.5).await.is_err());
        assert_eq!(coordinator.state(), CoordinatorState::Error);
        assert_eq!(coordinator.session_start_steps(), 500);
        assert_eq!(*coordinator.cumulative_steps().borrow(), Some(1000));

        assert!(coordinator.flush().await.is_err());
        assert!(coordinator.flush().await.is_err());
        let outcome = coordinator.flush().await.unwrap();

        assert_eq!(outcome.total(), 1200);
        assert_eq!(coordinator.last_known_cumulative(), 1200);
        assert_eq!(store.accepted_writes().len(), 1);
        assert_eq!(coordinator.stats().write_failures, 3);

        // Nothing pending any more
        assert_eq!(
            coordinator.flush().await.unwrap(),
            SyncOutcome::Coalesced { total: 1200 }
        );
    }

    #[tokio::test]
    async fn update_with_retry_recovers() {
        let store = Arc::new(MemoryCumulativeStore::new());
        store.fail_next_writes(2, "unavailable");
        let config = SyncConfig::new("u1").with_retry(
            RetryConfig::new(4)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
        );
        let coordinator =
            CumulativeSyncCoordinator::resume(config, Arc::clone(&store), 1000, 500);

        let outcome = coordinator.update_with_retry(700, 72, 7.5).await.unwrap();
        assert_eq!(outcome.total(), 1200);
        assert_eq!(coordinator.stats().retries, 2);
        assert_eq!(store.write_attempts(), 3);
    }

    #[tokio::test]
    async fn update_with_retry_stops_on_fatal_error() {
        let store = Arc::new(MemoryCumulativeStore::new());
        store.push_failure(SyncError::store_fatal("permission denied"));
        let coordinator = coordinator(&store);

        let err = coordinator.update_with_retry(700, 72, 7.5).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(store.write_attempts(), 1);
        assert_eq!(coordinator.stats().retries, 0);
    }

    #[tokio::test]
    async fn update_with_retry_without_retries_writes_once() {
        let store = Arc::new(MemoryCumulativeStore::new());
        store.fail_next_writes(1, "unavailable");
        let config = SyncConfig::new("u1").with_retry(RetryConfig::no_retry());
        let coordinator =
            CumulativeSyncCoordinator::resume(config, Arc::clone(&store), 1000, 500);

        assert!(coordinator.update_with_retry(700, 72, 7.5).await.is_err());
        assert_eq!(store.write_attempts(), 1);
        assert_eq!(coordinator.stats().retries, 0);
        assert_eq!(coordinator.state(), CoordinatorState::Error);
    }

    #[tokio::test]
    async fn initializing_bootstraps_from_fetch() {
        let existing = CumulativeRecord::new("u1", 8000, 61, 6.5, Utc::now());
        let store = Arc::new(MemoryCumulativeStore::with_record(existing));
        let coordinator =
            CumulativeSyncCoordinator::new(SyncConfig::new("u1"), Arc::clone(&store));
        assert_eq!(coordinator.state(), CoordinatorState::Initializing);
        assert_eq!(*coordinator.cumulative_steps().borrow(), None);

        let outcome = coordinator.update_cumulative_data(250, 70, 7.0).await.unwrap();
        assert_eq!(outcome.total(), 8250);
    }

    #[tokio::test]
    async fn first_write_creates_record() {
        let store = Arc::new(MemoryCumulativeStore::new());
        let coordinator = CumulativeSyncCoordinator::new(
            SyncConfig::new("u1").with_session_start(100),
            Arc::clone(&store),
        );

        let outcome = coordinator.update_cumulative_data(160, 70, 7.0).await.unwrap();
        assert_eq!(outcome.total(), 60);
        assert_eq!(store.record("u1").unwrap().steps, 60);
    }

    #[tokio::test]
    async fn write_timeout_keeps_increment() {
        let store = Arc::new(MemoryCumulativeStore::new());
        store.pause_writes();
        let config = SyncConfig::new("u1").with_write_timeout(Duration::from_millis(20));
        let coordinator =
            CumulativeSyncCoordinator::resume(config, Arc::clone(&store), 1000, 500);

        let err = coordinator.update_cumulative_data(700, 72, 7.5).await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout));
        assert_eq!(coordinator.state(), CoordinatorState::Error);

        store.resume_writes();
        assert_eq!(coordinator.flush().await.unwrap().total(), 1200);
    }

    #[tokio::test]
    async fn dropped_write_keeps_increment() {
        let store = Arc::new(MemoryCumulativeStore::new());
        store.pause_writes();
        let coordinator = coordinator(&store);

        let timed_out = tokio::time::timeout(
            Duration::from_millis(20),
            coordinator.update_cumulative_data(700, 72, 7.5),
        )
        .await;
        assert!(timed_out.is_err());
        assert_eq!(coordinator.state(), CoordinatorState::Error);
        assert_eq!(coordinator.ledger().pending().map(|s| s.sensor_steps), Some(700));
        assert_eq!(coordinator.session_start_steps(), 500);
        assert_eq!(coordinator.stats().write_failures, 1);
        assert_eq!(store.blocked_writes(), 0);

        store.resume_writes();
        assert_eq!(coordinator.flush().await.unwrap().total(), 1200);
        let outcome = coordinator.update_cumulative_data(800, 72, 7.5).await.unwrap();
        assert_eq!(outcome.total(), 1300);
        assert_eq!(coordinator.state(), CoordinatorState::Idle);
    }

    #[tokio::test]
    async fn listener_applies_remote_records() {
        let store = Arc::new(MemoryCumulativeStore::with_record(CumulativeRecord::new(
            "u1",
            500,
            60,
            7.0,
            Utc::now(),
        )));
        let coordinator =
            CumulativeSyncCoordinator::new(SyncConfig::new("u1"), Arc::clone(&store));
        let mut view = coordinator.cumulative_steps();

        coordinator.start().await.unwrap();
        view.wait_for(|v| *v == Some(500)).await.unwrap();
        assert_eq!(coordinator.state(), CoordinatorState::Idle);

        store.apply_external(CumulativeRecord::new("u1", 900, 64, 7.0, Utc::now()));
        view.wait_for(|v| *v == Some(900)).await.unwrap();
        assert_eq!(coordinator.last_known_cumulative(), 900);
        assert_eq!(coordinator.stats().remote_updates_applied, 1);
    }

    #[tokio::test]
    async fn subscription_errors_do_not_block_sync() {
        let store = Arc::new(MemoryCumulativeStore::new());
        let coordinator = coordinator(&store);
        coordinator.start().await.unwrap();

        store.fail_subscription("u1", SubscriptionError::Remote("listener revoked".into()));
        let outcome = coordinator.update_cumulative_data(600, 70, 7.0).await.unwrap();
        assert_eq!(outcome.total(), 1100);

        for _ in 0..100 {
            if coordinator.stats().subscription_errors == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(coordinator.stats().subscription_errors, 1);
    }

    #[tokio::test]
    async fn close_rejects_further_updates() {
        let store = Arc::new(MemoryCumulativeStore::new());
        let coordinator = coordinator(&store);
        coordinator.start().await.unwrap();

        coordinator.close();
        assert_eq!(coordinator.state(), CoordinatorState::Closed);

        let err = coordinator.update_cumulative_data(700, 72, 7.5).await.unwrap_err();
        assert!(matches!(err, SyncError::Closed));
        assert_eq!(store.write_attempts(), 0);
    }

    #[tokio::test]
    async fn feed_receives_committed_totals() {
        let store = Arc::new(MemoryCumulativeStore::new());
        let coordinator = coordinator(&store);
        let events = coordinator.subscribe_events();

        coordinator.update_cumulative_data(700, 72, 7.5).await.unwrap();
        coordinator.update_cumulative_data(900, 74, 7.5).await.unwrap();

        let first = events.recv().unwrap();
        let second = events.recv().unwrap();
        assert_eq!((first.steps, first.source), (1200, UpdateSource::Local));
        assert_eq!(second.steps, 1400);
        assert_eq!(coordinator.feed().latest_sequence(), 2);
    }
}
