//! Integration tests for the coordinator, session and in-memory store.

use chrono::Utc;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use stepsync_engine::{
    CoordinatorState, CumulativeSyncCoordinator, MemoryCumulativeStore, SyncError, SyncOutcome,
};
use stepsync_protocol::CumulativeRecord;
use stepsync_testkit::prelude::*;

type Coordinator = CumulativeSyncCoordinator<MemoryCumulativeStore>;

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..2_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

fn pending_steps(coordinator: &Coordinator) -> Option<u64> {
    coordinator.ledger().pending().map(|s| s.sensor_steps)
}

fn spawn_update(
    coordinator: &Arc<Coordinator>,
    sensor_steps: i64,
) -> tokio::task::JoinHandle<Result<SyncOutcome, SyncError>> {
    let coordinator = Arc::clone(coordinator);
    tokio::spawn(async move { coordinator.update_cumulative_data(sensor_steps, 72, 7.5).await })
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

#[tokio::test]
async fn calls_during_flight_coalesce_into_one_write() {
    let harness = TestCoordinator::seeded(1000, 500);
    harness.store.pause_writes();

    let first = spawn_update(&harness.coordinator, 700);
    harness.store.wait_for_blocked_writes(1).await;
    assert_eq!(harness.coordinator.state(), CoordinatorState::Syncing);

    let second = spawn_update(&harness.coordinator, 800);
    wait_until(|| pending_steps(&harness.coordinator) == Some(800)).await;
    let third = spawn_update(&harness.coordinator, 900);
    wait_until(|| pending_steps(&harness.coordinator) == Some(900)).await;

    harness.store.release_writes(1);
    assert_eq!(first.await.unwrap().unwrap().total(), 1200);

    harness.store.wait_for_blocked_writes(1).await;
    harness.store.release_writes(1);
    let outcomes = [second.await.unwrap().unwrap(), third.await.unwrap().unwrap()];

    let committed: Vec<_> = outcomes
        .iter()
        .filter(|o| matches!(o, SyncOutcome::Committed(_)))
        .collect();
    assert_eq!(committed.len(), 1);
    assert!(outcomes.iter().all(|o| o.total() == 1400));

    let totals: Vec<u64> = harness.store.accepted_writes().iter().map(|r| r.steps).collect();
    assert_eq!(totals, vec![1200, 1400]);
    assert_eq!(harness.coordinator.session_start_steps(), 900);
    assert_eq!(harness.coordinator.stats().coalesced, 1);
}

#[tokio::test]
async fn failed_increment_is_credited_once_with_newer_sample() {
    let harness = TestCoordinator::seeded(1000, 500);
    harness.store.fail_next_writes(1, "unavailable");

    let err = harness
        .coordinator
        .update_cumulative_data(700, 72, 7.5)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(harness.coordinator.state(), CoordinatorState::Error);

    // The next sample already contains the unsynced 200 steps.
    let outcome = harness
        .coordinator
        .update_cumulative_data(750, 73, 7.5)
        .await
        .unwrap();
    assert_eq!(outcome.total(), 1250);
    assert_eq!(harness.stored_steps(), Some(1250));
    assert_eq!(harness.store.accepted_writes().len(), 1);
}

#[tokio::test]
async fn offline_store_recovers_on_flush() {
    let harness = TestCoordinator::seeded(1000, 500);
    harness.store.set_offline(true);

    for _ in 0..3 {
        assert!(harness.coordinator.update_cumulative_data(700, 72, 7.5).await.is_err());
    }
    assert_eq!(harness.coordinator.last_known_cumulative(), 1000);
    assert_eq!(harness.coordinator.session_start_steps(), 500);

    harness.store.set_offline(false);
    assert_eq!(harness.coordinator.flush().await.unwrap().total(), 1200);
    assert_eq!(harness.coordinator.stats().write_failures, 3);
}

#[tokio::test]
async fn external_update_becomes_base_for_pending_increment() {
    let harness = TestCoordinator::with_remote(5000);
    let coordinator = &harness.coordinator;
    let mut view = coordinator.cumulative_steps();
    coordinator.start().await.unwrap();
    view.wait_for(|v| *v == Some(5000)).await.unwrap();

    assert_eq!(coordinator.update_cumulative_data(300, 70, 7.0).await.unwrap().total(), 5300);

    // Another device adds steps.
    harness.store.apply_external(record(9000, Utc::now()));
    view.wait_for(|v| *v == Some(9000)).await.unwrap();

    assert_eq!(coordinator.session_start_steps(), 300);
    assert_eq!(coordinator.update_cumulative_data(500, 70, 7.0).await.unwrap().total(), 9200);
}

#[tokio::test]
async fn external_update_with_lagging_clock_is_applied() {
    let harness = TestCoordinator::seeded(1000, 500);
    let coordinator = &harness.coordinator;
    let mut view = coordinator.cumulative_steps();
    coordinator.start().await.unwrap();

    assert_eq!(coordinator.update_cumulative_data(700, 72, 7.5).await.unwrap().total(), 1200);

    // Written after ours by a device whose clock runs behind.
    let skewed = Utc::now() - chrono::Duration::seconds(2);
    harness.store.apply_external(record(5000, skewed));
    view.wait_for(|v| *v == Some(5000)).await.unwrap();
    assert_eq!(coordinator.stats().stale_remote_records, 0);

    assert_eq!(coordinator.update_cumulative_data(800, 72, 7.5).await.unwrap().total(), 5100);
    let totals: Vec<u64> = harness.store.accepted_writes().iter().map(|r| r.steps).collect();
    assert_eq!(totals, vec![1200, 5100]);
}

#[tokio::test]
async fn external_update_during_flight_follows_store_order() {
    let harness = TestCoordinator::seeded(1000, 500);
    let coordinator = &harness.coordinator;
    coordinator.start().await.unwrap();
    harness.store.pause_writes();

    let write = spawn_update(coordinator, 700);
    harness.store.wait_for_blocked_writes(1).await;

    harness.store.apply_external(record(5000, Utc::now()));
    wait_until(|| coordinator.ledger().deferred_remote().is_some()).await;
    assert_eq!(coordinator.last_known_cumulative(), 1000);

    // Our write lands after the external one and overwrites it.
    harness.store.release_writes(1);
    assert_eq!(write.await.unwrap().unwrap().total(), 1200);
    wait_until(|| coordinator.last_known_cumulative() == 1200).await;
    assert_eq!(harness.stored_steps(), Some(1200));

    harness.store.resume_writes();
    let outcome = coordinator.update_cumulative_data(800, 72, 7.5).await.unwrap();
    assert_eq!(outcome.total(), 1300);
}

#[tokio::test]
async fn redelivered_echo_of_earlier_write_is_ignored() {
    let harness = TestCoordinator::seeded(1000, 500);
    let coordinator = &harness.coordinator;
    coordinator.start().await.unwrap();

    coordinator.update_cumulative_data(700, 72, 7.5).await.unwrap();
    coordinator.update_cumulative_data(800, 72, 7.5).await.unwrap();
    let first = harness.store.accepted_writes()[0].clone();
    harness.store.apply_external(first);

    wait_until(|| coordinator.stats().stale_remote_records >= 1).await;
    assert_eq!(coordinator.last_known_cumulative(), 1300);
}

#[tokio::test]
async fn aborted_write_is_retried_on_flush() {
    let harness = TestCoordinator::seeded(1000, 500);
    harness.store.pause_writes();

    let write = spawn_update(&harness.coordinator, 700);
    harness.store.wait_for_blocked_writes(1).await;
    write.abort();
    assert!(write.await.unwrap_err().is_cancelled());

    assert_eq!(harness.coordinator.state(), CoordinatorState::Error);
    assert_eq!(pending_steps(&harness.coordinator), Some(700));
    assert_eq!(harness.store.blocked_writes(), 0);

    harness.store.resume_writes();
    assert_eq!(harness.coordinator.flush().await.unwrap().total(), 1200);
    assert_eq!(
        harness
            .coordinator
            .update_cumulative_data(900, 72, 7.5)
            .await
            .unwrap()
            .total(),
        1400
    );
    assert_eq!(harness.stored_steps(), Some(1400));
}

#[tokio::test]
async fn close_during_flight_applies_ack_and_rejects_new_calls() {
    let harness = TestCoordinator::seeded(1000, 500);
    harness.store.pause_writes();

    let write = spawn_update(&harness.coordinator, 700);
    harness.store.wait_for_blocked_writes(1).await;

    harness.coordinator.close();
    let err = harness
        .coordinator
        .update_cumulative_data(900, 72, 7.5)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Closed));

    harness.store.release_writes(1);
    assert_eq!(write.await.unwrap().unwrap().total(), 1200);
    assert_eq!(harness.coordinator.state(), CoordinatorState::Closed);
    assert_eq!(harness.coordinator.last_known_cumulative(), 1200);
    assert_eq!(harness.store.write_attempts(), 1);
}

#[tokio::test]
async fn close_discards_unsynced_sample() {
    let harness = TestCoordinator::seeded(1000, 500);
    harness.store.pause_writes();

    let write = spawn_update(&harness.coordinator, 700);
    harness.store.wait_for_blocked_writes(1).await;
    let queued = spawn_update(&harness.coordinator, 900);
    wait_until(|| pending_steps(&harness.coordinator) == Some(900)).await;

    harness.coordinator.close();
    harness.store.release_writes(1);

    assert!(write.await.unwrap().is_ok());
    assert!(matches!(queued.await.unwrap(), Err(SyncError::Cancelled)));
    assert_eq!(harness.store.accepted_writes().len(), 1);
}

#[tokio::test]
async fn observers_see_only_acknowledged_values() {
    let harness = TestCoordinator::seeded(1000, 500);
    let coordinator = &harness.coordinator;
    let events = coordinator.subscribe_events();
    harness.store.pause_writes();

    let write = spawn_update(coordinator, 700);
    harness.store.wait_for_blocked_writes(1).await;
    assert_eq!(*coordinator.cumulative_steps().borrow(), Some(1000));
    assert!(events.try_recv().is_err());

    harness.store.release_writes(1);
    write.await.unwrap().unwrap();
    assert_eq!(*coordinator.cumulative_steps().borrow(), Some(1200));
    assert_eq!(events.recv().unwrap().steps, 1200);

    // Unchanged totals are not republished.
    harness.store.resume_writes();
    coordinator.update_cumulative_data(700, 72, 7.5).await.unwrap();
    assert!(events.try_recv().is_err());

    let polled = coordinator.feed().poll(0, 10);
    assert_eq!(polled.len(), 1);
    assert_eq!(polled[0].sequence, 1);
}

#[tokio::test]
async fn session_replays_a_day_with_reboot() {
    let harness = TestCoordinator::with_remote(20_000);
    let mut session = harness.session();

    session.observe(reading(4000, 1, 7));
    session.observe(reading(4800, 1, 9));
    assert_eq!(session.flush(70, 7.0).await.unwrap().total(), 20_800);

    session.observe(reading(5100, 1, 11));
    session.observe(reading(30, 1, 12));
    session.observe(reading(230, 1, 14));
    assert_eq!(session.flush(71, 7.0).await.unwrap().total(), 21_300);

    session.observe(reading(400, 2, 8));
    session.observe(reading(650, 2, 10));
    assert_eq!(session.flush(72, 6.5).await.unwrap().total(), 21_750);
    assert_eq!(harness.stored_steps(), Some(21_750));
}

#[tokio::test]
async fn session_against_empty_store_creates_record() {
    let harness = TestCoordinator::empty();
    let mut session = harness.session();

    session.observe(reading(100, 3, 8));
    session.observe(reading(160, 3, 9));
    assert_eq!(session.flush(70, 7.0).await.unwrap().total(), 60);

    let stored: CumulativeRecord = harness.store.record(TEST_USER).unwrap();
    assert_eq!(stored.steps, 60);
    assert_eq!(stored.heart_rate, 70);
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn totals_follow_reference_model(counters in sensor_counter_strategy(1, 30)) {
        let rt = runtime();
        let harness = TestCoordinator::seeded(0, 0);

        let mut start = 0u64;
        let mut expected = 0u64;
        let mut previous = 0u64;
        for counter in counters {
            let value = counter as u64;
            if value < start {
                start = value;
            }
            expected += value - start;
            start = value;

            let total = rt
                .block_on(harness.coordinator.update_cumulative_data(counter, 70, 7.0))
                .unwrap()
                .total();
            prop_assert_eq!(total, expected);
            prop_assert!(total >= previous);
            previous = total;
        }
    }

    #[test]
    fn session_total_matches_session_counter(readings in reading_stream_strategy(1, 40)) {
        let rt = runtime();
        let harness = TestCoordinator::empty();
        let mut session = harness.session();

        let mut previous = 0u64;
        for reading in readings {
            session.observe(reading);
            let total = rt.block_on(session.flush(70, 7.0)).unwrap().total();
            prop_assert_eq!(total, session.session_steps());
            prop_assert!(total >= previous);
            previous = total;
        }
    }
}
