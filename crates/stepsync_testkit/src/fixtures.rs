//! Test fixtures and coordinator helpers.
//!
//! Provides pinned clocks, reading builders and coordinators wired to an
//! in-memory store.

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use std::sync::Arc;
use stepsync_core::{RawReading, SensorBaselineTracker};
use stepsync_engine::{CumulativeSyncCoordinator, MemoryCumulativeStore, StepSession, SyncConfig};
use stepsync_protocol::CumulativeRecord;

/// User id used by the fixtures.
pub const TEST_USER: &str = "user-1";

/// Returns `hour:00` UTC on the given day of June 2024.
pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    at_minute(day, hour, 0)
}

/// Returns `hour:minute` UTC on the given day of June 2024.
pub fn at_minute(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, day, hour, minute, 0)
        .single()
        .expect("fixture date must be valid")
}

/// Returns the start of the fixture month, for generated offsets.
pub fn epoch() -> DateTime<Utc> {
    at(1, 0)
}

/// Returns `epoch() + minutes`.
pub fn minutes_after_epoch(minutes: i64) -> DateTime<Utc> {
    epoch() + Duration::minutes(minutes)
}

/// Builds a reading at `hour:00` UTC on the given day.
pub fn reading(value: u64, day: u32, hour: u32) -> RawReading {
    RawReading::new(value, at(day, hour))
}

/// Creates a tracker anchoring days in UTC.
pub fn utc_tracker() -> SensorBaselineTracker<Utc> {
    SensorBaselineTracker::with_timezone(Utc)
}

/// Creates a tracker anchoring days at a fixed UTC offset in hours.
pub fn offset_tracker(hours: i32) -> SensorBaselineTracker<FixedOffset> {
    let offset = FixedOffset::east_opt(hours * 3600).expect("offset must be within a day");
    SensorBaselineTracker::with_timezone(offset)
}

/// Builds a record for the fixture user.
pub fn record(steps: u64, updated_at: DateTime<Utc>) -> CumulativeRecord {
    CumulativeRecord::new(TEST_USER, steps, 60, 7.0, updated_at)
}

/// A coordinator with its in-memory store.
pub struct TestCoordinator {
    /// The store the coordinator writes to.
    pub store: Arc<MemoryCumulativeStore>,
    /// The coordinator.
    pub coordinator: Arc<CumulativeSyncCoordinator<MemoryCumulativeStore>>,
}

impl TestCoordinator {
    /// Creates a coordinator over an empty store, still `Initializing`.
    pub fn empty() -> Self {
        Self::with_config(SyncConfig::new(TEST_USER), MemoryCumulativeStore::new())
    }

    /// Creates a coordinator over a store that already holds `steps`.
    pub fn with_remote(steps: u64) -> Self {
        let store = MemoryCumulativeStore::with_record(record(steps, epoch()));
        Self::with_config(SyncConfig::new(TEST_USER), store)
    }

    /// Creates a coordinator that resumes from a known base.
    pub fn seeded(last_known_cumulative: u64, session_start_steps: u64) -> Self {
        Self::seeded_with_config(
            SyncConfig::new(TEST_USER),
            last_known_cumulative,
            session_start_steps,
        )
    }

    /// Like `seeded`, with a custom configuration.
    pub fn seeded_with_config(
        config: SyncConfig,
        last_known_cumulative: u64,
        session_start_steps: u64,
    ) -> Self {
        let store = Arc::new(MemoryCumulativeStore::new());
        let coordinator = CumulativeSyncCoordinator::resume(
            config,
            Arc::clone(&store),
            last_known_cumulative,
            session_start_steps,
        );
        Self {
            store,
            coordinator: Arc::new(coordinator),
        }
    }

    /// Creates a coordinator over the given store.
    pub fn with_config(config: SyncConfig, store: MemoryCumulativeStore) -> Self {
        let store = Arc::new(store);
        let coordinator = CumulativeSyncCoordinator::new(config, Arc::clone(&store));
        Self {
            store,
            coordinator: Arc::new(coordinator),
        }
    }

    /// Wires a UTC session to this coordinator.
    pub fn session(&self) -> StepSession<MemoryCumulativeStore, Utc> {
        StepSession::new(utc_tracker(), Arc::clone(&self.coordinator))
    }

    /// Returns the steps currently stored for the fixture user.
    pub fn stored_steps(&self) -> Option<u64> {
        self.store.record(TEST_USER).map(|r| r.steps)
    }
}
