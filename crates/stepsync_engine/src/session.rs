//! Sensor session wiring.

use crate::coordinator::{CumulativeSyncCoordinator, SyncOutcome};
use crate::error::SyncResult;
use crate::store::RemoteCumulativeStore;
use chrono::{Local, TimeZone};
use std::sync::Arc;
use stepsync_core::{CoreError, RawReading, SensorBaselineTracker, SessionDelta};
use stepsync_protocol::HealthSample;

/// Feeds sensor readings through a baseline tracker into a coordinator.
///
/// The coordinator sees a session counter that only grows: deltas of
/// sessions ended by a day rollover or a counter rollback are carried over,
/// so a reset never looks like lost steps. The coordinator should therefore
/// start its session at 0 (the `SyncConfig` default).
pub struct StepSession<S: RemoteCumulativeStore, Tz: TimeZone = Local> {
    tracker: SensorBaselineTracker<Tz>,
    coordinator: Arc<CumulativeSyncCoordinator<S>>,
    carried: u64,
    current: u64,
}

impl<S: RemoteCumulativeStore + 'static, Tz: TimeZone> StepSession<S, Tz> {
    /// Creates a session.
    pub fn new(
        tracker: SensorBaselineTracker<Tz>,
        coordinator: Arc<CumulativeSyncCoordinator<S>>,
    ) -> Self {
        Self {
            tracker,
            coordinator,
            carried: 0,
            current: 0,
        }
    }

    /// Observes a sensor reading. Never blocks.
    pub fn observe(&mut self, reading: RawReading) -> SessionDelta {
        let delta = self.tracker.observe(reading);
        if delta.is_reset() {
            self.carried = self.carried.saturating_add(self.current);
        }
        self.current = delta.value;
        delta
    }

    /// Returns the counter handed to the coordinator.
    pub fn session_steps(&self) -> u64 {
        self.carried.saturating_add(self.current)
    }

    /// Builds the sample `flush` would submit.
    ///
    /// Useful to submit through a cloned coordinator handle without holding
    /// the session across the write.
    pub fn sample(&self, heart_rate: i32, sleep_hours: f64) -> SyncResult<HealthSample> {
        let steps = i64::try_from(self.session_steps()).map_err(|_| {
            CoreError::invalid_input("session_steps", "exceeds the signed 64-bit range")
        })?;
        Ok(HealthSample::try_new(steps, heart_rate, sleep_hours)?)
    }

    /// Syncs the session counter together with the given vitals.
    pub async fn flush(&self, heart_rate: i32, sleep_hours: f64) -> SyncResult<SyncOutcome> {
        let sample = self.sample(heart_rate, sleep_hours)?;
        self.coordinator.submit(sample).await
    }

    /// Returns the tracker.
    pub fn tracker(&self) -> &SensorBaselineTracker<Tz> {
        &self.tracker
    }

    /// Returns the coordinator.
    pub fn coordinator(&self) -> &Arc<CumulativeSyncCoordinator<S>> {
        &self.coordinator
    }
}
