//! Synchronization inputs and proposals.

use crate::record::CumulativeRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stepsync_core::{CoreError, CoreResult};

/// The validated arguments of one `update_cumulative_data` call.
///
/// While a write is in flight only the latest sample is kept: samples carry
/// the raw sensor counter, so a later sample already contains the increment
/// of an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    /// Current sensor counter.
    pub sensor_steps: u64,
    /// Heart rate (bpm).
    pub heart_rate: i32,
    /// Sleep duration (hours).
    pub sleep_hours: f64,
}

impl HealthSample {
    /// Validates raw caller input.
    ///
    /// Only the sensor counter is range-checked. Vitals are carried to the
    /// store unchanged, except that sleep hours must be finite so the record
    /// can be serialized.
    pub fn try_new(sensor_steps: i64, heart_rate: i32, sleep_hours: f64) -> CoreResult<Self> {
        let sensor_steps = u64::try_from(sensor_steps).map_err(|_| {
            CoreError::invalid_input(
                "current_sensor_steps",
                format!("must not be negative, got {sensor_steps}"),
            )
        })?;
        if !sleep_hours.is_finite() {
            return Err(CoreError::invalid_input(
                "sleep_hours",
                format!("must be a finite number, got {sleep_hours}"),
            ));
        }
        Ok(Self {
            sensor_steps,
            heart_rate,
            sleep_hours,
        })
    }
}

/// One synchronization attempt: the known base plus the session increment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncProposal {
    /// Cumulative value as last known before this attempt.
    pub base_value: u64,
    /// Non-negative increment since the session start.
    pub session_delta: u64,
    /// `base_value + session_delta`.
    pub proposed_total: u64,
    /// The sample the proposal was computed from.
    pub sample: HealthSample,
}

impl SyncProposal {
    /// Builds a proposal, saturating instead of overflowing.
    #[must_use]
    pub fn new(base_value: u64, session_delta: u64, sample: HealthSample) -> Self {
        Self {
            base_value,
            session_delta,
            proposed_total: base_value.saturating_add(session_delta),
            sample,
        }
    }

    /// Returns the record to submit to the store.
    pub fn to_record(
        &self,
        user_id: impl Into<String>,
        updated_at: DateTime<Utc>,
    ) -> CumulativeRecord {
        CumulativeRecord::new(
            user_id,
            self.proposed_total,
            self.sample.heart_rate,
            self.sample.sleep_hours,
            updated_at,
        )
    }
}
