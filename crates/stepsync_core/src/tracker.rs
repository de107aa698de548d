//! Session baseline tracking for a resetting hardware counter.

use crate::types::{DayAnchor, RawReading, ResetKind, SessionBaseline, SessionDelta};
use chrono::{Local, TimeZone};
use tracing::debug;

/// Converts a raw, possibly-resetting counter stream into non-negative
/// session deltas, re-anchored at each calendar-day boundary.
///
/// The tracker is plain in-memory state. `observe` never blocks, never
/// performs I/O and never fails, so it can be driven directly from a sensor
/// callback.
///
/// # Example
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use stepsync_core::{RawReading, SensorBaselineTracker};
///
/// let mut tracker = SensorBaselineTracker::with_timezone(Utc);
/// let morning = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
/// let noon = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
///
/// assert_eq!(tracker.observe(RawReading::new(1200, morning)).value, 0);
/// assert_eq!(tracker.observe(RawReading::new(4500, noon)).value, 3300);
/// ```
#[derive(Debug, Clone)]
pub struct SensorBaselineTracker<Tz: TimeZone = Local> {
    tz: Tz,
    baseline: Option<SessionBaseline>,
    last_value: Option<u64>,
    resets_detected: u64,
}

impl SensorBaselineTracker<Local> {
    /// Creates a tracker that anchors days in the device's local time zone.
    #[must_use]
    pub fn new() -> Self {
        Self::with_timezone(Local)
    }
}

impl Default for SensorBaselineTracker<Local> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Tz: TimeZone> SensorBaselineTracker<Tz> {
    /// Creates a tracker that anchors days in the given time zone.
    pub fn with_timezone(tz: Tz) -> Self {
        Self {
            tz,
            baseline: None,
            last_value: None,
            resets_detected: 0,
        }
    }

    /// Observes a reading and returns the delta since the session baseline.
    ///
    /// - A reading on a different calendar day than the baseline starts a new
    ///   baseline (delta 0).
    /// - The first reading of a session, or a value lower than the baseline,
    ///   starts a new baseline (delta 0).
    /// - Otherwise the delta is `reading.value - baseline`.
    pub fn observe(&mut self, reading: RawReading) -> SessionDelta {
        let anchor = DayAnchor::of(&reading.observed_at, &self.tz);
        self.last_value = Some(reading.value);

        let reset = match &self.baseline {
            None => Some(ResetKind::SessionStart),
            Some(baseline) if baseline.anchor != anchor => Some(ResetKind::DayRollover),
            Some(baseline) if reading.value < baseline.value => Some(ResetKind::CounterRollback),
            Some(_) => None,
        };

        if let Some(kind) = reset {
            debug!(
                kind = %kind,
                day = %anchor,
                previous = ?self.baseline.as_ref().map(|b| b.value),
                value = reading.value,
                "sensor baseline reset"
            );
            if kind != ResetKind::SessionStart {
                self.resets_detected += 1;
            }
            self.baseline = Some(SessionBaseline {
                value: reading.value,
                anchor: anchor.clone(),
            });
            return SessionDelta {
                value: 0,
                anchor,
                reset: Some(kind),
            };
        }

        // The guard arms above leave a baseline on the same day that is not
        // above the reading.
        let base = self.baseline.as_ref().map_or(reading.value, |b| b.value);
        SessionDelta {
            value: reading.value.saturating_sub(base),
            anchor,
            reset: None,
        }
    }

    /// Returns the current session baseline, if a session has started.
    pub fn baseline(&self) -> Option<&SessionBaseline> {
        self.baseline.as_ref()
    }

    /// Returns the day the current session is anchored to.
    pub fn anchor(&self) -> Option<&DayAnchor> {
        self.baseline.as_ref().map(|b| &b.anchor)
    }

    /// Returns the last observed raw value.
    pub fn last_value(&self) -> Option<u64> {
        self.last_value
    }

    /// Returns the current delta without observing a new reading.
    pub fn current_delta(&self) -> u64 {
        match (&self.baseline, self.last_value) {
            (Some(baseline), Some(last)) => last.saturating_sub(baseline.value),
            _ => 0,
        }
    }

    /// Returns how many rollovers and rollbacks have been detected.
    pub fn resets_detected(&self) -> u64 {
        self.resets_detected
    }

    /// Drops the current session; the next reading starts a new baseline.
    pub fn reset(&mut self) {
        self.baseline = None;
        self.last_value = None;
    }

    /// Returns the time zone used for day anchoring.
    pub fn timezone(&self) -> &Tz {
        &self.tz
    }
}
