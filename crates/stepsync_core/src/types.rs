//! Core type definitions for stepsync.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Format of an accounting day, `yyyyMMdd`.
pub const DAY_FORMAT: &str = "%Y%m%d";

/// A raw hardware counter reading.
///
/// The value is monotonically increasing until the counter resets (reboot,
/// sensor reinitialization). Readings may arrive at any cadence and may skip
/// values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawReading {
    /// Counter value.
    pub value: u64,
    /// When the value was observed.
    pub observed_at: DateTime<Utc>,
}

impl RawReading {
    /// Creates a new reading.
    #[must_use]
    pub fn new(value: u64, observed_at: DateTime<Utc>) -> Self {
        Self { value, observed_at }
    }

    /// Creates a reading from a signed counter value, rejecting negatives.
    ///
    /// Platform sensor APIs commonly report counters as signed integers; this
    /// is the boundary where a negative value is refused instead of being
    /// allowed to produce a negative delta.
    pub fn try_new(value: i64, observed_at: DateTime<Utc>) -> CoreResult<Self> {
        let value = u64::try_from(value).map_err(|_| {
            CoreError::invalid_input("value", format!("must not be negative, got {value}"))
        })?;
        Ok(Self { value, observed_at })
    }

    /// Creates a reading observed now.
    #[must_use]
    pub fn now(value: u64) -> Self {
        Self::new(value, Utc::now())
    }
}

/// Identifies the current accounting day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DayAnchor {
    calendar_day: String,
}

impl DayAnchor {
    /// Returns the anchor for an instant as seen in the given time zone.
    pub fn of<Tz: TimeZone>(instant: &DateTime<Utc>, tz: &Tz) -> Self {
        Self::from_date(instant.with_timezone(tz).date_naive())
    }

    /// Returns the anchor for a calendar date.
    #[must_use]
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            calendar_day: date.format(DAY_FORMAT).to_string(),
        }
    }

    /// Parses an anchor from its `yyyyMMdd` form.
    pub fn parse(calendar_day: &str) -> CoreResult<Self> {
        let date = NaiveDate::parse_from_str(calendar_day, DAY_FORMAT).map_err(|e| {
            CoreError::invalid_input("calendar_day", format!("{calendar_day:?}: {e}"))
        })?;
        Ok(Self::from_date(date))
    }

    /// Returns the `yyyyMMdd` string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.calendar_day
    }
}

impl fmt::Display for DayAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.calendar_day)
    }
}

/// The raw counter value recorded at the start of an accounting session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBaseline {
    /// Raw counter value at session start.
    pub value: u64,
    /// Day the session belongs to.
    pub anchor: DayAnchor,
}

/// Why a baseline was reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResetKind {
    /// First reading of a session.
    SessionStart,
    /// The reading belongs to a different calendar day than the baseline.
    DayRollover,
    /// The counter went backwards without a day change (reboot, sensor reinit).
    CounterRollback,
}

impl fmt::Display for ResetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetKind::SessionStart => write!(f, "session start"),
            ResetKind::DayRollover => write!(f, "day rollover"),
            ResetKind::CounterRollback => write!(f, "counter rollback"),
        }
    }
}

/// Steps accumulated since the current session baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDelta {
    /// Non-negative delta from the baseline.
    pub value: u64,
    /// Day the delta is accounted to.
    pub anchor: DayAnchor,
    /// Set when this reading reassigned the baseline. The delta is 0 then.
    pub reset: Option<ResetKind>,
}

impl SessionDelta {
    /// Returns true if this reading started a new baseline.
    #[must_use]
    pub fn is_reset(&self) -> bool {
        self.reset.is_some()
    }
}
