//! Property-based test generators using proptest.
//!
//! Provides strategies for sensor reading streams that behave like real
//! pedometers: irregular gaps, device reboots and midnight crossings.

use crate::fixtures::epoch;
use chrono::Duration;
use proptest::prelude::*;
use stepsync_core::RawReading;

/// One step of a simulated sensor stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorEvent {
    /// The counter grows after a gap.
    Walk {
        /// Steps taken.
        steps: u64,
        /// Minutes since the previous reading.
        gap_minutes: i64,
    },
    /// The device rebooted and the counter restarted.
    Reboot {
        /// Counter value after the reboot.
        value: u64,
    },
    /// The next reading arrives on a later calendar day.
    NextDay {
        /// Steps taken since the previous reading.
        steps: u64,
    },
}

/// Strategy for a single sensor event.
pub fn sensor_event_strategy() -> impl Strategy<Value = SensorEvent> {
    prop_oneof![
        8 => (0u64..2_000, 1i64..240)
            .prop_map(|(steps, gap_minutes)| SensorEvent::Walk { steps, gap_minutes }),
        1 => (0u64..500).prop_map(|value| SensorEvent::Reboot { value }),
        1 => (0u64..2_000).prop_map(|steps| SensorEvent::NextDay { steps }),
    ]
}

/// Strategy for a sequence of sensor events.
pub fn sensor_event_sequence_strategy(
    min_events: usize,
    max_events: usize,
) -> impl Strategy<Value = Vec<SensorEvent>> {
    prop::collection::vec(sensor_event_strategy(), min_events..max_events)
}

/// Replays events into readings, starting from `start_value` at the fixture
/// epoch. Timestamps never go backwards.
pub fn readings_from_events(start_value: u64, events: &[SensorEvent]) -> Vec<RawReading> {
    let mut value = start_value;
    let mut at = epoch();
    let mut readings = vec![RawReading::new(value, at)];

    for event in events {
        match event {
            SensorEvent::Walk { steps, gap_minutes } => {
                value = value.saturating_add(*steps);
                at += Duration::minutes(*gap_minutes);
            }
            SensorEvent::Reboot { value: restarted } => {
                value = *restarted;
                at += Duration::minutes(1);
            }
            SensorEvent::NextDay { steps } => {
                value = value.saturating_add(*steps);
                at += Duration::days(1);
            }
        }
        readings.push(RawReading::new(value, at));
    }
    readings
}

/// Strategy for a reading stream with gaps, rollbacks and day changes.
pub fn reading_stream_strategy(
    min_events: usize,
    max_events: usize,
) -> impl Strategy<Value = Vec<RawReading>> {
    (0u64..100_000, sensor_event_sequence_strategy(min_events, max_events))
        .prop_map(|(start, events)| readings_from_events(start, &events))
}

/// Strategy for raw sensor counters as a caller would pass them, drops
/// included.
pub fn sensor_counter_strategy(
    min_len: usize,
    max_len: usize,
) -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(0i64..50_000, min_len..max_len)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
