//! # stepsync Core
//!
//! Sensor-side primitives for stepsync.
//!
//! This crate provides:
//! - `RawReading` and `DayAnchor` data types
//! - `SensorBaselineTracker` for turning a resetting hardware counter into
//!   non-negative session deltas
//! - `CumulativeFeed` for fanning cumulative values out to observers
//!
//! Nothing in this crate performs I/O or suspends; `observe()` is safe to call
//! from sensor callbacks.
//!
//! ## Key Invariants
//!
//! - A session delta is never negative
//! - A new calendar day always starts a new baseline
//! - An uninitialized baseline is `None`, never the sentinel `0`

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod feed;
mod tracker;
mod types;

pub use error::{CoreError, CoreResult};
pub use feed::{CumulativeEvent, CumulativeFeed, UpdateSource};
pub use tracker::SensorBaselineTracker;
pub use types::{DayAnchor, RawReading, ResetKind, SessionBaseline, SessionDelta, DAY_FORMAT};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
