//! # Stepsync Testkit
//!
//! Test utilities for stepsync.
//!
//! This crate provides:
//! - Fixtures: pinned days, reading builders and pre-seeded coordinators
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stepsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn increments_are_added() {
//!     let harness = TestCoordinator::seeded(1000, 500);
//!     let outcome = harness.coordinator.update_cumulative_data(700, 72, 7.5).await.unwrap();
//!     assert_eq!(outcome.total(), 1200);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
