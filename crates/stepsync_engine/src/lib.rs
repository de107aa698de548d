//! # Stepsync Engine
//!
//! Cumulative sync coordinator for stepsync.
//!
//! This crate provides:
//! - Coordinator state machine (initializing → idle → syncing → idle/error)
//! - Remote store abstraction with an in-memory reference store
//! - Coalescing of samples submitted while a write is in flight
//! - Retry with exponential backoff
//! - Session wiring from a sensor baseline tracker to a coordinator
//!
//! ## Architecture
//!
//! The coordinator follows a **base-plus-increment** model:
//! 1. Learn the remote cumulative value (subscription or fetch)
//! 2. Measure the local increment since the session start
//! 3. Write `base + increment` and rebase the session start on success
//!
//! ## Key Invariants
//!
//! - The remote value is only ever extended by session increments, never
//!   overwritten with a raw sensor value
//! - An increment is credited at most once per successful write
//! - One outstanding write per coordinator
//! - Remote records replace the base but never the session start

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod error;
mod ledger;
mod session;
mod store;

pub use config::{RetryConfig, SyncConfig};
pub use coordinator::{CumulativeSyncCoordinator, SyncOutcome, SyncStats};
pub use error::{SubscriptionError, SyncError, SyncResult};
pub use ledger::{CoordinatorState, PreparedSync, RemoteApply, SyncLedger};
pub use session::StepSession;
pub use store::{MemoryCumulativeStore, RecordStream, RemoteCumulativeStore};
