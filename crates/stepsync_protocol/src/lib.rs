//! # stepsync Protocol
//!
//! Record and proposal types exchanged between the sync coordinator and the
//! remote cumulative store.
//!
//! This crate provides:
//! - `CumulativeRecord`, the durable per-user record
//! - `HealthSample`, the validated input of one synchronization request
//! - `SyncProposal`, the ephemeral result of merging a session increment
//! - CBOR and JSON encoding/decoding for records
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod proposal;
mod record;

pub use error::{ProtocolError, ProtocolResult};
pub use proposal::{HealthSample, SyncProposal};
pub use record::CumulativeRecord;
