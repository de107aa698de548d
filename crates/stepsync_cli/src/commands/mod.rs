//! CLI command implementations.

pub mod record;
pub mod replay;
