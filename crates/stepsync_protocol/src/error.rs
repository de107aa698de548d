//! Error types for record encoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding records.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// CBOR encoding failed.
    #[error("CBOR encode error: {0}")]
    CborEncode(String),

    /// CBOR decoding failed.
    #[error("CBOR decode error: {0}")]
    CborDecode(String),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A decoded record violates a field constraint.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}
