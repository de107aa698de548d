//! Error types for the sync engine.

use stepsync_core::CoreError;
use stepsync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Input was negative or malformed and was rejected at the boundary.
    #[error("invalid input: {0}")]
    InvalidInput(#[from] CoreError),

    /// The remote store rejected or failed the operation (SYNC_FAILED).
    #[error("store error: {message}")]
    Store {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A record could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The remote subscription could not be established.
    #[error("subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    /// The write did not complete within the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// The sample was discarded by `close()` before it was written.
    #[error("sync cancelled")]
    Cancelled,

    /// The coordinator was closed; the session has ended.
    #[error("coordinator closed")]
    Closed,

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl SyncError {
    /// Creates a retryable store error.
    pub fn store_retryable(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable store error (permission denied, rejected record).
    pub fn store_fatal(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Store { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            _ => false,
        }
    }
}

/// Errors reported by the passive remote-change listener.
///
/// These are surfaced for logging and stats only; they never block local
/// tracking or synchronization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The listener fell behind and missed updates.
    #[error("subscription lagged, {0} updates skipped")]
    Lagged(u64),

    /// The store closed the subscription.
    #[error("subscription closed by store")]
    Closed,

    /// The store reported a failure on the subscription channel.
    #[error("remote listener failed: {0}")]
    Remote(String),
}
