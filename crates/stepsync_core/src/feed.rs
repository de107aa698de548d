//! Cumulative feed for observing published totals.
//!
//! The feed emits an event every time the cumulative value a coordinator
//! publishes changes, enabling:
//! - Dashboard and chart updates
//! - Catch-up polling after an observer reconnects
//! - Audit logging
//!
//! # Usage
//!
//! ```rust
//! use stepsync_core::{CumulativeEvent, CumulativeFeed, UpdateSource};
//!
//! let feed = CumulativeFeed::new();
//! let receiver = feed.subscribe();
//!
//! feed.publish("user-1", 1200, UpdateSource::Local);
//!
//! let event: CumulativeEvent = receiver.recv().unwrap();
//! assert_eq!(event.steps, 1200);
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, Sender};

/// Where a published cumulative value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateSource {
    /// A local proposal that the store acknowledged.
    Local,
    /// A record written by another writer and received through the store
    /// subscription.
    Remote,
}

/// A single published cumulative value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CumulativeEvent {
    /// Feed-assigned sequence number, starting at 1.
    pub sequence: u64,
    /// Owner of the cumulative record.
    pub user_id: String,
    /// Cumulative step count.
    pub steps: u64,
    /// Origin of the value.
    pub source: UpdateSource,
}

struct FeedState {
    next_sequence: u64,
    history: Vec<CumulativeEvent>,
}

/// Distributes published cumulative values to observers.
///
/// The feed:
/// - Assigns a strictly increasing sequence to each event
/// - Supports multiple subscribers and drops disconnected ones
/// - Keeps bounded history for polling
/// - Is thread-safe; observers never get write access to the coordinator
pub struct CumulativeFeed {
    subscribers: RwLock<Vec<Sender<CumulativeEvent>>>,
    state: RwLock<FeedState>,
    max_history: usize,
}

impl CumulativeFeed {
    /// Creates a new feed.
    pub fn new() -> Self {
        Self::with_max_history(1024)
    }

    /// Creates a feed with a specific history limit.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            state: RwLock::new(FeedState {
                next_sequence: 1,
                history: Vec::new(),
            }),
            max_history,
        }
    }

    /// Subscribes to the feed.
    ///
    /// Returns a receiver that will receive all future events.
    pub fn subscribe(&self) -> Receiver<CumulativeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Publishes a cumulative value and returns the emitted event.
    pub fn publish(
        &self,
        user_id: impl Into<String>,
        steps: u64,
        source: UpdateSource,
    ) -> CumulativeEvent {
        let event = {
            let mut state = self.state.write();
            let event = CumulativeEvent {
                sequence: state.next_sequence,
                user_id: user_id.into(),
                steps,
                source,
            };
            state.next_sequence += 1;
            state.history.push(event.clone());
            if state.history.len() > self.max_history {
                let to_remove = state.history.len() - self.max_history;
                state.history.drain(0..to_remove);
            }
            event
        };

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        event
    }

    /// Polls events with sequence > cursor, up to limit.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<CumulativeEvent> {
        let state = self.state.read();
        state
            .history
            .iter()
            .filter(|e| e.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the most recent event, if any.
    pub fn latest(&self) -> Option<CumulativeEvent> {
        self.state.read().history.last().cloned()
    }

    /// Returns the latest sequence number, or 0 if nothing was published.
    pub fn latest_sequence(&self) -> u64 {
        self.state.read().next_sequence - 1
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Returns the number of events in history.
    pub fn history_len(&self) -> usize {
        self.state.read().history.len()
    }
}

impl Default for CumulativeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CumulativeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CumulativeFeed")
            .field("latest_sequence", &self.latest_sequence())
            .field("subscribers", &self.subscriber_count())
            .field("max_history", &self.max_history)
            .finish()
    }
}
