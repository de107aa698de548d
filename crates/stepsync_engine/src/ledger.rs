//! Single-writer synchronization state.
//!
//! `SyncLedger` holds every piece of mutable state the coordinator shares
//! between callers and the remote listener. Each method is a pure transition
//! on that state: no I/O, no clock reads, no logging. The coordinator guards
//! one ledger with one mutex, so `last_known_cumulative` and
//! `session_start_steps` always change together.
//!
//! Records from the subscription are never ordered by their `updated_at`:
//! that timestamp comes from whichever device wrote the record, and device
//! clocks disagree. The only records dropped are echoes of this ledger's own
//! earlier writes, recognized by value.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use stepsync_protocol::{CumulativeRecord, HealthSample, SyncProposal};

/// Number of submitted records remembered for echo detection.
const OWN_WRITE_HISTORY: usize = 32;

/// The current state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// No remote value observed yet.
    Initializing,
    /// Waiting for a sample or a flush; no outbound writes.
    Idle,
    /// One proposal is being written.
    Syncing,
    /// The last write failed; the sample is kept for retry.
    Error,
    /// The owning session ended.
    Closed,
}

impl CoordinatorState {
    /// Returns true while a write is outstanding.
    pub fn is_active(&self) -> bool {
        matches!(self, CoordinatorState::Syncing)
    }

    /// Returns true if a new proposal may be started.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, CoordinatorState::Idle | CoordinatorState::Error)
    }
}

/// A proposal that has moved the ledger into `Syncing`.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSync {
    /// What to write.
    pub proposal: SyncProposal,
    /// The record to send to the store.
    pub record: CumulativeRecord,
    /// Previous session start, set when the sensor counter had dropped below
    /// it and the session start was rebased.
    pub rebased_from: Option<u64>,
}

/// Result of applying a record received from the store subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApply {
    /// First observed value; the ledger left `Initializing`.
    Bootstrapped(u64),
    /// The record is the new cumulative base.
    Applied(u64),
    /// A write is in flight; the record is applied once it resolves.
    Deferred,
    /// The record is the in-flight write itself. Anything deferred before it
    /// was overwritten by it.
    Echo,
    /// The record is an earlier write of this ledger that a later write or
    /// remote record already superseded.
    Stale,
    /// The ledger is closed.
    Ignored,
}

/// Mutable synchronization state of one coordinator.
#[derive(Debug, Clone)]
pub struct SyncLedger {
    state: CoordinatorState,
    last_known_cumulative: u64,
    session_start_steps: u64,
    pending: Option<HealthSample>,
    in_flight: Option<PreparedSync>,
    deferred_remote: Option<CumulativeRecord>,
    own_writes: VecDeque<CumulativeRecord>,
    acknowledged: Option<CumulativeRecord>,
}

impl SyncLedger {
    /// Creates a ledger in `Initializing`.
    pub fn new(initial_session_start: u64) -> Self {
        Self {
            state: CoordinatorState::Initializing,
            last_known_cumulative: 0,
            session_start_steps: initial_session_start,
            pending: None,
            in_flight: None,
            deferred_remote: None,
            own_writes: VecDeque::with_capacity(OWN_WRITE_HISTORY),
            acknowledged: None,
        }
    }

    /// Creates an `Idle` ledger with a known base.
    pub fn with_base(last_known_cumulative: u64, session_start_steps: u64) -> Self {
        Self {
            state: CoordinatorState::Idle,
            last_known_cumulative,
            ..Self::new(session_start_steps)
        }
    }

    /// Returns the state.
    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Returns the last acknowledged or observed cumulative value.
    pub fn last_known_cumulative(&self) -> u64 {
        self.last_known_cumulative
    }

    /// Returns the sensor counter the current increment is measured from.
    pub fn session_start_steps(&self) -> u64 {
        self.session_start_steps
    }

    /// Returns the sample waiting to be synced, if any.
    pub fn pending(&self) -> Option<&HealthSample> {
        self.pending.as_ref()
    }

    /// Returns the proposal being written, if any.
    pub fn in_flight(&self) -> Option<&SyncProposal> {
        self.in_flight.as_ref().map(|p| &p.proposal)
    }

    /// Returns the remote record held back until the in-flight write resolves.
    pub fn deferred_remote(&self) -> Option<&CumulativeRecord> {
        self.deferred_remote.as_ref()
    }

    /// Returns the increment the pending sample would add.
    pub fn pending_increment(&self) -> u64 {
        self.pending
            .map_or(0, |s| s.sensor_steps.saturating_sub(self.session_start_steps))
    }

    /// Leaves `Initializing` with the store's current record.
    ///
    /// `None` means the user has no record yet; the first write creates it
    /// from a base of 0. Returns the new base, or `None` if the ledger was
    /// already initialized.
    pub fn bootstrap(&mut self, record: Option<&CumulativeRecord>) -> Option<u64> {
        if self.state != CoordinatorState::Initializing {
            return None;
        }
        self.last_known_cumulative = record.map_or(0, |r| r.steps);
        self.state = CoordinatorState::Idle;
        Some(self.last_known_cumulative)
    }

    /// Stores a sample, replacing any earlier unsynced one.
    pub fn enqueue(&mut self, sample: HealthSample) -> SyncResult<()> {
        if self.state == CoordinatorState::Closed {
            return Err(SyncError::Closed);
        }
        self.pending = Some(sample);
        Ok(())
    }

    /// Takes the pending sample and moves to `Syncing`.
    ///
    /// Returns `Ok(None)` when nothing is pending. A sensor counter below the
    /// session start is treated as a reset: the increment is clamped to 0 and
    /// the session start rebased, so negative steps are never credited. The
    /// returned record, stamped with `written_at`, is remembered so that its
    /// echo from the subscription can be recognized.
    pub fn begin(
        &mut self,
        user_id: &str,
        written_at: DateTime<Utc>,
    ) -> SyncResult<Option<PreparedSync>> {
        match self.state {
            CoordinatorState::Closed => return Err(SyncError::Closed),
            state if !state.can_start_sync() => {
                return Err(SyncError::InvalidStateTransition {
                    from: format!("{state:?}"),
                    to: "Syncing".into(),
                })
            }
            _ => {}
        }

        let Some(sample) = self.pending.take() else {
            return Ok(None);
        };

        let mut rebased_from = None;
        if sample.sensor_steps < self.session_start_steps {
            rebased_from = Some(self.session_start_steps);
            self.session_start_steps = sample.sensor_steps;
        }
        let increment = sample.sensor_steps - self.session_start_steps;

        let proposal = SyncProposal::new(self.last_known_cumulative, increment, sample);
        let record = proposal.to_record(user_id, written_at);
        if self.own_writes.len() == OWN_WRITE_HISTORY {
            self.own_writes.pop_front();
        }
        self.own_writes.push_back(record.clone());

        let prepared = PreparedSync {
            proposal,
            record,
            rebased_from,
        };
        self.in_flight = Some(prepared.clone());
        self.state = CoordinatorState::Syncing;
        Ok(Some(prepared))
    }

    /// Applies SYNC_OK for the in-flight proposal.
    ///
    /// Rebases the session start to the proposal's sensor counter. A remote
    /// record deferred during the write is applied afterwards. Returns the
    /// new cumulative value.
    pub fn acknowledge(&mut self) -> SyncResult<u64> {
        let prepared = self.in_flight.take().ok_or_else(|| SyncError::InvalidStateTransition {
            from: format!("{:?}", self.state),
            to: "Idle".into(),
        })?;

        self.last_known_cumulative = prepared.proposal.proposed_total;
        self.session_start_steps = prepared.proposal.sample.sensor_steps;
        self.acknowledged = Some(prepared.record);
        if self.state == CoordinatorState::Syncing {
            self.state = CoordinatorState::Idle;
        }
        self.apply_deferred();
        Ok(self.last_known_cumulative)
    }

    /// Applies SYNC_FAILED for the in-flight proposal.
    ///
    /// The session start is not rebased and the sample goes back to pending
    /// unless a newer one arrived meanwhile, so a retry recomputes the same
    /// increment against the same base.
    pub fn fail(&mut self) -> SyncResult<()> {
        let prepared = self.in_flight.take().ok_or_else(|| SyncError::InvalidStateTransition {
            from: format!("{:?}", self.state),
            to: "Error".into(),
        })?;

        if self.state == CoordinatorState::Syncing {
            self.state = CoordinatorState::Error;
            if self.pending.is_none() {
                self.pending = Some(prepared.proposal.sample);
            }
        }
        self.apply_deferred();
        Ok(())
    }

    /// Applies a record received from the store subscription.
    ///
    /// The record becomes the new cumulative base. Local steps are not lost:
    /// the unsynced increment is measured from `session_start_steps`, which a
    /// remote record never touches, so it is still added on top at the next
    /// sync. Records arrive in store order, so the latest one wins whatever
    /// its `updated_at` says.
    pub fn apply_remote(&mut self, record: CumulativeRecord) -> RemoteApply {
        match self.state {
            CoordinatorState::Closed => RemoteApply::Ignored,
            CoordinatorState::Initializing => match self.bootstrap(Some(&record)) {
                Some(base) => RemoteApply::Bootstrapped(base),
                None => RemoteApply::Ignored,
            },
            CoordinatorState::Syncing => {
                if self.in_flight.as_ref().is_some_and(|p| p.record == record) {
                    self.deferred_remote = None;
                    RemoteApply::Echo
                } else if self.own_writes.contains(&record) {
                    // The in-flight write supersedes every earlier one.
                    RemoteApply::Stale
                } else {
                    self.deferred_remote = Some(record);
                    RemoteApply::Deferred
                }
            }
            CoordinatorState::Idle | CoordinatorState::Error => {
                if self.is_superseded_echo(&record) {
                    return RemoteApply::Stale;
                }
                self.last_known_cumulative = record.steps;
                RemoteApply::Applied(self.last_known_cumulative)
            }
        }
    }

    /// Ends the session, returning the discarded unsynced sample.
    ///
    /// A write already in flight may still be acknowledged afterwards.
    pub fn close(&mut self) -> Option<HealthSample> {
        self.state = CoordinatorState::Closed;
        self.deferred_remote = None;
        self.pending.take()
    }

    // An own write other than the last acknowledged one. Failed writes count:
    // their increment is still pending and will be proposed again.
    fn is_superseded_echo(&self, record: &CumulativeRecord) -> bool {
        self.acknowledged.as_ref() != Some(record) && self.own_writes.contains(record)
    }

    fn apply_deferred(&mut self) {
        if let Some(record) = self.deferred_remote.take() {
            if self.state != CoordinatorState::Closed {
                self.last_known_cumulative = record.steps;
            }
        }
    }
}
