//! Recovery ordering and snapshot cadence.

use crate::error::SessionError;

/// What to do with a replayed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayStep {
    /// Next in sequence; apply it.
    Apply,
    /// Already applied; discard.
    Duplicate,
}

/// Classify an incoming event sequence against the last applied one.
pub fn classify(current: u64, incoming: u64) -> Result<ReplayStep, SessionError> {
    if incoming <= current {
        return Ok(ReplayStep::Duplicate);
    }
    let expected = current + 1;
    if incoming != expected {
        return Err(SessionError::SequenceGap {
            expected,
            actual: incoming,
        });
    }
    Ok(ReplayStep::Apply)
}

/// Counts events since the last snapshot. An interval of zero disables
/// opportunistic snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPolicy {
    every: u64,
    since_last: u64,
}

impl SnapshotPolicy {
    pub fn new(every: u64) -> Self {
        Self {
            every,
            since_last: 0,
        }
    }

    pub fn record(&mut self, events: u64) {
        self.since_last += events;
    }

    pub fn is_due(&self) -> bool {
        self.every > 0 && self.since_last >= self.every
    }

    pub fn mark_taken(&mut self) {
        self.since_last = 0;
    }

    pub fn since_last(&self) -> u64 {
        self.since_last
    }

    pub fn every(&self) -> u64 {
        self.every
    }
}
