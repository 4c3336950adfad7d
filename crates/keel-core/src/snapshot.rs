//! Snapshot support for bounding replay cost.
//!
//! A snapshot captures aggregate state as of the last committed sequence
//! number. Loading replays only the commits after that point.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Point-in-time capture of aggregate state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    /// The aggregate this snapshot belongs to.
    pub aggregate_id: String,
    /// The last committed sequence number reflected in `state`.
    pub sequence_number: i64,
    /// Opaque captured state.
    pub state: serde_json::Value,
    /// Ids of the commands whose events `state` reflects.
    #[serde(default)]
    pub executed_command_ids: BTreeSet<String>,
}

impl AggregateSnapshot {
    /// Creates a snapshot.
    #[must_use]
    pub fn new(
        aggregate_id: impl Into<String>,
        sequence_number: i64,
        state: serde_json::Value,
    ) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            sequence_number,
            state,
            executed_command_ids: BTreeSet::new(),
        }
    }

    /// Records the command ids already folded into `state`.
    #[must_use]
    pub fn with_executed_command_ids<I, S>(mut self, command_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.executed_command_ids = command_ids.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the snapshot is fit to be stored: a non-empty aggregate id, a
    /// non-negative sequence number, and a non-null state payload.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        !self.aggregate_id.trim().is_empty() && self.sequence_number >= 0 && !self.state.is_null()
    }
}

/// When an aggregate root saves a snapshot on its own after a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotPolicy {
    /// Only explicit `save_snapshot` calls write snapshots.
    #[default]
    Never,
    /// Snapshot whenever the committed sequence number is a multiple of N.
    EveryNCommits(u64),
}

impl SnapshotPolicy {
    /// Whether a snapshot is due after `committed_sequence_number` was accepted.
    #[must_use]
    pub fn is_due(self, committed_sequence_number: i64) -> bool {
        match self {
            Self::Never | Self::EveryNCommits(0) => false,
            Self::EveryNCommits(n) => u64::try_from(committed_sequence_number)
                .is_ok_and(|seq| seq > 0 && seq % n == 0),
        }
    }
}
