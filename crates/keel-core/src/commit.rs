//! Commits: the atomic unit of persistence and sequence advancement.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::event::Event;

/// Opaque metadata carried alongside a commit.
pub type CommitMetadata = serde_json::Map<String, serde_json::Value>;

/// An ordered batch of events persisted atomically under one sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    aggregate_id: String,
    expected_sequence_number: i64,
    events: Vec<Event>,
    metadata: CommitMetadata,
}

impl Commit {
    /// Builds a commit.
    ///
    /// An empty event list is legal; whether it is a no-op or a precedence
    /// marker is up to the sink.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the aggregate id is empty, the
    /// expected sequence number is negative, or an event belongs to another
    /// aggregate.
    pub fn new(
        aggregate_id: impl Into<String>,
        expected_sequence_number: i64,
        events: Vec<Event>,
        metadata: CommitMetadata,
    ) -> Result<Self, DomainError> {
        let aggregate_id = aggregate_id.into();
        if aggregate_id.trim().is_empty() {
            return Err(DomainError::Validation(
                "commit aggregate id must not be empty".into(),
            ));
        }
        if expected_sequence_number < 0 {
            return Err(DomainError::Validation(format!(
                "expected sequence number must be non-negative, got {expected_sequence_number}"
            )));
        }
        if let Some(stray) = events.iter().find(|e| e.aggregate_id() != aggregate_id) {
            return Err(DomainError::Validation(format!(
                "event {} belongs to aggregate {}, not {aggregate_id}",
                stray.event_id(),
                stray.aggregate_id()
            )));
        }

        Ok(Self {
            aggregate_id,
            expected_sequence_number,
            events,
            metadata,
        })
    }

    /// The aggregate this commit belongs to.
    #[must_use]
    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    /// The sequence number the sink must currently hold to accept the commit.
    #[must_use]
    pub fn expected_sequence_number(&self) -> i64 {
        self.expected_sequence_number
    }

    /// Events in staging order.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Whether the commit carries no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Opaque metadata.
    #[must_use]
    pub fn metadata(&self) -> &CommitMetadata {
        &self.metadata
    }
}

/// Acknowledgement returned by an event sink for an accepted commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    /// The aggregate the commit was appended to.
    pub aggregate_id: String,
    /// The sequence number the commit now occupies.
    pub committed_sequence_number: i64,
    /// Number of events persisted.
    pub event_count: usize,
}

impl CommitReceipt {
    /// Builds the receipt for an accepted commit.
    #[must_use]
    pub fn for_commit(commit: &Commit) -> Self {
        Self {
            aggregate_id: commit.aggregate_id.clone(),
            committed_sequence_number: commit.expected_sequence_number,
            event_count: commit.events.len(),
        }
    }
}
