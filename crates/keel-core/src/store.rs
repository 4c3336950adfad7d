//! Storage capabilities consumed by the runtime.
//!
//! The core never talks to a database directly. Aggregate roots hold an
//! `EventSink` (and optionally a `Snapshotter`); replay stages read through a
//! `CommitSource`. Implementations are chosen once, when the `Loader` is
//! wired.

use async_trait::async_trait;

use crate::commit::{Commit, CommitReceipt};
use crate::error::DomainError;
use crate::snapshot::AggregateSnapshot;

/// Append-only store of commits with optimistic concurrency.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Atomically appends `commit`.
    ///
    /// The sink compares `commit.expected_sequence_number()` against the next
    /// sequence number it holds for the aggregate and accepts at most one of
    /// any set of racing commits bearing the same expected number.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` on a sequence mismatch and
    /// `DomainError::SinkFailure` for any other storage or transport failure.
    async fn sink(&self, commit: &Commit) -> Result<CommitReceipt, DomainError>;
}

/// Read side of the commit store, used during rehydration.
#[async_trait]
pub trait CommitSource: Send + Sync {
    /// Loads the commits of an aggregate whose sequence number is at least
    /// `from_sequence_number`, in ascending sequence order.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the store cannot be read.
    async fn load_commits(
        &self,
        aggregate_id: &str,
        from_sequence_number: i64,
    ) -> Result<Vec<Commit>, DomainError>;
}

/// Store of point-in-time aggregate states.
#[async_trait]
pub trait Snapshotter: Send + Sync {
    /// Persists a snapshot.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the snapshot is not well formed and
    /// `DomainError::Infrastructure` if the store fails.
    async fn save_snapshot(&self, snapshot: &AggregateSnapshot) -> Result<(), DomainError>;

    /// Loads the latest snapshot of an aggregate, if one exists.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the store fails.
    async fn load_snapshot(
        &self,
        aggregate_id: &str,
    ) -> Result<Option<AggregateSnapshot>, DomainError>;
}
