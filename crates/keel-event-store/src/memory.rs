//! In-memory commit store and snapshotter.
//!
//! Reference implementations for tests, demos and single-process use. The
//! commit store applies the same acceptance rule as the PostgreSQL store: a
//! commit is accepted only if its expected sequence number equals the next
//! sequence number recorded for the aggregate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use keel_core::commit::{Commit, CommitReceipt};
use keel_core::error::DomainError;
use keel_core::snapshot::AggregateSnapshot;
use keel_core::store::{CommitSource, EventSink, Snapshotter};

type Streams = Arc<Mutex<HashMap<String, Vec<Commit>>>>;

/// Commit store held in process memory.
///
/// Empty commits are accepted and occupy a sequence number, acting as
/// precedence markers.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    streams: Streams,
}

impl InMemoryEventStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The sequence number the next commit for `aggregate_id` must expect.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn next_sequence_number(&self, aggregate_id: &str) -> i64 {
        let streams = self.streams.lock().expect("commit store lock poisoned");
        next_in(streams.get(aggregate_id).map_or(&[][..], Vec::as_slice))
    }

    /// Every commit recorded for `aggregate_id`, in sequence order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn commits(&self, aggregate_id: &str) -> Vec<Commit> {
        let streams = self.streams.lock().expect("commit store lock poisoned");
        streams.get(aggregate_id).cloned().unwrap_or_default()
    }
}

#[allow(clippy::cast_possible_wrap)]
fn next_in(stream: &[Commit]) -> i64 {
    stream.len() as i64 + 1
}

#[async_trait]
impl EventSink for InMemoryEventStore {
    #[tracing::instrument(
        skip(self, commit),
        fields(
            aggregate_id = commit.aggregate_id(),
            expected_sequence_number = commit.expected_sequence_number(),
        )
    )]
    async fn sink(&self, commit: &Commit) -> Result<CommitReceipt, DomainError> {
        let mut streams = self
            .streams
            .lock()
            .map_err(|_| DomainError::SinkFailure("commit store lock poisoned".into()))?;
        let actual = next_in(
            streams
                .get(commit.aggregate_id())
                .map_or(&[][..], Vec::as_slice),
        );
        if commit.expected_sequence_number() != actual {
            tracing::debug!(actual, "rejecting out-of-date commit");
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id: commit.aggregate_id().to_owned(),
                expected: commit.expected_sequence_number(),
                actual,
            });
        }

        streams
            .entry(commit.aggregate_id().to_owned())
            .or_default()
            .push(commit.clone());
        Ok(CommitReceipt::for_commit(commit))
    }
}

#[async_trait]
impl CommitSource for InMemoryEventStore {
    async fn load_commits(
        &self,
        aggregate_id: &str,
        from_sequence_number: i64,
    ) -> Result<Vec<Commit>, DomainError> {
        let streams = self
            .streams
            .lock()
            .map_err(|_| DomainError::Infrastructure("commit store lock poisoned".into()))?;
        Ok(streams
            .get(aggregate_id)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|c| c.expected_sequence_number() >= from_sequence_number)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Snapshot store held in process memory, keeping the newest snapshot per
/// aggregate.
#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshotter {
    snapshots: Arc<RwLock<HashMap<String, AggregateSnapshot>>>,
}

impl InMemorySnapshotter {
    /// Creates an empty snapshotter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Snapshotter for InMemorySnapshotter {
    #[tracing::instrument(skip(self, snapshot), fields(aggregate_id = %snapshot.aggregate_id))]
    async fn save_snapshot(&self, snapshot: &AggregateSnapshot) -> Result<(), DomainError> {
        if !snapshot.is_well_formed() {
            return Err(DomainError::Validation(format!(
                "refusing malformed snapshot for aggregate `{}`",
                snapshot.aggregate_id
            )));
        }

        let mut snapshots = self
            .snapshots
            .write()
            .map_err(|_| DomainError::Infrastructure("snapshot store lock poisoned".into()))?;
        match snapshots.get(&snapshot.aggregate_id) {
            Some(existing) if existing.sequence_number > snapshot.sequence_number => {
                tracing::debug!(
                    existing = existing.sequence_number,
                    offered = snapshot.sequence_number,
                    "keeping newer snapshot"
                );
            }
            _ => {
                snapshots.insert(snapshot.aggregate_id.clone(), snapshot.clone());
            }
        }
        Ok(())
    }

    async fn load_snapshot(
        &self,
        aggregate_id: &str,
    ) -> Result<Option<AggregateSnapshot>, DomainError> {
        let snapshots = self
            .snapshots
            .read()
            .map_err(|_| DomainError::Infrastructure("snapshot store lock poisoned".into()))?;
        let found = snapshots.get(aggregate_id).cloned();
        tracing::trace!(aggregate_id, found = found.is_some(), "snapshot lookup");
        Ok(found)
    }
}
