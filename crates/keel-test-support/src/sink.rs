//! Test sinks: mock `EventSink` and `CommitSource` implementations for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use keel_core::commit::{Commit, CommitReceipt};
use keel_core::error::DomainError;
use keel_core::store::{CommitSource, EventSink};

/// An event sink that records every commit it is handed and accepts all of
/// them without checking sequence numbers.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    sunk: Mutex<Vec<Commit>>,
}

impl RecordingEventSink {
    /// Creates an empty recording sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every commit received, in arrival order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn commits(&self) -> Vec<Commit> {
        self.sunk.lock().unwrap().clone()
    }

    /// Number of times `sink` was called.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn call_count(&self) -> usize {
        self.sunk.lock().unwrap().len()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn sink(&self, commit: &Commit) -> Result<CommitReceipt, DomainError> {
        self.sunk.lock().unwrap().push(commit.clone());
        Ok(CommitReceipt::for_commit(commit))
    }
}

/// An event sink that always fails with a storage error. Records how often it
/// was called.
#[derive(Debug, Default)]
pub struct FailingEventSink {
    calls: Mutex<usize>,
}

impl FailingEventSink {
    /// Creates a failing sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `sink` was called.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl EventSink for FailingEventSink {
    async fn sink(&self, _commit: &Commit) -> Result<CommitReceipt, DomainError> {
        *self.calls.lock().unwrap() += 1;
        Err(DomainError::SinkFailure("connection refused".into()))
    }
}

/// An event sink that always reports that another writer got there first.
#[derive(Debug, Default)]
pub struct ConflictingEventSink;

#[async_trait]
impl EventSink for ConflictingEventSink {
    async fn sink(&self, commit: &Commit) -> Result<CommitReceipt, DomainError> {
        Err(DomainError::ConcurrencyConflict {
            aggregate_id: commit.aggregate_id().to_owned(),
            expected: commit.expected_sequence_number(),
            actual: commit.expected_sequence_number() + 1,
        })
    }
}

/// A commit source that serves a fixed history and records the
/// `from_sequence_number` of every request.
#[derive(Debug, Default)]
pub struct FixedCommitSource {
    history: Vec<Commit>,
    requests: Mutex<Vec<(String, i64)>>,
}

impl FixedCommitSource {
    /// Creates a source serving `history`, which must be in sequence order.
    #[must_use]
    pub fn new(history: Vec<Commit>) -> Self {
        Self {
            history,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Returns every `(aggregate_id, from_sequence_number)` requested.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn requests(&self) -> Vec<(String, i64)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommitSource for FixedCommitSource {
    async fn load_commits(
        &self,
        aggregate_id: &str,
        from_sequence_number: i64,
    ) -> Result<Vec<Commit>, DomainError> {
        self.requests
            .lock()
            .unwrap()
            .push((aggregate_id.to_owned(), from_sequence_number));
        Ok(self
            .history
            .iter()
            .filter(|c| {
                c.aggregate_id() == aggregate_id
                    && c.expected_sequence_number() >= from_sequence_number
            })
            .cloned()
            .collect())
    }
}

/// A commit source that always fails to read.
#[derive(Debug, Default)]
pub struct FailingCommitSource;

#[async_trait]
impl CommitSource for FailingCommitSource {
    async fn load_commits(
        &self,
        _aggregate_id: &str,
        _from_sequence_number: i64,
    ) -> Result<Vec<Commit>, DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }
}
