//! Test snapshotters: mock `Snapshotter` implementations for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use keel_core::error::DomainError;
use keel_core::snapshot::AggregateSnapshot;
use keel_core::store::Snapshotter;

/// A snapshotter that records every save and returns a configured snapshot
/// from every load.
#[derive(Debug, Default)]
pub struct RecordingSnapshotter {
    load_result: Option<AggregateSnapshot>,
    saved: Mutex<Vec<AggregateSnapshot>>,
}

impl RecordingSnapshotter {
    /// Creates a snapshotter whose loads find nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a snapshotter whose loads return `snapshot`.
    #[must_use]
    pub fn returning(snapshot: AggregateSnapshot) -> Self {
        Self {
            load_result: Some(snapshot),
            saved: Mutex::new(Vec::new()),
        }
    }

    /// Returns a copy of every snapshot saved.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn saved(&self) -> Vec<AggregateSnapshot> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl Snapshotter for RecordingSnapshotter {
    async fn save_snapshot(&self, snapshot: &AggregateSnapshot) -> Result<(), DomainError> {
        self.saved.lock().unwrap().push(snapshot.clone());
        Ok(())
    }

    async fn load_snapshot(
        &self,
        _aggregate_id: &str,
    ) -> Result<Option<AggregateSnapshot>, DomainError> {
        Ok(self.load_result.clone())
    }
}

/// A snapshotter whose every operation fails with an infrastructure error.
#[derive(Debug, Default)]
pub struct FailingSnapshotter;

#[async_trait]
impl Snapshotter for FailingSnapshotter {
    async fn save_snapshot(&self, _snapshot: &AggregateSnapshot) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure("snapshot store unavailable".into()))
    }

    async fn load_snapshot(
        &self,
        _aggregate_id: &str,
    ) -> Result<Option<AggregateSnapshot>, DomainError> {
        Err(DomainError::Infrastructure("snapshot store unavailable".into()))
    }
}
