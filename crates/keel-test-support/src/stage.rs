//! Test loader stages: observe or break the rehydration pipeline.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use keel_core::aggregate::{Aggregate, AggregateRoot};
use keel_core::error::DomainError;
use keel_core::loader::LoaderStage;

/// What a stage saw when it ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageVisit {
    /// Label of the stage that ran.
    pub stage: &'static str,
    /// Aggregate id of the instance it received.
    pub aggregate_id: String,
    /// Next sequence number of the instance it received.
    pub next_sequence_number: i64,
}

/// Shared, ordered log of stage visits.
pub type StageLog = Arc<Mutex<Vec<StageVisit>>>;

/// Creates an empty stage log.
#[must_use]
pub fn stage_log() -> StageLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// A stage that records the instance it receives and passes it on untouched.
#[derive(Debug, Clone)]
pub struct RecordingStage {
    label: &'static str,
    log: StageLog,
}

impl RecordingStage {
    /// Creates a stage appending to `log` under `label`.
    #[must_use]
    pub fn new(label: &'static str, log: StageLog) -> Self {
        Self { label, log }
    }
}

#[async_trait]
impl<A: Aggregate> LoaderStage<A> for RecordingStage {
    fn name(&self) -> &'static str {
        self.label
    }

    async fn rehydrate(&self, root: AggregateRoot<A>) -> Result<AggregateRoot<A>, DomainError> {
        self.log.lock().unwrap().push(StageVisit {
            stage: self.label,
            aggregate_id: root.aggregate_id().to_owned(),
            next_sequence_number: root.next_sequence_number(),
        });
        Ok(root)
    }
}

/// A stage that records its visit and then fails.
#[derive(Debug, Clone)]
pub struct FailingStage {
    label: &'static str,
    log: StageLog,
}

impl FailingStage {
    /// Creates a failing stage appending to `log` under `label`.
    #[must_use]
    pub fn new(label: &'static str, log: StageLog) -> Self {
        Self { label, log }
    }
}

#[async_trait]
impl<A: Aggregate> LoaderStage<A> for FailingStage {
    fn name(&self) -> &'static str {
        self.label
    }

    async fn rehydrate(&self, root: AggregateRoot<A>) -> Result<AggregateRoot<A>, DomainError> {
        self.log.lock().unwrap().push(StageVisit {
            stage: self.label,
            aggregate_id: root.aggregate_id().to_owned(),
            next_sequence_number: root.next_sequence_number(),
        });
        Err(DomainError::Infrastructure(format!(
            "stage `{}` failed",
            self.label
        )))
    }
}
