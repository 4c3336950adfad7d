//! Rehydration pipeline.
//!
//! A [`Loader`] builds a pristine [`AggregateRoot`] and threads it through an
//! ordered list of [`LoaderStage`]s. The usual pipeline is
//! `[SnapshotStage, ReplayStage]`: restore the latest snapshot, then replay
//! the commits recorded after it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::aggregate::{Aggregate, AggregateRoot};
use crate::clock::{Clock, SystemClock};
use crate::error::DomainError;
use crate::snapshot::SnapshotPolicy;
use crate::store::{CommitSource, EventSink, Snapshotter};

/// One step of rehydration.
#[async_trait]
pub trait LoaderStage<A: Aggregate>: Send + Sync {
    /// Stage name for logging.
    fn name(&self) -> &'static str;

    /// Takes the previous stage's output and returns the instance for the
    /// next stage.
    ///
    /// # Errors
    ///
    /// Any error aborts the whole pipeline.
    async fn rehydrate(&self, root: AggregateRoot<A>) -> Result<AggregateRoot<A>, DomainError>;
}

/// Restores the latest snapshot, if any.
///
/// Falls back to an untouched root when the aggregate type cannot restore
/// state, so a later replay stage rebuilds from the first commit.
#[derive(Clone)]
pub struct SnapshotStage {
    snapshotter: Arc<dyn Snapshotter>,
}

impl SnapshotStage {
    /// Creates a stage reading from `snapshotter`.
    #[must_use]
    pub fn new(snapshotter: Arc<dyn Snapshotter>) -> Self {
        Self { snapshotter }
    }
}

impl fmt::Debug for SnapshotStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl<A: Aggregate> LoaderStage<A> for SnapshotStage {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    async fn rehydrate(&self, mut root: AggregateRoot<A>) -> Result<AggregateRoot<A>, DomainError> {
        let Some(snapshot) = self.snapshotter.load_snapshot(root.aggregate_id()).await? else {
            tracing::debug!(aggregate_id = root.aggregate_id(), "no snapshot found");
            return Ok(root);
        };

        let sequence_number = snapshot.sequence_number;
        match root.restore_snapshot(snapshot) {
            Ok(()) => {
                tracing::debug!(
                    aggregate_id = root.aggregate_id(),
                    sequence_number,
                    "restored snapshot"
                );
                Ok(root)
            }
            Err(DomainError::SnapshotUnsupported(reason)) => {
                tracing::warn!(
                    aggregate_id = root.aggregate_id(),
                    %reason,
                    "ignoring snapshot; replaying full history"
                );
                Ok(root)
            }
            Err(err) => Err(err),
        }
    }
}

/// Replays every commit at or after the root's next sequence number.
#[derive(Clone)]
pub struct ReplayStage {
    source: Arc<dyn CommitSource>,
}

impl ReplayStage {
    /// Creates a stage reading from `source`.
    #[must_use]
    pub fn new(source: Arc<dyn CommitSource>) -> Self {
        Self { source }
    }
}

impl fmt::Debug for ReplayStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl<A: Aggregate> LoaderStage<A> for ReplayStage {
    fn name(&self) -> &'static str {
        "replay"
    }

    async fn rehydrate(&self, mut root: AggregateRoot<A>) -> Result<AggregateRoot<A>, DomainError> {
        let from = root.next_sequence_number();
        let commits = self.source.load_commits(root.aggregate_id(), from).await?;
        for commit in &commits {
            root.apply_commit(commit)?;
        }
        tracing::debug!(
            aggregate_id = root.aggregate_id(),
            from,
            replayed = commits.len(),
            "replayed commits"
        );
        Ok(root)
    }
}

/// Builds caught-up aggregate roots through an ordered stage pipeline.
///
/// The sink, snapshotter, snapshot policy and clock given here are handed to
/// every root the loader creates.
pub struct Loader<A: Aggregate> {
    sink: Arc<dyn EventSink>,
    snapshotter: Option<Arc<dyn Snapshotter>>,
    snapshot_policy: SnapshotPolicy,
    clock: Arc<dyn Clock>,
    stages: Vec<Box<dyn LoaderStage<A>>>,
}

impl<A: Aggregate> Loader<A> {
    /// Creates a loader with no stages; roots come out pristine.
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            snapshotter: None,
            snapshot_policy: SnapshotPolicy::Never,
            clock: Arc::new(SystemClock),
            stages: Vec::new(),
        }
    }

    /// Appends a stage to the pipeline.
    #[must_use]
    pub fn with_stage(mut self, stage: impl LoaderStage<A> + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Associates a snapshotter with every loaded root.
    #[must_use]
    pub fn with_snapshotter(mut self, snapshotter: Arc<dyn Snapshotter>) -> Self {
        self.snapshotter = Some(snapshotter);
        self
    }

    /// Sets the snapshot policy of every loaded root.
    #[must_use]
    pub fn with_snapshot_policy(mut self, policy: SnapshotPolicy) -> Self {
        self.snapshot_policy = policy;
        self
    }

    /// Sets the clock of every loaded root.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Names of the configured stages, in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Instantiates `A`, assigns `aggregate_id`, and runs every stage in order.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for an empty id, the first stage
    /// failure unchanged, or `DomainError::MalformedLoaderOutput` if the final
    /// instance is not a caught-up root for `aggregate_id`.
    #[tracing::instrument(skip(self), fields(aggregate_kind = A::KIND))]
    pub async fn load_aggregate(
        &self,
        aggregate_id: &str,
    ) -> Result<AggregateRoot<A>, DomainError> {
        if aggregate_id.trim().is_empty() {
            return Err(DomainError::Validation(
                "aggregate id must not be empty".into(),
            ));
        }

        let mut root = AggregateRoot::<A>::new(aggregate_id, Arc::clone(&self.sink))
            .with_snapshot_policy(self.snapshot_policy)
            .with_clock(Arc::clone(&self.clock));
        if let Some(snapshotter) = &self.snapshotter {
            root = root.with_snapshotter(Arc::clone(snapshotter));
        }

        for stage in &self.stages {
            root = stage.rehydrate(root).await.inspect_err(|err| {
                tracing::warn!(stage = stage.name(), error = %err, "rehydration stage failed");
            })?;
        }

        check_output(&root, aggregate_id)?;
        tracing::info!(
            next_sequence_number = root.next_sequence_number(),
            "aggregate loaded"
        );
        Ok(root)
    }
}

impl<A: Aggregate> fmt::Debug for Loader<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("aggregate_kind", &A::KIND)
            .field("stages", &self.stage_names())
            .field("snapshot_policy", &self.snapshot_policy)
            .finish_non_exhaustive()
    }
}

/// A loaded root must be the requested aggregate with nothing staged.
fn check_output<A: Aggregate>(
    root: &AggregateRoot<A>,
    aggregate_id: &str,
) -> Result<(), DomainError> {
    if root.aggregate_id() != aggregate_id {
        return Err(DomainError::MalformedLoaderOutput(format!(
            "requested aggregate {aggregate_id}, pipeline returned {}",
            root.aggregate_id()
        )));
    }
    if !root.staged_events().is_empty() {
        return Err(DomainError::MalformedLoaderOutput(format!(
            "aggregate {aggregate_id} came out of rehydration with {} staged events",
            root.staged_events().len()
        )));
    }
    if root.next_sequence_number() < 1 {
        return Err(DomainError::MalformedLoaderOutput(format!(
            "aggregate {aggregate_id} has invalid next sequence number {}",
            root.next_sequence_number()
        )));
    }
    Ok(())
}
