//! Aggregate root abstraction.
//!
//! An [`Aggregate`] is plain domain state plus a handler table. The
//! [`AggregateRoot`] wraps that state with the event-sourcing machinery:
//! staging, dispatch, replay, commit, snapshot capture and command
//! deduplication.
//!
//! A root is transient. Load a fresh one per use-case, run one command,
//! commit, and drop it. After a failed commit or a dispatch error the instance
//! is ahead of the store and must not be reused; reload instead.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::command::Command;
use crate::commit::{Commit, CommitMetadata, CommitReceipt};
use crate::error::DomainError;
use crate::event::{Event, EventType};
use crate::handler::HandlerTable;
use crate::snapshot::{AggregateSnapshot, SnapshotPolicy};
use crate::store::{EventSink, Snapshotter};

/// Domain state whose every change is an event.
pub trait Aggregate: Default + Send + Sync + 'static {
    /// Aggregate type name, used in logs, errors and commit metadata.
    const KIND: &'static str;

    /// The closed set of event tags this aggregate understands.
    type EventType: EventType;

    /// The handler table for this type, built once.
    fn handlers() -> &'static HandlerTable<Self>;

    /// Extracts state for a snapshot.
    ///
    /// # Errors
    ///
    /// The default returns `DomainError::SnapshotUnsupported`.
    fn capture_state(&self) -> Result<serde_json::Value, DomainError> {
        Err(DomainError::SnapshotUnsupported(format!(
            "aggregate kind `{}` does not capture state",
            Self::KIND
        )))
    }

    /// Rebuilds state from a snapshot payload.
    ///
    /// # Errors
    ///
    /// The default returns `DomainError::SnapshotUnsupported`.
    fn restore_state(_state: serde_json::Value) -> Result<Self, DomainError> {
        Err(DomainError::SnapshotUnsupported(format!(
            "aggregate kind `{}` does not restore state",
            Self::KIND
        )))
    }
}

/// Event-sourced wrapper around aggregate state.
pub struct AggregateRoot<A: Aggregate> {
    id: String,
    state: A,
    next_sequence_number: i64,
    staged: Vec<Event>,
    executed_command_ids: HashSet<String>,
    active_command_id: Option<String>,
    sink: Arc<dyn EventSink>,
    snapshotter: Option<Arc<dyn Snapshotter>>,
    snapshot_policy: SnapshotPolicy,
    clock: Arc<dyn Clock>,
}

impl<A: Aggregate> AggregateRoot<A> {
    /// Creates a pristine root at sequence number 1 bound to `sink`.
    #[must_use]
    pub fn new(id: impl Into<String>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            id: id.into(),
            state: A::default(),
            next_sequence_number: 1,
            staged: Vec::new(),
            executed_command_ids: HashSet::new(),
            active_command_id: None,
            sink,
            snapshotter: None,
            snapshot_policy: SnapshotPolicy::Never,
            clock: Arc::new(SystemClock),
        }
    }

    /// Associates a snapshotter.
    #[must_use]
    pub fn with_snapshotter(mut self, snapshotter: Arc<dyn Snapshotter>) -> Self {
        self.snapshotter = Some(snapshotter);
        self
    }

    /// Sets when the root snapshots itself after a commit.
    #[must_use]
    pub fn with_snapshot_policy(mut self, policy: SnapshotPolicy) -> Self {
        self.snapshot_policy = policy;
        self
    }

    /// Replaces the clock used to timestamp raised events.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the aggregate identifier.
    #[must_use]
    pub fn aggregate_id(&self) -> &str {
        &self.id
    }

    /// Current domain state, including staged events.
    #[must_use]
    pub fn state(&self) -> &A {
        &self.state
    }

    /// The sequence number the store must hold for the next commit.
    #[must_use]
    pub fn next_sequence_number(&self) -> i64 {
        self.next_sequence_number
    }

    /// Events applied in memory but not yet committed.
    #[must_use]
    pub fn staged_events(&self) -> &[Event] {
        &self.staged
    }

    /// Whether `command_id` has already been executed against this instance's
    /// history.
    #[must_use]
    pub fn has_executed(&self, command_id: &str) -> bool {
        self.executed_command_ids.contains(command_id)
    }

    /// Runs `f` for `command` unless its id was already executed.
    ///
    /// Every event raised inside `f` carries the command id. A redelivered
    /// command is skipped and returns `Ok(())`.
    ///
    /// # Errors
    ///
    /// Propagates whatever `f` returns. A dispatch error leaves the instance
    /// unusable.
    pub fn execute<C, F>(&mut self, command: &C, f: F) -> Result<(), DomainError>
    where
        C: Command,
        F: FnOnce(&mut Self, &C) -> Result<(), DomainError>,
    {
        let command_id = command.command_id();
        if self.has_executed(command_id) {
            tracing::debug!(
                aggregate_id = %self.id,
                command_type = command.command_type(),
                command_id,
                "skipping already executed command"
            );
            return Ok(());
        }

        let outer = self.active_command_id.replace(command_id.to_owned());
        let result = f(self, command);
        self.active_command_id = outer;
        result
    }

    /// Builds an event from `tag` and `payload` and stages it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the payload cannot be serialized,
    /// or any error from [`stage`](Self::stage).
    pub fn raise<P: Serialize>(
        &mut self,
        tag: A::EventType,
        payload: &P,
    ) -> Result<(), DomainError> {
        let payload = serde_json::to_value(payload).map_err(|e| {
            DomainError::Validation(format!("`{}` payload is not serializable: {e}", tag.name()))
        })?;
        let mut event = Event::new(self.id.clone(), tag, payload, self.clock.now());
        if let Some(command_id) = &self.active_command_id {
            event = event.with_command_id(command_id.clone());
        }
        self.stage(event)
    }

    /// Applies `event` to state and appends it to the staged buffer.
    ///
    /// There is no rollback; a failed stage poisons the instance.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the event belongs to another
    /// aggregate and `DomainError::UnhandledEventType` if its type has no
    /// handler.
    pub fn stage(&mut self, event: Event) -> Result<(), DomainError> {
        self.ensure_owned(event.aggregate_id(), "event")?;
        self.apply(&event)?;
        tracing::debug!(
            aggregate_id = %self.id,
            event_type = event.event_type(),
            staged = self.staged.len() + 1,
            "staged event"
        );
        self.staged.push(event);
        Ok(())
    }

    /// Replays a persisted commit during rehydration.
    ///
    /// Every event is applied in order, then the sequence number advances by
    /// exactly one.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the commit belongs to another
    /// aggregate or is out of sequence, and any dispatch error.
    pub fn apply_commit(&mut self, commit: &Commit) -> Result<(), DomainError> {
        self.ensure_owned(commit.aggregate_id(), "commit")?;
        if commit.expected_sequence_number() != self.next_sequence_number {
            return Err(DomainError::Validation(format!(
                "commit for sequence {} replayed onto aggregate {} at sequence {}",
                commit.expected_sequence_number(),
                self.id,
                self.next_sequence_number
            )));
        }

        for event in commit.events() {
            self.apply(event)?;
        }
        self.next_sequence_number += 1;
        Ok(())
    }

    /// Restores state and executed command ids from a snapshot onto a
    /// pristine root.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the snapshot is malformed, belongs
    /// to another aggregate, sits at the last representable sequence number,
    /// or the root already has history, and `DomainError::SnapshotUnsupported`
    /// if the type cannot restore state.
    pub fn restore_snapshot(&mut self, snapshot: AggregateSnapshot) -> Result<(), DomainError> {
        if !snapshot.is_well_formed() {
            return Err(DomainError::Validation(format!(
                "snapshot for aggregate {} is malformed",
                snapshot.aggregate_id
            )));
        }
        self.ensure_owned(&snapshot.aggregate_id, "snapshot")?;
        if self.next_sequence_number != 1 || !self.staged.is_empty() {
            return Err(DomainError::Validation(format!(
                "snapshot restored onto aggregate {} after history was applied",
                self.id
            )));
        }

        let next_sequence_number = snapshot.sequence_number.checked_add(1).ok_or_else(|| {
            DomainError::Validation(format!(
                "snapshot for aggregate {} has no sequence number after {}",
                self.id, snapshot.sequence_number
            ))
        })?;

        self.state = A::restore_state(snapshot.state)?;
        self.executed_command_ids = snapshot.executed_command_ids.into_iter().collect();
        self.next_sequence_number = next_sequence_number;
        Ok(())
    }

    /// Persists the staged events as one commit.
    ///
    /// Returns `Ok(None)` without touching the sink when nothing is staged.
    /// On acceptance the buffer is cleared and the sequence number advances by
    /// one. On rejection both are left exactly as they were.
    ///
    /// # Errors
    ///
    /// Returns the sink's rejection: `DomainError::ConcurrencyConflict` or
    /// `DomainError::SinkFailure`.
    #[tracing::instrument(
        skip(self),
        fields(
            aggregate_kind = A::KIND,
            aggregate_id = %self.id,
            expected_sequence_number = self.next_sequence_number,
            staged = self.staged.len(),
        )
    )]
    pub async fn commit(&mut self) -> Result<Option<CommitReceipt>, DomainError> {
        if self.staged.is_empty() {
            tracing::debug!("nothing staged; commit skipped");
            return Ok(None);
        }

        let mut metadata = CommitMetadata::new();
        metadata.insert("aggregate_kind".into(), A::KIND.into());
        let commit = Commit::new(
            self.id.clone(),
            self.next_sequence_number,
            self.staged.clone(),
            metadata,
        )?;

        let receipt = match self.sink.sink(&commit).await {
            Ok(receipt) => receipt,
            Err(err) => {
                tracing::warn!(error = %err, "commit rejected");
                return Err(err);
            }
        };

        self.staged.clear();
        self.next_sequence_number += 1;
        tracing::info!(
            committed_sequence_number = receipt.committed_sequence_number,
            event_count = receipt.event_count,
            "commit accepted"
        );

        // A failed policy snapshot never fails the commit.
        if self.snapshot_policy.is_due(self.next_sequence_number - 1) {
            self.save_snapshot()
                .await
                .inspect_err(|err| tracing::warn!(error = %err, "policy snapshot failed"))
                .ok();
        }

        Ok(Some(receipt))
    }

    /// Captures committed state and hands it to the snapshotter.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::SnapshotUnsupported` if the type cannot capture
    /// state or no snapshotter is associated, `DomainError::Validation` if
    /// events are staged or the capture is malformed, and any snapshotter
    /// failure.
    #[tracing::instrument(skip(self), fields(aggregate_kind = A::KIND, aggregate_id = %self.id))]
    pub async fn save_snapshot(&self) -> Result<(), DomainError> {
        let state = self.state.capture_state()?;
        let Some(snapshotter) = &self.snapshotter else {
            return Err(DomainError::SnapshotUnsupported(format!(
                "no snapshotter associated with aggregate {}",
                self.id
            )));
        };
        if !self.staged.is_empty() {
            return Err(DomainError::Validation(format!(
                "aggregate {} has {} staged events; commit before snapshotting",
                self.id,
                self.staged.len()
            )));
        }

        let snapshot =
            AggregateSnapshot::new(self.id.clone(), self.next_sequence_number - 1, state)
                .with_executed_command_ids(self.executed_command_ids.iter().cloned());
        if !snapshot.is_well_formed() {
            return Err(DomainError::Validation(format!(
                "captured snapshot for aggregate {} is malformed",
                self.id
            )));
        }

        snapshotter.save_snapshot(&snapshot).await?;
        tracing::info!(sequence_number = snapshot.sequence_number, "snapshot saved");
        Ok(())
    }

    fn apply(&mut self, event: &Event) -> Result<(), DomainError> {
        A::handlers().dispatch(&mut self.state, event)?;
        if let Some(command_id) = event.command_id() {
            self.executed_command_ids.insert(command_id.to_owned());
        }
        Ok(())
    }

    fn ensure_owned(&self, aggregate_id: &str, what: &str) -> Result<(), DomainError> {
        if aggregate_id == self.id {
            Ok(())
        } else {
            Err(DomainError::Validation(format!(
                "{what} for aggregate {aggregate_id} applied to aggregate {}",
                self.id
            )))
        }
    }
}

impl<A: Aggregate + fmt::Debug> fmt::Debug for AggregateRoot<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateRoot")
            .field("kind", &A::KIND)
            .field("id", &self.id)
            .field("state", &self.state)
            .field("next_sequence_number", &self.next_sequence_number)
            .field("staged", &self.staged.len())
            .field("executed_command_ids", &self.executed_command_ids.len())
            .field("snapshot_policy", &self.snapshot_policy)
            .finish_non_exhaustive()
    }
}
