//! Storage wiring shared by every command the demo runs.

use std::sync::Arc;

use keel_core::aggregate::Aggregate;
use keel_core::loader::{Loader, ReplayStage, SnapshotStage};
use keel_core::snapshot::SnapshotPolicy;
use keel_core::store::{CommitSource, EventSink, Snapshotter};
use keel_event_store::{InMemoryEventStore, InMemorySnapshotter, PgEventStore, PgSnapshotter};
use sqlx::postgres::PgPoolOptions;

use crate::config::DemoConfig;
use crate::error::AppError;

/// The capabilities the runtime consumes, behind trait objects.
#[derive(Clone)]
pub struct Backend {
    /// Human-readable backend name for logs.
    pub name: &'static str,
    pub sink: Arc<dyn EventSink>,
    pub source: Arc<dyn CommitSource>,
    pub snapshotter: Arc<dyn Snapshotter>,
    pub snapshot_policy: SnapshotPolicy,
}

impl Backend {
    /// Process-local stores.
    #[must_use]
    pub fn in_memory(snapshot_policy: SnapshotPolicy) -> Self {
        let store = Arc::new(InMemoryEventStore::new());
        Self {
            name: "in-memory",
            sink: store.clone(),
            source: store,
            snapshotter: Arc::new(InMemorySnapshotter::new()),
            snapshot_policy,
        }
    }

    /// Builds the backend `config` selects, connecting and migrating when a
    /// database URL is configured.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Database` if the pool cannot connect, or
    /// `AppError::Domain` if migrations fail.
    pub async fn from_config(config: &DemoConfig) -> Result<Self, AppError> {
        let Some(database_url) = &config.database_url else {
            return Ok(Self::in_memory(config.snapshot_policy));
        };

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(database_url)
            .await?;
        let store = PgEventStore::new(pool.clone());
        store.migrate().await?;

        let store = Arc::new(store);
        Ok(Self {
            name: "postgres",
            sink: store.clone(),
            source: store,
            snapshotter: Arc::new(PgSnapshotter::new(pool)),
            snapshot_policy: config.snapshot_policy,
        })
    }

    /// A loader that restores the latest snapshot, then replays newer commits.
    #[must_use]
    pub fn loader<A: Aggregate>(&self) -> Loader<A> {
        Loader::new(Arc::clone(&self.sink))
            .with_snapshotter(Arc::clone(&self.snapshotter))
            .with_snapshot_policy(self.snapshot_policy)
            .with_stage(SnapshotStage::new(Arc::clone(&self.snapshotter)))
            .with_stage(ReplayStage::new(Arc::clone(&self.source)))
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("snapshot_policy", &self.snapshot_policy)
            .finish_non_exhaustive()
    }
}
