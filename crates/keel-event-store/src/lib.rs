//! Keel Event Store: commit stores and snapshotters for the Keel runtime.
//!
//! `memory` holds process-local reference implementations; `pg_event_store`
//! and `pg_snapshotter` persist to PostgreSQL.

pub mod memory;
pub mod pg_event_store;
pub mod pg_snapshotter;

pub use memory::{InMemoryEventStore, InMemorySnapshotter};
pub use pg_event_store::PgEventStore;
pub use pg_snapshotter::PgSnapshotter;
