//! `PostgreSQL` implementation of the `EventSink` and `CommitSource` traits.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use keel_core::commit::{Commit, CommitMetadata, CommitReceipt};
use keel_core::error::DomainError;
use keel_core::event::Event;
use keel_core::store::{CommitSource, EventSink};

/// PostgreSQL-backed commit store.
///
/// Each commit is one row in `commits` keyed by `(aggregate_id,
/// sequence_number)`; its events are rows in `commit_events` ordered by
/// `position`. The primary key is the final arbiter between racing writers.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Creates a new `PgEventStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the bundled schema migrations.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if a migration fails.
    pub async fn migrate(&self) -> Result<(), DomainError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DomainError::Infrastructure(format!("migration failed: {e}")))
    }
}

fn sink_failure(err: sqlx::Error) -> DomainError {
    DomainError::SinkFailure(format!("database error: {err}"))
}

fn infrastructure(err: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(format!("database error: {err}"))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl EventSink for PgEventStore {
    #[tracing::instrument(
        skip(self, commit),
        fields(
            aggregate_id = commit.aggregate_id(),
            expected_sequence_number = commit.expected_sequence_number(),
        )
    )]
    async fn sink(&self, commit: &Commit) -> Result<CommitReceipt, DomainError> {
        let aggregate_id = commit.aggregate_id();
        let expected = commit.expected_sequence_number();
        let conflict = |actual: i64| DomainError::ConcurrencyConflict {
            aggregate_id: aggregate_id.to_owned(),
            expected,
            actual,
        };

        let mut tx = self.pool.begin().await.map_err(sink_failure)?;

        let latest: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence_number), 0) FROM commits WHERE aggregate_id = $1",
        )
        .bind(aggregate_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(sink_failure)?;
        if expected != latest + 1 {
            return Err(conflict(latest + 1));
        }

        sqlx::query(
            "INSERT INTO commits (aggregate_id, sequence_number, metadata) VALUES ($1, $2, $3)",
        )
        .bind(aggregate_id)
        .bind(expected)
        .bind(serde_json::Value::Object(commit.metadata().clone()))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                conflict(expected + 1)
            } else {
                sink_failure(e)
            }
        })?;

        for (position, event) in commit.events().iter().enumerate() {
            let position = i32::try_from(position)
                .map_err(|_| DomainError::SinkFailure("commit has too many events".into()))?;
            sqlx::query(
                r"INSERT INTO commit_events
                    (event_id, aggregate_id, sequence_number, position,
                     event_type, payload, command_id, occurred_at)
                  VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(event.event_id())
            .bind(aggregate_id)
            .bind(expected)
            .bind(position)
            .bind(event.event_type())
            .bind(event.payload().clone())
            .bind(event.command_id())
            .bind(event.occurred_at())
            .execute(&mut *tx)
            .await
            .map_err(sink_failure)?;
        }

        tx.commit().await.map_err(|e| {
            if is_unique_violation(&e) {
                conflict(expected + 1)
            } else {
                sink_failure(e)
            }
        })?;

        Ok(CommitReceipt::for_commit(commit))
    }
}

#[async_trait]
impl CommitSource for PgEventStore {
    #[tracing::instrument(skip(self))]
    async fn load_commits(
        &self,
        aggregate_id: &str,
        from_sequence_number: i64,
    ) -> Result<Vec<Commit>, DomainError> {
        let commit_rows = sqlx::query(
            r"SELECT sequence_number, metadata FROM commits
              WHERE aggregate_id = $1 AND sequence_number >= $2
              ORDER BY sequence_number",
        )
        .bind(aggregate_id)
        .bind(from_sequence_number)
        .fetch_all(&self.pool)
        .await
        .map_err(infrastructure)?;

        let event_rows = sqlx::query(
            r"SELECT event_id, sequence_number, event_type, payload, command_id, occurred_at
              FROM commit_events
              WHERE aggregate_id = $1 AND sequence_number >= $2
              ORDER BY sequence_number, position",
        )
        .bind(aggregate_id)
        .bind(from_sequence_number)
        .fetch_all(&self.pool)
        .await
        .map_err(infrastructure)?;

        let mut events = event_rows.into_iter().peekable();
        let mut commits = Vec::with_capacity(commit_rows.len());
        for row in commit_rows {
            let sequence_number: i64 = row.try_get("sequence_number").map_err(infrastructure)?;
            let metadata = match row
                .try_get::<serde_json::Value, _>("metadata")
                .map_err(infrastructure)?
            {
                serde_json::Value::Object(map) => map,
                _ => CommitMetadata::new(),
            };

            let mut commit_events = Vec::new();
            while let Some(event_row) = events.next_if(|r| {
                r.try_get::<i64, _>("sequence_number")
                    .is_ok_and(|seq| seq == sequence_number)
            }) {
                commit_events.push(Event::from_stored(
                    event_row.try_get::<Uuid, _>("event_id").map_err(infrastructure)?,
                    event_row
                        .try_get::<String, _>("event_type")
                        .map_err(infrastructure)?,
                    aggregate_id,
                    event_row
                        .try_get::<Option<String>, _>("command_id")
                        .map_err(infrastructure)?,
                    event_row
                        .try_get::<serde_json::Value, _>("payload")
                        .map_err(infrastructure)?,
                    event_row.try_get("occurred_at").map_err(infrastructure)?,
                ));
            }

            commits.push(Commit::new(
                aggregate_id,
                sequence_number,
                commit_events,
                metadata,
            )?);
        }

        tracing::debug!(loaded = commits.len(), "loaded commits");
        Ok(commits)
    }
}
