//! `PostgreSQL` implementation of the `Snapshotter` trait.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use keel_core::error::DomainError;
use keel_core::snapshot::AggregateSnapshot;
use keel_core::store::Snapshotter;

/// PostgreSQL-backed snapshot store keeping one row per aggregate.
///
/// An older snapshot never replaces a newer one.
#[derive(Debug, Clone)]
pub struct PgSnapshotter {
    pool: PgPool,
}

impl PgSnapshotter {
    /// Creates a new `PgSnapshotter`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn infrastructure(err: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(format!("database error: {err}"))
}

#[async_trait]
impl Snapshotter for PgSnapshotter {
    #[tracing::instrument(skip(self, snapshot), fields(aggregate_id = %snapshot.aggregate_id))]
    async fn save_snapshot(&self, snapshot: &AggregateSnapshot) -> Result<(), DomainError> {
        if !snapshot.is_well_formed() {
            return Err(DomainError::Validation(format!(
                "refusing malformed snapshot for aggregate `{}`",
                snapshot.aggregate_id
            )));
        }

        let executed_command_ids = serde_json::to_value(&snapshot.executed_command_ids)
            .map_err(|e| DomainError::Infrastructure(format!("command ids not encodable: {e}")))?;

        sqlx::query(
            r"INSERT INTO snapshots (aggregate_id, sequence_number, state, executed_command_ids)
              VALUES ($1, $2, $3, $4)
              ON CONFLICT (aggregate_id) DO UPDATE
                SET sequence_number = EXCLUDED.sequence_number,
                    state = EXCLUDED.state,
                    executed_command_ids = EXCLUDED.executed_command_ids,
                    taken_at = NOW()
                WHERE snapshots.sequence_number <= EXCLUDED.sequence_number",
        )
        .bind(&snapshot.aggregate_id)
        .bind(snapshot.sequence_number)
        .bind(&snapshot.state)
        .bind(executed_command_ids)
        .execute(&self.pool)
        .await
        .map_err(infrastructure)?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn load_snapshot(
        &self,
        aggregate_id: &str,
    ) -> Result<Option<AggregateSnapshot>, DomainError> {
        let row = sqlx::query(
            r"SELECT sequence_number, state, executed_command_ids
              FROM snapshots WHERE aggregate_id = $1",
        )
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(infrastructure)?;

        row.map(|row| {
            let command_ids: Vec<String> = serde_json::from_value(
                row.try_get::<serde_json::Value, _>("executed_command_ids")
                    .map_err(infrastructure)?,
            )
            .map_err(|e| {
                DomainError::Infrastructure(format!("stored command ids unreadable: {e}"))
            })?;

            Ok(AggregateSnapshot::new(
                aggregate_id,
                row.try_get::<i64, _>("sequence_number")
                    .map_err(infrastructure)?,
                row.try_get::<serde_json::Value, _>("state")
                    .map_err(infrastructure)?,
            )
            .with_executed_command_ids(command_ids))
        })
        .transpose()
    }
}
