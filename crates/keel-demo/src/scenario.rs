//! The scripted account workflow the demo binary runs.

use keel_core::aggregate::{Aggregate, AggregateRoot};
use keel_core::commit::CommitReceipt;
use keel_core::error::DomainError;
use serde::Serialize;

use crate::account::{Account, MoveFunds, OpenAccount, deposit, open_account, withdraw};
use crate::backend::Backend;
use crate::error::AppError;

const MAX_ATTEMPTS: u32 = 3;

/// Outcome of one scenario run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    pub aggregate_id: String,
    pub balance: u64,
    pub transactions: u32,
    pub next_sequence_number: i64,
    /// Concurrency conflicts the scenario provoked and recovered from.
    pub conflicts: u32,
}

/// Loads `aggregate_id`, applies `f`, and commits, reloading and retrying on
/// retryable failures up to `max_attempts` times.
///
/// # Errors
///
/// Returns the first non-retryable error, or the last error once attempts
/// are exhausted.
#[tracing::instrument(skip(backend, f), fields(aggregate_kind = A::KIND))]
pub async fn execute_with_retry<A, F>(
    backend: &Backend,
    aggregate_id: &str,
    max_attempts: u32,
    f: F,
) -> Result<Option<CommitReceipt>, AppError>
where
    A: Aggregate,
    F: Fn(&mut AggregateRoot<A>) -> Result<(), DomainError>,
{
    let loader = backend.loader::<A>();
    let mut attempt = 1;
    loop {
        let mut root = loader.load_aggregate(aggregate_id).await?;
        f(&mut root)?;
        match root.commit().await {
            Ok(receipt) => return Ok(receipt),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                tracing::warn!(attempt, error = %err, "commit failed, reloading");
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn funds(command_id: &str, amount: u64) -> MoveFunds {
    MoveFunds {
        command_id: command_id.to_owned(),
        amount,
    }
}

/// Opens an account, moves funds across several commits, provokes one
/// concurrency conflict, and recovers from it.
///
/// # Errors
///
/// Returns any error the runtime or backend reports.
#[tracing::instrument(skip(backend), fields(backend = backend.name))]
pub async fn run(backend: &Backend, aggregate_id: &str) -> Result<ScenarioReport, AppError> {
    let loader = backend.loader::<Account>();

    let mut root = loader.load_aggregate(aggregate_id).await?;
    open_account(&mut root, &OpenAccount {
        command_id: format!("open-{aggregate_id}"),
        owner: "demo".to_owned(),
    })?;
    deposit(&mut root, &funds("deposit-1", 100))?;
    root.commit().await?;

    let mut root = loader.load_aggregate(aggregate_id).await?;
    deposit(&mut root, &funds("deposit-2", 50))?;
    withdraw(&mut root, &funds("withdraw-1", 30))?;
    root.commit().await?;

    // A second writer commits between this load and its commit.
    let mut stale = loader.load_aggregate(aggregate_id).await?;
    execute_with_retry::<Account, _>(backend, aggregate_id, MAX_ATTEMPTS, |root| {
        deposit(root, &funds("deposit-3", 10))
    })
    .await?;

    let mut conflicts = 0;
    deposit(&mut stale, &funds("deposit-4", 5))?;
    match stale.commit().await {
        Err(DomainError::ConcurrencyConflict { .. }) => {
            conflicts += 1;
            execute_with_retry::<Account, _>(backend, aggregate_id, MAX_ATTEMPTS, |root| {
                deposit(root, &funds("deposit-4", 5))
            })
            .await?;
        }
        other => {
            other?;
        }
    }

    let root = loader.load_aggregate(aggregate_id).await?;
    let report = ScenarioReport {
        aggregate_id: aggregate_id.to_owned(),
        balance: root.state().balance,
        transactions: root.state().transactions,
        next_sequence_number: root.next_sequence_number(),
        conflicts,
    };
    tracing::info!(
        balance = report.balance,
        next_sequence_number = report.next_sequence_number,
        "scenario complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use keel_core::snapshot::SnapshotPolicy;

    use super::*;

    #[tokio::test]
    async fn test_scenario_recovers_from_its_conflict() {
        // Arrange
        let backend = Backend::in_memory(SnapshotPolicy::Never);

        // Act
        let report = run(&backend, "account-1").await.unwrap();

        // Assert
        assert_eq!(report.balance, 135);
        assert_eq!(report.transactions, 5);
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.next_sequence_number, 5);
    }

    #[tokio::test]
    async fn test_scenario_with_snapshots_matches_plain_replay() {
        let plain = run(&Backend::in_memory(SnapshotPolicy::Never), "account-1")
            .await
            .unwrap();

        let snapshotted = run(
            &Backend::in_memory(SnapshotPolicy::EveryNCommits(2)),
            "account-1",
        )
        .await
        .unwrap();

        assert_eq!(plain, snapshotted);
    }

    #[tokio::test]
    async fn test_rerun_without_snapshots_is_idempotent() {
        let backend = Backend::in_memory(SnapshotPolicy::Never);
        let first = run(&backend, "account-1").await.unwrap();

        let second = run(&backend, "account-1").await.unwrap();

        assert_eq!(second.balance, first.balance);
        assert_eq!(second.next_sequence_number, first.next_sequence_number);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_returned_immediately() {
        let backend = Backend::in_memory(SnapshotPolicy::Never);

        let result = execute_with_retry::<Account, _>(&backend, "account-1", MAX_ATTEMPTS, |root| {
            deposit(root, &funds("d1", 5))
        })
        .await;

        assert!(matches!(
            result,
            Err(AppError::Domain(DomainError::Validation(_)))
        ));
    }
}
