//! Demo configuration, loaded from environment variables.

use keel_core::snapshot::SnapshotPolicy;

use crate::error::AppError;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Runtime wiring chosen at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoConfig {
    /// PostgreSQL URL; `None` selects the in-memory backend.
    pub database_url: Option<String>,
    /// When the aggregate root takes snapshots after a commit.
    pub snapshot_policy: SnapshotPolicy,
    /// Pool size for the PostgreSQL backend.
    pub max_connections: u32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            snapshot_policy: SnapshotPolicy::Never,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl DemoConfig {
    /// Loads configuration from `KEEL_DATABASE_URL`, `KEEL_SNAPSHOT_EVERY`
    /// and `KEEL_MAX_CONNECTIONS`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the variable that holds an invalid
    /// value.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    ///
    /// Unset and blank variables take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the variable that holds an invalid
    /// value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let database_url = get("KEEL_DATABASE_URL");

        let snapshot_policy = match get("KEEL_SNAPSHOT_EVERY") {
            Some(raw) => SnapshotPolicy::EveryNCommits(positive("KEEL_SNAPSHOT_EVERY", &raw)?),
            None => SnapshotPolicy::Never,
        };

        let max_connections = match get("KEEL_MAX_CONNECTIONS") {
            Some(raw) => u32::try_from(positive("KEEL_MAX_CONNECTIONS", &raw)?).map_err(|_| {
                AppError::Config(format!("KEEL_MAX_CONNECTIONS is too large: {raw}"))
            })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        Ok(Self {
            database_url,
            snapshot_policy,
            max_connections,
        })
    }
}

fn positive(key: &str, raw: &str) -> Result<u64, AppError> {
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(AppError::Config(format!(
            "{key} must be a positive integer, got `{raw}`"
        ))),
    }
}
