//! Domain error types.

use thiserror::Error;

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An event was dispatched whose type has no registered handler.
    ///
    /// Fatal: the aggregate instance must be discarded.
    #[error("unhandled event type `{event_type}` for aggregate kind `{aggregate_kind}`")]
    UnhandledEventType {
        /// The aggregate type that refused the event.
        aggregate_kind: &'static str,
        /// The wire name of the event type.
        event_type: String,
    },

    /// Optimistic concurrency conflict reported by the event sink.
    #[error(
        "concurrency conflict on aggregate {aggregate_id}: expected sequence {expected}, \
         found {actual} (hint: reload and retry)"
    )]
    ConcurrencyConflict {
        /// The aggregate that had the conflict.
        aggregate_id: String,
        /// The sequence number the commit expected the store to hold.
        expected: i64,
        /// The sequence number the store actually holds.
        actual: i64,
    },

    /// The event sink failed for a reason unrelated to concurrency.
    #[error("event sink failure: {0}")]
    SinkFailure(String),

    /// A rehydration stage produced an instance that is not a usable aggregate.
    #[error("malformed loader output: {0}")]
    MalformedLoaderOutput(String),

    /// The aggregate type (or its wiring) does not support snapshotting.
    #[error("snapshotting unsupported: {0}")]
    SnapshotUnsupported(String),

    /// A value object failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// An infrastructure/persistence error outside the commit path.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Whether discarding the instance, reloading, and retrying can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict { .. } | Self::SinkFailure(_) | Self::Infrastructure(_)
        )
    }
}
