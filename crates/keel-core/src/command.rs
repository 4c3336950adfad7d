//! Command abstractions.

/// Trait that all commands implement.
///
/// The command id is assigned by whoever first issued the command and stays
/// the same across redeliveries, which is what makes deduplication possible.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// The type name for this command (for logging/routing).
    fn command_type(&self) -> &'static str;

    /// Stable identifier of this command instance.
    fn command_id(&self) -> &str;
}
