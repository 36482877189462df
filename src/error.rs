//! Error types for sea-orm-apm.

use thiserror::Error;

/// Result type alias for APM lifecycle operations.
pub type Result<T> = std::result::Result<T, ApmError>;

/// Usage errors surfaced to the caller.
///
/// Conditions on the instrumentation hot path (malformed or oversized SQL,
/// adapter lookups that come up empty, span budget exhaustion) never produce
/// an `ApmError`; they degrade to placeholders or counters instead.
#[derive(Debug, Error)]
pub enum ApmError {
    /// `stop` or `done` was called on a transaction that was never started.
    #[error("transaction {0} has not been started")]
    NotStarted(String),

    /// `start` was called on a transaction that is already running or finished.
    #[error("transaction {0} has already been started")]
    AlreadyStarted(String),

    /// `stop` or `done` was called a second time.
    #[error("transaction {0} has already been stopped")]
    AlreadyStopped(String),

    /// A custom pattern set failed to compile.
    #[error("invalid obfuscation pattern: {0}")]
    Pattern(#[from] regex::Error),
}
