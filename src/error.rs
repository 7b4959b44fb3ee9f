//! Error types for intent-orchestration-core.

use thiserror::Error;

/// Result type alias using this crate's `Error` type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced at the public boundary (§6.3), plus the configuration
/// errors that can occur at startup while loading rule files.
///
/// Tier failures inside `IntentRouter` (§4.5, §7) are *not* represented
/// here: they are caught at the call site and converted to "no result,
/// fall through" before they ever reach a caller.
#[derive(Error, Debug)]
pub enum Error {
    /// Inbound request failed declarative schema validation (C7).
    #[error("validation error: {0}")]
    Validation(String),

    /// A dialog session id has no corresponding checkpoint.
    #[error("dialog session not found: {0}")]
    SessionNotFound(String),

    /// A dialog session's idle TTL elapsed.
    #[error("dialog session expired: {0}")]
    SessionExpired(String),

    /// A compare-and-set write lost the race; the caller already retried once.
    #[error("concurrent modification conflict on key: {0}")]
    Conflict(String),

    /// An approval id has no corresponding checkpoint.
    #[error("approval request not found: {0}")]
    ApprovalNotFound(String),

    /// The approval is already in a terminal state.
    #[error("approval request already terminal: {0}")]
    ApprovalTerminal(String),

    /// A suspension point (tier call, checkpoint call) exceeded its deadline.
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// A remote collaborator (LLM provider, vector store, redis, ...) is unreachable.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Rule-file parsing or compilation failed at startup. Fatal.
    #[error("configuration error: {0}")]
    Config(String),

    /// Anything that doesn't fit the other kinds; never expected in normal operation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization error: {err}"))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(format!("rule file parse error: {err}"))
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Self::Config(format!("invalid pattern: {err}"))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Internal(format!("sqlite error: {err}"))
    }
}
