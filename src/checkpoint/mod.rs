//! C9 CheckpointStore (§4.9): one trait, four backends. `cas` is the
//! primitive `GuidedDialogEngine` and `HITLController` use for
//! concurrent-safe state transitions (§5).

pub mod file;
pub mod memory;
pub mod sql;

#[cfg(feature = "redis-backend")]
pub mod redis;

pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;
pub use sql::SqlCheckpointStore;

#[cfg(feature = "redis-backend")]
pub use redis::RedisCheckpointStore;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Monotonically increasing per-key version used for optimistic locking.
pub type Version = u64;

/// Outcome of a `cas` call (§4.9, §6.5).
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    Updated(Version),
    Conflict,
}

/// Pluggable key-addressed state store backing dialog sessions
/// (`dialog/<session_id>`) and approval requests (`approvals/<approval_id>`,
/// §6.5). Every write path on every backend must implement the same CAS
/// contract: `cas` succeeds only when the stored version equals
/// `expected_version`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Unconditional write. Bumps the version regardless of its prior
    /// value; callers that need concurrency safety use `cas` instead.
    async fn save(&self, key: &str, payload: Vec<u8>, ttl: Option<Duration>) -> Result<Version>;

    /// Returns `None` for a missing or expired key.
    async fn load(&self, key: &str) -> Result<Option<(Vec<u8>, Version)>>;

    /// Writes only if the stored version equals `expected_version`
    /// (`expected_version == 0` means "key must not exist yet").
    async fn cas(&self, key: &str, payload: Vec<u8>, expected_version: Version) -> Result<CasOutcome>;

    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// Removes every key whose TTL has elapsed; returns the count removed.
    async fn sweep_expired(&self) -> Result<usize>;
}
