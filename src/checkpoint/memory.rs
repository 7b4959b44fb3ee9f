//! In-memory `CheckpointStore` backend (§4.9): a process-wide map guarded
//! by a mutex, sufficient for unit tests and sharing the same CAS
//! semantics as the distributed backends (§9).

use super::{CasOutcome, CheckpointStore, Version};
use crate::error::Result;
use crate::types::now;
use async_trait::async_trait;
use dashmap::DashMap;
use chrono::{DateTime, Utc};
use std::time::Duration;

struct Entry {
    payload: Vec<u8>,
    version: Version,
    expires_at: Option<DateTime<Utc>>,
}

/// In-memory backend over a `dashmap::DashMap` (§10, grounded in the same
/// concurrent-hashmap shape the teacher's dashmap-backed in-memory stores
/// use elsewhere in the pack).
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    entries: DashMap<String, Entry>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(entry: &Entry) -> bool {
        match entry.expires_at {
            Some(expires_at) => now() < expires_at,
            None => true,
        }
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, key: &str, payload: Vec<u8>, ttl: Option<Duration>) -> Result<Version> {
        let next_version = self
            .entries
            .get(key)
            .filter(|e| Self::is_live(e))
            .map(|e| e.version + 1)
            .unwrap_or(1);
        let expires_at = ttl.and_then(|d| chrono::Duration::from_std(d).ok()).map(|d| now() + d);
        self.entries.insert(
            key.to_string(),
            Entry {
                payload,
                version: next_version,
                expires_at,
            },
        );
        Ok(next_version)
    }

    async fn load(&self, key: &str) -> Result<Option<(Vec<u8>, Version)>> {
        Ok(self
            .entries
            .get(key)
            .filter(|e| Self::is_live(e))
            .map(|e| (e.payload.clone(), e.version)))
    }

    async fn cas(&self, key: &str, payload: Vec<u8>, expected_version: Version) -> Result<CasOutcome> {
        // Entry API gives us atomic read-modify-write under one shard lock,
        // which is what makes this safe against concurrent `cas` calls on
        // the same key (§5 per-session serialization).
        use dashmap::mapref::entry::Entry as MapEntry;
        match self.entries.entry(key.to_string()) {
            MapEntry::Vacant(slot) => {
                if expected_version != 0 {
                    return Ok(CasOutcome::Conflict);
                }
                slot.insert(Entry {
                    payload,
                    version: 1,
                    expires_at: None,
                });
                Ok(CasOutcome::Updated(1))
            }
            MapEntry::Occupied(mut slot) => {
                let live = Self::is_live(slot.get());
                let current_version = if live { slot.get().version } else { 0 };
                if current_version != expected_version {
                    return Ok(CasOutcome::Conflict);
                }
                let expires_at = slot.get().expires_at;
                let new_version = current_version + 1;
                slot.insert(Entry {
                    payload,
                    version: new_version,
                    expires_at,
                });
                Ok(CasOutcome::Updated(new_version))
            }
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix) && Self::is_live(e.value()))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn sweep_expired(&self) -> Result<usize> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !Self::is_live(e.value()))
            .map(|e| e.key().clone())
            .collect();
        for key in &expired {
            self.entries.remove(key);
        }
        Ok(expired.len())
    }
}
