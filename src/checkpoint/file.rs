//! File-backed `CheckpointStore` (§4.9): one file per key plus a JSON
//! sidecar for version/expiry, written via a temp-file-plus-atomic-rename
//! so a `cas` read-check-write never observes a half-written payload.

use super::{CasOutcome, CheckpointStore, Version};
use crate::error::{Error, Result};
use crate::types::now;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Meta {
    version: Version,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// File-backed checkpoint store rooted at `base_dir`. A single process-wide
/// `Mutex` serializes the read-modify-write cycle in `cas`; this mirrors
/// the "sibling `.lock` file plus atomic rename" shape called for in
/// §4.9, simplified to an in-process mutex since the crate does not
/// target multi-process deployments of this backend.
pub struct FileCheckpointStore {
    base_dir: PathBuf,
    guard: Mutex<()>,
}

fn key_to_filename(key: &str) -> String {
    // Keys are `/`-delimited logical paths (§6.5); flatten to a safe
    // single filename rather than mirroring directory structure.
    key.replace('/', "__")
}

impl FileCheckpointStore {
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)
            .map_err(|e| Error::internal(format!("creating checkpoint dir: {e}")))?;
        Ok(Self {
            base_dir,
            guard: Mutex::new(()),
        })
    }

    fn payload_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.payload", key_to_filename(key)))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.meta.json", key_to_filename(key)))
    }

    fn read_meta(path: &Path) -> Result<Option<Meta>> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::internal(format!("reading checkpoint meta: {e}"))),
        }
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)
            .map_err(|e| Error::internal(format!("writing checkpoint temp file: {e}")))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| Error::internal(format!("renaming checkpoint temp file: {e}")))?;
        Ok(())
    }

    fn is_live(meta: &Meta) -> bool {
        match meta.expires_at {
            Some(expires_at) => now() < expires_at,
            None => true,
        }
    }

    fn load_locked(&self, key: &str) -> Result<Option<(Vec<u8>, Version)>> {
        let Some(meta) = Self::read_meta(&self.meta_path(key))? else {
            return Ok(None);
        };
        if !Self::is_live(&meta) {
            return Ok(None);
        }
        let payload = std::fs::read(self.payload_path(key))
            .map_err(|e| Error::internal(format!("reading checkpoint payload: {e}")))?;
        Ok(Some((payload, meta.version)))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, key: &str, payload: Vec<u8>, ttl: Option<Duration>) -> Result<Version> {
        let _guard = self.guard.lock().unwrap();
        let current = self.load_locked(key)?;
        let next_version = current.map(|(_, v)| v + 1).unwrap_or(1);
        let expires_at = ttl
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| now() + d);
        Self::write_atomic(&self.payload_path(key), &payload)?;
        Self::write_atomic(
            &self.meta_path(key),
            &serde_json::to_vec(&Meta {
                version: next_version,
                expires_at,
            })?,
        )?;
        Ok(next_version)
    }

    async fn load(&self, key: &str) -> Result<Option<(Vec<u8>, Version)>> {
        let _guard = self.guard.lock().unwrap();
        self.load_locked(key)
    }

    async fn cas(&self, key: &str, payload: Vec<u8>, expected_version: Version) -> Result<CasOutcome> {
        let _guard = self.guard.lock().unwrap();
        let current_version = self.load_locked(key)?.map(|(_, v)| v).unwrap_or(0);
        if current_version != expected_version {
            return Ok(CasOutcome::Conflict);
        }
        let existing_meta = Self::read_meta(&self.meta_path(key))?;
        let expires_at = existing_meta.and_then(|m| m.expires_at);
        let new_version = current_version + 1;
        Self::write_atomic(&self.payload_path(key), &payload)?;
        Self::write_atomic(
            &self.meta_path(key),
            &serde_json::to_vec(&Meta {
                version: new_version,
                expires_at,
            })?,
        )?;
        Ok(CasOutcome::Updated(new_version))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let _guard = self.guard.lock().unwrap();
        let mut keys = Vec::new();
        let entries = std::fs::read_dir(&self.base_dir)
            .map_err(|e| Error::internal(format!("listing checkpoint dir: {e}")))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::internal(format!("reading dir entry: {e}")))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(stem) = name.strip_suffix(".meta.json") else {
                continue;
            };
            let key = stem.replace("__", "/");
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let _guard = self.guard.lock().unwrap();
        let existed = self.meta_path(key).exists();
        let _ = std::fs::remove_file(self.payload_path(key));
        let _ = std::fs::remove_file(self.meta_path(key));
        Ok(existed)
    }

    async fn sweep_expired(&self) -> Result<usize> {
        let _guard = self.guard.lock().unwrap();
        let mut removed = 0;
        let entries = std::fs::read_dir(&self.base_dir)
            .map_err(|e| Error::internal(format!("listing checkpoint dir: {e}")))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::internal(format!("reading dir entry: {e}")))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(stem) = name.strip_suffix(".meta.json") else {
                continue;
            };
            let key = stem.replace("__", "/");
            if let Some(meta) = Self::read_meta(&self.meta_path(&key))? {
                if !Self::is_live(&meta) {
                    let _ = std::fs::remove_file(self.payload_path(&key));
                    let _ = std::fs::remove_file(self.meta_path(&key));
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn save_then_load_round_trips_across_a_fresh_handle() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path()).unwrap();
        store.save("dialog/s1", b"payload".to_vec(), None).await.unwrap();

        let reopened = FileCheckpointStore::open(dir.path()).unwrap();
        let (payload, version) = reopened.load("dialog/s1").await.unwrap().unwrap();
        assert_eq!(payload, b"payload");
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn cas_conflict_does_not_mutate_payload_on_disk() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path()).unwrap();
        store.cas("k", b"v1".to_vec(), 0).await.unwrap();
        let outcome = store.cas("k", b"v2".to_vec(), 0).await.unwrap();
        assert_eq!(outcome, CasOutcome::Conflict);
        let (payload, _) = store.load("k").await.unwrap().unwrap();
        assert_eq!(payload, b"v1");
    }

    #[tokio::test]
    async fn sweep_expired_removes_both_sidecar_files() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path()).unwrap();
        store
            .save("k", vec![1, 2, 3], Some(Duration::from_millis(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let removed = store.sweep_expired().await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.load("k").await.unwrap().is_none());
    }
}
