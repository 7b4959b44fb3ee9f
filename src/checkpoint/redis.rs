//! Redis-backed `CheckpointStore` (§4.9, feature = "redis-backend"). CAS
//! is implemented with a Lua script so the read-compare-write cycle is
//! atomic on the server side rather than relying on client-side
//! `WATCH`/`MULTI`/`EXEC`, which does not compose with a connection-pooled
//! `ConnectionManager`.

use super::{CasOutcome, CheckpointStore, Version};
use crate::error::{Error, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::time::Duration;

fn version_field(key: &str) -> String {
    format!("{key}:version")
}

/// CAS as a Lua script: compares the stored version to `expected_version`
/// and only then writes payload + bumped version, returning the new
/// version or `-1` for a conflict (§4.9).
const CAS_SCRIPT: &str = r#"
local payload_key = KEYS[1]
local version_key = KEYS[2]
local expected = tonumber(ARGV[1])
local payload = ARGV[2]
local ttl_ms = tonumber(ARGV[3])

local current = tonumber(redis.call('GET', version_key) or '0')
if current ~= expected then
    return -1
end

local new_version = current + 1
redis.call('SET', payload_key, payload)
redis.call('SET', version_key, new_version)
if ttl_ms > 0 then
    redis.call('PEXPIRE', payload_key, ttl_ms)
    redis.call('PEXPIRE', version_key, ttl_ms)
end
return new_version
"#;

/// Unconditional version of `CAS_SCRIPT`: always bumps the version and
/// writes payload + version together, so a plain `save` is one atomic
/// round trip instead of a separate `INCR` pipeline followed by a
/// non-transactional `SET` — two concurrent `save()` calls on the same
/// key otherwise can interleave so the stored payload no longer matches
/// the stored version.
const SAVE_SCRIPT: &str = r#"
local payload_key = KEYS[1]
local version_key = KEYS[2]
local payload = ARGV[1]
local ttl_ms = tonumber(ARGV[2])

local new_version = (tonumber(redis.call('GET', version_key) or '0')) + 1
redis.call('SET', payload_key, payload)
redis.call('SET', version_key, new_version)
if ttl_ms > 0 then
    redis.call('PEXPIRE', payload_key, ttl_ms)
    redis.call('PEXPIRE', version_key, ttl_ms)
end
return new_version
"#;

pub struct RedisCheckpointStore {
    manager: ConnectionManager,
    cas_script: Script,
    save_script: Script,
}

impl RedisCheckpointStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::UpstreamUnavailable(format!("invalid redis url: {e}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("redis connect failed: {e}")))?;
        Ok(Self {
            manager,
            cas_script: Script::new(CAS_SCRIPT),
            save_script: Script::new(SAVE_SCRIPT),
        })
    }
}

#[async_trait]
impl CheckpointStore for RedisCheckpointStore {
    async fn save(&self, key: &str, payload: Vec<u8>, ttl: Option<Duration>) -> Result<Version> {
        let mut conn = self.manager.clone();
        let ttl_ms = ttl.map(|d| d.as_millis() as i64).unwrap_or(0);
        let new_version: i64 = self
            .save_script
            .key(key)
            .key(version_field(key))
            .arg(payload)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("redis save failed: {e}")))?;
        Ok(new_version as Version)
    }

    async fn load(&self, key: &str) -> Result<Option<(Vec<u8>, Version)>> {
        let mut conn = self.manager.clone();
        let payload: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("redis load failed: {e}")))?;
        let Some(payload) = payload else {
            return Ok(None);
        };
        let version: Option<i64> = conn
            .get(version_field(key))
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("redis load failed: {e}")))?;
        Ok(version.map(|v| (payload, v as Version)))
    }

    async fn cas(&self, key: &str, payload: Vec<u8>, expected_version: Version) -> Result<CasOutcome> {
        let mut conn = self.manager.clone();
        let result: i64 = self
            .cas_script
            .key(key)
            .key(version_field(key))
            .arg(expected_version as i64)
            .arg(payload)
            .arg(0i64)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("redis cas failed: {e}")))?;
        Ok(if result < 0 {
            CasOutcome::Conflict
        } else {
            CasOutcome::Updated(result as Version)
        })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        let pattern = format!("{prefix}*");
        let keys: Vec<String> = conn
            .keys(pattern)
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("redis list failed: {e}")))?;
        Ok(keys.into_iter().filter(|k| !k.ends_with(":version")).collect())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let removed: i64 = conn
            .del(key)
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("redis delete failed: {e}")))?;
        let _: i64 = conn
            .del(version_field(key))
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("redis delete failed: {e}")))?;
        Ok(removed > 0)
    }

    async fn sweep_expired(&self) -> Result<usize> {
        // Redis expires keys natively via PEXPIRE; there is nothing for
        // this backend to sweep proactively (§4.9's file/sql/in-memory
        // backends own their own TTL bookkeeping, redis does not).
        Ok(0)
    }
}
