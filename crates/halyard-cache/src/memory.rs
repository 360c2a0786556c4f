//! In-process store with TTL support.
//!
//! Behaves like a single redis node for the operations in [`CacheStore`].
//! Expired keys are dropped lazily when touched or listed. Useful for
//! single-node deployments and as the backing store in tests.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::Instant;

use crate::error::Result;
use crate::store::{CacheStore, Claim, compile_pattern};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Thread-safe map-backed [`CacheStore`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.read().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining time-to-live for `key`, if one is set.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn live_value(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
                None => return None,
                Some(_) => {}
            }
        }
        self.entries.write().retain(|_, e| e.is_live(now));
        None
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries.write().insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_vec(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &[u8]) -> Result<Claim> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(Claim::Existed);
        }
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_vec(),
                expires_at: None,
            },
        );
        Ok(Claim::Created)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + Duration::from_secs(seconds));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.live_value(key))
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        let now = Instant::now();
        let removed = self.entries.write().remove(key);
        Ok(u64::from(removed.is_some_and(|e| e.is_live(now))))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live_value(key).is_some())
    }

    async fn keys(&self, pattern: &str) -> Result<BTreeSet<String>> {
        let pattern = compile_pattern(pattern)?;
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|(k, e)| e.is_live(now) && pattern.matches(k))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
