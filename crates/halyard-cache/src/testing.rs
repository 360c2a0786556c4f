//! Test doubles for code built on [`CacheStore`].
//!
//! [`FaultyStore`] wraps an [`InMemoryStore`], records every call and can be
//! switched into a failing mode where each call returns a transient
//! connection error, as an unreachable redis would.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{CacheError, Result};
use crate::memory::InMemoryStore;
use crate::store::{CacheStore, Claim};

/// Store operation recorded by [`FaultyStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Set,
    SetIfAbsent,
    Expire,
    Get,
    Delete,
    Exists,
    Keys,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    pub key: String,
}

/// Recording, fault-injecting [`CacheStore`].
#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: InMemoryStore,
    failing: AtomicBool,
    fail_next: AtomicU32,
    calls: Mutex<Vec<Call>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The backing store, for seeding and inspecting state directly.
    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    /// Fail every call until switched off again.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail the next `n` calls, then behave normally.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Every call made so far, failed ones included.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Number of calls of one kind.
    pub fn count(&self, op: Op) -> usize {
        self.calls.lock().iter().filter(|c| c.op == op).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, op: Op, key: &str) -> Result<()> {
        self.calls.lock().push(Call {
            op,
            key: key.to_string(),
        });

        let scheduled = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scheduled || self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::transient(format!("injected failure on {op:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FaultyStore {
    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.record(Op::Set, key)?;
        self.inner.set(key, value).await
    }

    async fn set_if_absent(&self, key: &str, value: &[u8]) -> Result<Claim> {
        self.record(Op::SetIfAbsent, key)?;
        self.inner.set_if_absent(key, value).await
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        self.record(Op::Expire, key)?;
        self.inner.expire(key, seconds).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.record(Op::Get, key)?;
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        self.record(Op::Delete, key)?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.record(Op::Exists, key)?;
        self.inner.exists(key).await
    }

    async fn keys(&self, pattern: &str) -> Result<BTreeSet<String>> {
        self.record(Op::Keys, pattern)?;
        self.inner.keys(pattern).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fail_next_then_recover() {
        let store = FaultyStore::new();
        store.fail_next(2);

        assert!(store.set("k", b"v").await.is_err());
        assert!(store.set("k", b"v").await.is_err());
        store.set("k", b"v").await.unwrap();

        assert_eq!(store.count(Op::Set), 3);
        assert_eq!(store.inner().get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_failing_mode_is_transient() {
        let store = FaultyStore::new();
        store.set_failing(true);
        let err = store.get("k").await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.calls(), vec![Call { op: Op::Get, key: "k".to_string() }]);
    }
}
