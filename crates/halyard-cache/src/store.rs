//! The cache store contract shared by every backend.

use std::collections::BTreeSet;

use async_trait::async_trait;
use glob::Pattern;

use crate::error::{CacheError, Result};

/// Outcome of [`CacheStore::set_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The key was already present; nothing was written.
    Existed,
    /// The key was absent and now holds the value.
    Created,
}

impl Claim {
    pub fn is_created(self) -> bool {
        self == Claim::Created
    }
}

impl From<bool> for Claim {
    fn from(created: bool) -> Self {
        if created { Claim::Created } else { Claim::Existed }
    }
}

/// Byte-oriented key/value operations.
///
/// Implementations carry no session semantics. Every call may await network
/// I/O; non-transient failures are always surfaced as a [`CacheError`].
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Store `value` only if `key` is absent.
    async fn set_if_absent(&self, key: &str, value: &[u8]) -> Result<Claim>;

    /// Set a time-to-live on `key`. Returns whether the key existed.
    async fn expire(&self, key: &str, seconds: u64) -> Result<bool>;

    /// Fetch the value under `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete `key`, returning how many keys were removed.
    async fn delete(&self, key: &str) -> Result<u64>;

    /// Whether `key` is present.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Keys matching a glob-style pattern (`*`, `?`, `[abc]`).
    async fn keys(&self, pattern: &str) -> Result<BTreeSet<String>>;
}

/// Compile a key pattern for local matching.
pub(crate) fn compile_pattern(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern)
        .map_err(|e| CacheError::Protocol(format!("invalid key pattern '{pattern}': {e}")))
}
