//! Local write-through buffer for degraded operation.
//!
//! [`BufferedStore`] keeps a copy of every write in process memory and
//! serves reads from it first. When the remote store fails, writes are
//! kept locally and a resync is scheduled; the cluster stays usable for
//! as long as requests keep landing on the same node.
//!
//! Two maintenance jobs are triggered lazily from `get`:
//! - resync: rewrites every buffered entry to the remote store once a
//!   remote failure has been seen and the resync interval has passed
//! - expiry: drops entries idle for longer than the TTL plus a grace period
//!
//! Each job runs on its own spawned task and at most one of each kind runs
//! at a time.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use halyard_config::LocalCacheSettings;
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::store::{CacheStore, Claim, compile_pattern};

/// Extra idle time allowed past the TTL before a local entry is dropped.
pub const EXPIRY_GRACE: Duration = Duration::from_secs(60);

/// Writes of one key per resync while it keeps changing underneath.
const RESYNC_PASSES: usize = 3;

/// Buffer tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    /// Session TTL; also re-applied remotely on resync.
    pub ttl: Duration,
    /// Added to `ttl` before an idle entry is evicted.
    pub grace: Duration,
    /// Minimum time between resync runs.
    pub resync_interval: Duration,
    /// Minimum time between expiry sweeps.
    pub expiry_interval: Duration,
}

impl BufferConfig {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            grace: EXPIRY_GRACE,
            resync_interval: Duration::from_secs(600),
            expiry_interval: Duration::from_secs(3600),
        }
    }

    pub fn from_settings(settings: &LocalCacheSettings, ttl: Duration) -> Self {
        Self::new(ttl)
            .with_resync_interval(settings.resync_job_interval)
            .with_expiry_interval(settings.expiry_job_interval)
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    pub fn with_expiry_interval(mut self, interval: Duration) -> Self {
        self.expiry_interval = interval;
        self
    }
}

#[derive(Debug, Clone)]
struct LocalEntry {
    value: Vec<u8>,
    last_accessed: Instant,
}

impl LocalEntry {
    fn new(value: Vec<u8>) -> Self {
        Self {
            value,
            last_accessed: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Job {
    Resync,
    Expiry,
}

struct JobClock {
    last_resync: Instant,
    last_expiry: Instant,
    resync_running: bool,
    expiry_running: bool,
}

struct BufferInner {
    remote: Arc<dyn CacheStore>,
    entries: RwLock<HashMap<String, LocalEntry>>,
    needs_resync: AtomicBool,
    clock: Mutex<JobClock>,
    config: BufferConfig,
}

/// Clears the running flag of a job when its task ends.
struct JobGuard {
    inner: Arc<BufferInner>,
    job: Job,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        let mut clock = self.inner.clock.lock();
        match self.job {
            Job::Resync => clock.resync_running = false,
            Job::Expiry => clock.expiry_running = false,
        }
    }
}

/// [`CacheStore`] decorator buffering writes in process memory.
pub struct BufferedStore {
    inner: Arc<BufferInner>,
}

impl Clone for BufferedStore {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl BufferedStore {
    pub fn new(remote: Arc<dyn CacheStore>, config: BufferConfig) -> Self {
        let now = Instant::now();
        let inner = BufferInner {
            remote,
            entries: RwLock::new(HashMap::new()),
            needs_resync: AtomicBool::new(false),
            clock: Mutex::new(JobClock {
                last_resync: now,
                last_expiry: now,
                resync_running: false,
                expiry_running: false,
            }),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &BufferConfig {
        &self.inner.config
    }

    /// Number of locally buffered entries.
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    /// Whether `key` is buffered locally.
    pub fn contains_local(&self, key: &str) -> bool {
        self.inner.entries.read().contains_key(key)
    }

    /// Whether a remote failure is waiting to be repaired by a resync.
    pub fn needs_resync(&self) -> bool {
        self.inner.needs_resync.load(Ordering::SeqCst)
    }

    /// Rewrite every buffered entry to the remote store now.
    ///
    /// Returns how many entries were written. A remote failure stops the
    /// run and leaves the resync flag raised.
    pub async fn run_resync(&self) -> usize {
        self.inner.resync().await
    }

    /// Drop entries idle for longer than TTL plus grace. Returns how many
    /// were dropped.
    pub fn run_expiry_sweep(&self) -> usize {
        self.inner.sweep_expired()
    }

    fn mark_degraded(&self, operation: &str, key: &str, err: &crate::CacheError) {
        if !self.inner.needs_resync.swap(true, Ordering::SeqCst) {
            warn!(operation, key = %key, error = %err, "Remote cache unavailable, buffering locally");
        } else {
            debug!(operation, key = %key, error = %err, "Remote cache still unavailable");
        }
    }

    fn touch_local(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.inner.entries.write();
        entries.get_mut(key).map(|entry| {
            entry.last_accessed = Instant::now();
            entry.value.clone()
        })
    }

    fn put_local(&self, key: &str, value: &[u8]) {
        self.inner
            .entries
            .write()
            .insert(key.to_string(), LocalEntry::new(value.to_vec()));
    }

    /// Start whichever maintenance jobs are due.
    fn schedule_jobs(&self) {
        let now = Instant::now();
        let mut due = Vec::new();
        {
            let mut clock = self.inner.clock.lock();

            if self.needs_resync()
                && !clock.resync_running
                && now.duration_since(clock.last_resync) >= self.inner.config.resync_interval
            {
                clock.resync_running = true;
                clock.last_resync = now;
                due.push(Job::Resync);
            }

            if !clock.expiry_running
                && now.duration_since(clock.last_expiry) >= self.inner.config.expiry_interval
            {
                clock.expiry_running = true;
                clock.last_expiry = now;
                due.push(Job::Expiry);
            }
        }

        for job in due {
            self.spawn_job(job);
        }
    }

    fn spawn_job(&self, job: Job) {
        let guard = JobGuard {
            inner: Arc::clone(&self.inner),
            job,
        };
        debug!(?job, "Starting local buffer job");
        tokio::spawn(async move {
            match guard.job {
                Job::Resync => {
                    guard.inner.resync().await;
                }
                Job::Expiry => {
                    guard.inner.sweep_expired();
                }
            }
            drop(guard);
        });
    }
}

impl BufferInner {
    async fn resync(&self) -> usize {
        self.needs_resync.store(false, Ordering::SeqCst);

        let keys: Vec<String> = self.entries.read().keys().cloned().collect();
        let ttl = self.config.ttl.as_secs();

        let mut written = 0;
        for key in keys {
            match self.resync_entry(&key, ttl).await {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => {
                    self.needs_resync.store(true, Ordering::SeqCst);
                    warn!(key = %key, written, error = %e, "Resync to remote cache failed");
                    return written;
                }
            }
        }

        debug!(written, "Resynced local buffer to remote cache");
        written
    }

    fn local_value(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.read().get(key).map(|e| e.value.clone())
    }

    /// Push the current local value of `key` to the remote store.
    ///
    /// A `set` racing with the remote write may land first and be
    /// overwritten by the older value, so the entry is re-read afterwards
    /// and written again if it moved. Returns `false` if the entry was
    /// gone before anything was written.
    async fn resync_entry(&self, key: &str, ttl: u64) -> Result<bool> {
        let Some(mut value) = self.local_value(key) else {
            return Ok(false);
        };

        for _ in 0..RESYNC_PASSES {
            self.remote.set(key, &value).await?;
            self.remote.expire(key, ttl).await?;
            match self.local_value(key) {
                Some(current) if current != value => value = current,
                _ => return Ok(true),
            }
        }

        // Still moving; leave it to the next run.
        debug!(key = %key, "Entry changed during every resync pass");
        self.needs_resync.store(true, Ordering::SeqCst);
        Ok(true)
    }

    fn sweep_expired(&self) -> usize {
        let limit = self.config.ttl + self.config.grace;
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| now.duration_since(e.last_accessed) <= limit);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "Expired idle local entries");
        }
        removed
    }
}

#[async_trait]
impl CacheStore for BufferedStore {
    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.put_local(key, value);
        if let Err(e) = self.inner.remote.set(key, value).await {
            self.mark_degraded("set", key, &e);
        }
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &[u8]) -> Result<Claim> {
        let claim = match self.inner.remote.set_if_absent(key, value).await {
            Ok(claim) => claim,
            Err(e) => {
                self.mark_degraded("set_if_absent", key, &e);
                Claim::from(!self.contains_local(key))
            }
        };
        if claim.is_created() {
            self.put_local(key, value);
        }
        Ok(claim)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        match self.inner.remote.expire(key, seconds).await {
            Ok(applied) => Ok(applied),
            Err(e) => {
                self.mark_degraded("expire", key, &e);
                Ok(false)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.schedule_jobs();

        if let Some(value) = self.touch_local(key) {
            trace!(key = %key, "Local buffer hit");
            return Ok(Some(value));
        }

        match self.inner.remote.get(key).await {
            Ok(value) => Ok(value),
            Err(e) => {
                self.mark_degraded("get", key, &e);
                Err(e)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        let local = self.inner.entries.write().remove(key);
        match self.inner.remote.delete(key).await {
            Ok(count) => Ok(count),
            Err(e) => {
                self.mark_degraded("delete", key, &e);
                Ok(u64::from(local.is_some()))
            }
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        if self.contains_local(key) {
            return Ok(true);
        }
        self.inner.remote.exists(key).await
    }

    async fn keys(&self, pattern: &str) -> Result<BTreeSet<String>> {
        match self.inner.remote.keys(pattern).await {
            Ok(keys) => Ok(keys),
            Err(e) => {
                self.mark_degraded("keys", pattern, &e);
                let pattern = compile_pattern(pattern)?;
                Ok(self
                    .inner
                    .entries
                    .read()
                    .keys()
                    .filter(|k| pattern.matches(k))
                    .cloned()
                    .collect())
            }
        }
    }
}
