//! Pooled connector with idle maintenance.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use deadpool::Runtime;
use deadpool::managed::{Object, Pool, PoolError, Timeouts};
use halyard_config::{PoolConfig, RedisSettings, Topology};
use redis::{Cmd, RedisError, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{CacheError, Result, is_transient_redis};
use crate::remote::Connector;
use crate::topology::RedisManager;

type RedisPool = Pool<RedisManager>;

/// [`Connector`] drawing connections from a bounded pool.
///
/// On construction the pool is pre-warmed with `min_idle` connections
/// (best effort) and an eviction task starts. Every sweep trims idle
/// connections beyond `max_idle` and, when `test_while_idle` is set,
/// pings up to `num_tests_per_eviction` idle connections and drops the
/// ones that fail.
pub struct PooledConnector {
    pool: RedisPool,
    topology: Topology,
    call_timeout: Duration,
    cancel: CancellationToken,
    sweeper: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl PooledConnector {
    /// Build the pool for `settings`, warm it and start the eviction task.
    pub async fn connect(settings: &RedisSettings) -> Result<Self> {
        let manager = RedisManager::from_settings(settings)?;
        let pool = Pool::builder(manager)
            .max_size(settings.pool.max_active)
            .wait_timeout(Some(settings.timeout))
            .create_timeout(Some(settings.timeout))
            .recycle_timeout(Some(settings.timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| CacheError::Pool(e.to_string()))?;

        warm(&pool, settings.pool.min_idle).await;

        let cancel = CancellationToken::new();
        let sweeper = spawn_sweeper(
            pool.clone(),
            settings.pool.clone(),
            settings.eviction_interval(),
            settings.timeout,
            cancel.clone(),
        );

        tracing::info!(
            topology = %settings.topology,
            hosts = settings.hosts.len(),
            max_active = settings.pool.max_active,
            "Redis connection pool ready"
        );

        Ok(Self {
            pool,
            topology: settings.topology,
            call_timeout: settings.timeout,
            cancel,
            sweeper: parking_lot::Mutex::new(Some(sweeper)),
        })
    }

    /// Connections currently held, idle or in use.
    pub fn size(&self) -> usize {
        self.pool.status().size
    }

    async fn attempt(&self, cmd: &Cmd) -> Result<Value> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        match conn.query(cmd).await {
            Ok(value) => Ok(value),
            Err(err) => {
                if is_transient_redis(&err) && !err.is_cluster_error() {
                    // Broken connection: keep it out of the pool.
                    let _ = Object::take(conn);
                }
                Err(err.into())
            }
        }
    }
}

#[async_trait]
impl Connector for PooledConnector {
    fn topology(&self) -> Topology {
        self.topology
    }

    async fn execute(&self, cmd: &Cmd) -> Result<Value> {
        match tokio::time::timeout(self.call_timeout, self.attempt(cmd)).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::transient(format!(
                "call timed out after {}ms",
                self.call_timeout.as_millis()
            ))),
        }
    }

    async fn close(&self) {
        self.cancel.cancel();
        let sweeper = self.sweeper.lock().take();
        if let Some(handle) = sweeper {
            let _ = handle.await;
        }
        self.pool.close();
    }
}

fn pool_error(err: PoolError<RedisError>) -> CacheError {
    match err {
        PoolError::Backend(e) => e.into(),
        PoolError::Timeout(kind) => CacheError::transient(format!("pool timeout: {kind:?}")),
        PoolError::Closed => CacheError::Pool("pool is closed".to_string()),
        other => CacheError::Pool(other.to_string()),
    }
}

async fn warm(pool: &RedisPool, count: usize) {
    let mut held = Vec::with_capacity(count);
    for _ in 0..count {
        match pool.get().await {
            Ok(conn) => held.push(conn),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to pre-open redis connection");
                break;
            }
        }
    }
    tracing::debug!(opened = held.len(), requested = count, "Connection pool warmed");
}

fn spawn_sweeper(
    pool: RedisPool,
    config: PoolConfig,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => sweep_idle(&pool, &config, timeout).await,
            }
        }
    })
}

async fn sweep_idle(pool: &RedisPool, config: &PoolConfig, timeout: Duration) {
    let mut discarded = 0;

    if config.test_while_idle {
        let idle = pool.status().available.min(config.num_tests_per_eviction);
        let timeouts = Timeouts {
            wait: Some(Duration::ZERO),
            create: Some(timeout),
            recycle: Some(timeout),
        };

        let mut checked = Vec::with_capacity(idle);
        for _ in 0..idle {
            let Ok(mut conn) = pool.timeout_get(&timeouts).await else {
                break;
            };
            match conn.ping().await {
                Ok(()) => checked.push(conn),
                Err(e) => {
                    tracing::debug!(error = %e, "Dropping idle redis connection");
                    let _ = Object::take(conn);
                    discarded += 1;
                }
            }
        }
    }

    let excess = pool.status().available.saturating_sub(config.max_idle);
    let remaining = AtomicUsize::new(excess);
    if excess > 0 {
        let _ = pool.retain(|_, _| {
            remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
        });
    }

    if discarded > 0 || excess > 0 {
        tracing::debug!(
            discarded,
            trimmed = excess - remaining.load(Ordering::SeqCst),
            size = pool.status().size,
            "Evicted idle redis connections"
        );
    }
}
