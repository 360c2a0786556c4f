//! Store assembly from resolved settings.

use std::sync::Arc;
use std::time::Duration;

use halyard_config::Settings;

use crate::buffered::{BufferConfig, BufferedStore};
use crate::error::Result;
use crate::pool::PooledConnector;
use crate::remote::RemoteStore;
use crate::store::CacheStore;

/// The assembled store plus the handle needed to shut it down.
pub struct CacheStack {
    store: Arc<dyn CacheStore>,
    remote: Option<Arc<RemoteStore>>,
}

impl CacheStack {
    /// Wrap an existing store; `close` becomes a no-op.
    pub fn from_store(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            remote: None,
        }
    }

    /// The outermost store.
    pub fn store(&self) -> Arc<dyn CacheStore> {
        Arc::clone(&self.store)
    }

    /// Interrupt pending retries and release pooled connections.
    pub async fn close(&self) {
        if let Some(ref remote) = self.remote {
            remote.close().await;
        }
    }
}

/// Build the store for `settings`.
///
/// Opens a pooled connector for the configured topology and wraps it in a
/// retrying [`RemoteStore`]. With `local_cache.enabled` the result is
/// further wrapped in a [`BufferedStore`] whose TTL is the session expiry.
pub async fn build_store(settings: &Settings) -> Result<CacheStack> {
    let connector = PooledConnector::connect(&settings.redis).await?;
    let remote = Arc::new(RemoteStore::new(Arc::new(connector)));

    let store: Arc<dyn CacheStore> = if settings.local_cache.enabled {
        let ttl = Duration::from_secs(buffer_ttl_secs(settings));
        let config = BufferConfig::from_settings(&settings.local_cache, ttl);
        tracing::info!(
            ttl_secs = ttl.as_secs(),
            resync_secs = config.resync_interval.as_secs(),
            expiry_secs = config.expiry_interval.as_secs(),
            "Local session buffer enabled"
        );
        Arc::new(BufferedStore::new(remote.clone(), config))
    } else {
        remote.clone()
    };

    Ok(CacheStack {
        store,
        remote: Some(remote),
    })
}

/// Local entries outlive the longest remote expiry a default session gets.
fn buffer_ttl_secs(settings: &Settings) -> u64 {
    settings
        .session
        .timeout_secs
        .max(settings.session.min_expire_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use halyard_config::HalyardConfig;

    #[test]
    fn test_buffer_ttl_uses_expiry_floor() {
        let settings = HalyardConfig::from_toml(
            r#"
[session]
timeout_secs = 600
min_expire_secs = 3600
"#,
        )
        .unwrap()
        .resolve()
        .unwrap();
        assert_eq!(buffer_ttl_secs(&settings), 3600);
    }

    #[tokio::test]
    async fn test_from_store_close_is_noop() {
        let stack = CacheStack::from_store(Arc::new(InMemoryStore::new()));
        stack.store().set("k", b"v").await.unwrap();
        stack.close().await;
        assert_eq!(stack.store().get("k").await.unwrap(), Some(b"v".to_vec()));
    }
}
