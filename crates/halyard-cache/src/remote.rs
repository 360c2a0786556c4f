//! Remote store over a topology connector.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use halyard_config::Topology;
use redis::{Cmd, FromRedisValue, Value};
use tokio_util::sync::CancellationToken;

use crate::error::{CacheError, Result};
use crate::retry::{RetryPolicy, with_retry};
use crate::store::{CacheStore, Claim};

/// Sends single commands to one redis deployment.
///
/// `execute` makes exactly one attempt. Transient failures come back as
/// [`CacheError::Connection`] so the caller can decide whether to retry.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Deployment shape behind this connector.
    fn topology(&self) -> Topology;

    /// Run one command and return the raw reply.
    async fn execute(&self, cmd: &Cmd) -> Result<Value>;

    /// Release pooled connections and stop background maintenance.
    async fn close(&self) {}
}

/// [`CacheStore`] backed by redis with per-topology bounded retry.
pub struct RemoteStore {
    connector: Arc<dyn Connector>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl RemoteStore {
    /// Wrap a connector, using the retry policy of its topology.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let policy = RetryPolicy::for_topology(connector.topology());
        Self {
            connector,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Override the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Use `cancel` to interrupt retry backoff.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn topology(&self) -> Topology {
        self.connector.topology()
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Interrupt pending retries and close the connector.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.connector.close().await;
        tracing::debug!(topology = %self.topology(), "Remote store closed");
    }

    async fn query<T: FromRedisValue>(&self, operation: &str, cmd: Cmd) -> Result<T> {
        let value = with_retry(self.policy, &self.cancel, operation, || {
            self.connector.execute(&cmd)
        })
        .await?;
        redis::from_redis_value(&value)
            .map_err(|e| CacheError::Protocol(format!("unexpected {operation} reply: {e}")))
    }
}

#[async_trait]
impl CacheStore for RemoteStore {
    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        self.query("set", cmd).await
    }

    async fn set_if_absent(&self, key: &str, value: &[u8]) -> Result<Claim> {
        let mut cmd = redis::cmd("SETNX");
        cmd.arg(key).arg(value);
        let created: i64 = self.query("set_if_absent", cmd).await?;
        Ok(Claim::from(created == 1))
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        let mut cmd = redis::cmd("EXPIRE");
        cmd.arg(key).arg(seconds);
        let applied: i64 = self.query("expire", cmd).await?;
        Ok(applied == 1)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.query("get", cmd).await
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        self.query("delete", cmd).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(key);
        let count: i64 = self.query("exists", cmd).await?;
        Ok(count > 0)
    }

    async fn keys(&self, pattern: &str) -> Result<BTreeSet<String>> {
        let mut cmd = redis::cmd("KEYS");
        cmd.arg(pattern);
        let keys: Vec<String> = self.query("keys", cmd).await?;
        Ok(keys.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Replays scripted replies and records the command names it saw.
    struct ScriptedConnector {
        topology: Topology,
        replies: Mutex<VecDeque<Result<Value>>>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedConnector {
        fn new(topology: Topology, replies: Vec<Result<Value>>) -> Arc<Self> {
            Arc::new(Self {
                topology,
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        fn topology(&self) -> Topology {
            self.topology
        }

        async fn execute(&self, cmd: &Cmd) -> Result<Value> {
            let packed = String::from_utf8_lossy(&cmd.get_packed_command()).to_string();
            self.seen.lock().push(packed);
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(CacheError::Protocol("no scripted reply".to_string())))
        }
    }

    fn refused() -> Result<Value> {
        Err(CacheError::transient("connection refused"))
    }

    #[tokio::test]
    async fn test_standalone_retries_then_succeeds() {
        let connector = ScriptedConnector::new(
            Topology::Standalone,
            vec![refused(), refused(), Ok(Value::BulkString(b"payload".to_vec()))],
        );
        let store = RemoteStore::new(connector.clone());

        let value = store.get("sess:1").await.unwrap();
        assert_eq!(value, Some(b"payload".to_vec()));
        assert_eq!(connector.seen().len(), 3);
        assert!(connector.seen()[0].contains("GET"));
    }

    #[tokio::test]
    async fn test_standalone_gives_up_at_ceiling() {
        let connector = ScriptedConnector::new(
            Topology::Standalone,
            vec![refused(), refused(), refused(), Ok(Value::Okay)],
        );
        let store = RemoteStore::new(connector.clone());

        let err = store.set("k", b"v").await.unwrap_err();
        assert!(matches!(err, CacheError::Connection { attempts: 3, .. }));
        assert_eq!(connector.seen().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sentinel_waits_between_attempts() {
        let connector = ScriptedConnector::new(
            Topology::Sentinel,
            vec![refused(), Ok(Value::Int(1))],
        );
        let store = RemoteStore::new(connector);
        assert_eq!(store.policy(), RetryPolicy::SENTINEL);

        let start = tokio::time::Instant::now();
        assert_eq!(store.set_if_absent("k", b"null").await.unwrap(), Claim::Created);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_reply_decoding() {
        let connector = ScriptedConnector::new(
            Topology::Standalone,
            vec![
                Ok(Value::Int(0)),
                Ok(Value::Int(1)),
                Ok(Value::Int(1)),
                Ok(Value::Nil),
                Ok(Value::Array(vec![
                    Value::BulkString(b"b".to_vec()),
                    Value::BulkString(b"a".to_vec()),
                ])),
            ],
        );
        let store = RemoteStore::new(connector);

        assert_eq!(store.set_if_absent("k", b"v").await.unwrap(), Claim::Existed);
        assert!(store.expire("k", 60).await.unwrap());
        assert_eq!(store.delete("k").await.unwrap(), 1);
        assert_eq!(store.get("k").await.unwrap(), None);
        let keys = store.keys("*").await.unwrap();
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_unexpected_reply_is_protocol_error() {
        let connector = ScriptedConnector::new(
            Topology::Standalone,
            vec![Ok(Value::SimpleString("nope".to_string()))],
        );
        let store = RemoteStore::new(connector.clone());

        let err = store.set_if_absent("k", b"v").await.unwrap_err();
        assert!(matches!(err, CacheError::Protocol(_)));
        assert_eq!(connector.seen().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_interrupts_backoff() {
        let connector = ScriptedConnector::new(
            Topology::Cluster,
            (0..30).map(|_| refused()).collect(),
        );
        let store = Arc::new(RemoteStore::new(connector));

        let pending = {
            let store = store.clone();
            tokio::spawn(async move { store.exists("k").await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        store.close().await;

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, CacheError::Interrupted));
    }
}
