//! Bounded retry for remote cache calls.
//!
//! Each topology has a fixed attempt ceiling and a fixed pause between
//! attempts. Standalone retries immediately, sentinel waits for master
//! promotion, cluster waits out slot migration and failover.

use std::future::Future;
use std::time::Duration;

use halyard_config::Topology;
use tokio_util::sync::CancellationToken;

use crate::error::{CacheError, Result};

/// Attempt ceiling and pause for one topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const STANDALONE: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        backoff: Duration::ZERO,
    };

    pub const SENTINEL: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        backoff: Duration::from_secs(2),
    };

    pub const CLUSTER: RetryPolicy = RetryPolicy {
        max_attempts: 30,
        backoff: Duration::from_secs(4),
    };

    pub fn for_topology(topology: Topology) -> Self {
        match topology {
            Topology::Standalone => Self::STANDALONE,
            Topology::Sentinel => Self::SENTINEL,
            Topology::Cluster => Self::CLUSTER,
        }
    }
}

/// Run `f` until it succeeds, fails with a non-transient error, or the
/// policy's attempt ceiling is reached.
///
/// The pause between attempts races `cancel`; a cancelled wait ends the
/// call with [`CacheError::Interrupted`].
pub async fn with_retry<F, Fut, T>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match f().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => e,
        };

        if attempt >= policy.max_attempts {
            tracing::warn!(
                operation,
                attempts = attempt,
                error = %err.detail(),
                "Cache call failed, giving up"
            );
            return Err(CacheError::Connection {
                attempts: attempt,
                message: err.detail(),
            });
        }

        tracing::warn!(
            operation,
            attempt,
            max_attempts = policy.max_attempts,
            backoff_ms = policy.backoff.as_millis() as u64,
            error = %err.detail(),
            "Cache call failed, retrying"
        );

        if cancel.is_cancelled() {
            return Err(CacheError::Interrupted);
        }
        if !policy.backoff.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(CacheError::Interrupted),
                _ = tokio::time::sleep(policy.backoff) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails `failures` times with a transient error, then succeeds.
    async fn flaky(policy: RetryPolicy, failures: u32) -> (Result<&'static str>, u32) {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result = with_retry(policy, &cancel, "test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < failures {
                Err(CacheError::transient("connection refused"))
            } else {
                Ok("ok")
            }
        })
        .await;
        (result, calls.load(Ordering::SeqCst))
    }

    #[tokio::test(start_paused = true)]
    async fn test_standalone_ceiling() {
        let (result, calls) = flaky(RetryPolicy::STANDALONE, 2).await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls, 3);

        let (result, calls) = flaky(RetryPolicy::STANDALONE, 3).await;
        assert!(matches!(result, Err(CacheError::Connection { attempts: 3, .. })));
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sentinel_ceiling_with_backoff() {
        let start = tokio::time::Instant::now();
        let (result, _) = flaky(RetryPolicy::SENTINEL, 2).await;
        assert!(result.is_ok());
        assert_eq!(start.elapsed(), Duration::from_secs(4));

        let (result, _) = flaky(RetryPolicy::SENTINEL, 3).await;
        assert!(matches!(result, Err(CacheError::Connection { attempts: 3, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cluster_ceiling() {
        let (result, calls) = flaky(RetryPolicy::CLUSTER, 29).await;
        assert!(result.is_ok());
        assert_eq!(calls, 30);

        let (result, calls) = flaky(RetryPolicy::CLUSTER, 30).await;
        assert!(matches!(result, Err(CacheError::Connection { attempts: 30, .. })));
        assert_eq!(calls, 30);
    }

    #[tokio::test]
    async fn test_protocol_error_not_retried() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result: Result<()> = with_retry(RetryPolicy::CLUSTER, &cancel, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Protocol("WRONGTYPE".to_string()))
        })
        .await;
        assert!(matches!(result, Err(CacheError::Protocol(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let task = {
            let cancel = cancel.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                with_retry(RetryPolicy::CLUSTER, &cancel, "test", || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(CacheError::transient("cluster down"))
                    }
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        let result = task.await.unwrap();
        assert!(matches!(result, Err(CacheError::Interrupted)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_policy_per_topology() {
        assert_eq!(RetryPolicy::for_topology(Topology::Standalone).max_attempts, 3);
        assert_eq!(
            RetryPolicy::for_topology(Topology::Sentinel).backoff,
            Duration::from_secs(2)
        );
        assert_eq!(RetryPolicy::for_topology(Topology::Cluster).max_attempts, 30);
    }
}
