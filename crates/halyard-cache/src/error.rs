//! Cache error types.

use redis::{ErrorKind, RedisError};

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors surfaced by cache stores.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The remote cache could not be reached, or kept redirecting, for every
    /// allowed attempt.
    #[error("cache unreachable after {attempts} attempt(s): {message}")]
    Connection { attempts: u32, message: String },

    /// Malformed or unexpected reply. Never retried.
    #[error("cache protocol error: {0}")]
    Protocol(String),

    /// The wait before a retry was cancelled.
    #[error("interrupted while waiting to retry")]
    Interrupted,

    /// The store could not be built from the given settings.
    #[error("invalid cache configuration: {0}")]
    Config(String),

    /// The connection pool rejected the request.
    #[error("connection pool error: {0}")]
    Pool(String),
}

impl CacheError {
    /// A single failed attempt that is worth retrying.
    pub fn transient(message: impl Into<String>) -> Self {
        CacheError::Connection {
            attempts: 1,
            message: message.into(),
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, CacheError::Connection { .. })
    }

    /// Underlying failure text without the attempt count.
    pub(crate) fn detail(&self) -> String {
        match self {
            CacheError::Connection { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Connection-level and cluster redirection failures are transient; anything
/// else the server or client reports is a protocol error.
pub(crate) fn is_transient_redis(err: &RedisError) -> bool {
    err.is_io_error()
        || err.is_connection_refusal()
        || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_cluster_error()
        || matches!(err.kind(), ErrorKind::MasterDown | ErrorKind::BusyLoadingError)
}

impl From<RedisError> for CacheError {
    fn from(err: RedisError) -> Self {
        if is_transient_redis(&err) {
            CacheError::transient(err.to_string())
        } else {
            CacheError::Protocol(err.to_string())
        }
    }
}
