//! Topology-aware cache access for halyard.
//!
//! This crate moves raw byte payloads between the session layer and redis:
//! - [`CacheStore`]: the contract every backend implements
//! - [`RemoteStore`]: redis over a pooled [`Connector`] with per-topology
//!   bounded retry (standalone, sentinel, cluster)
//! - [`BufferedStore`]: local write-through buffer that keeps serving when
//!   redis is unreachable
//! - [`InMemoryStore`]: map-backed store for single-node use and tests
//!
//! # Example
//!
//! ```rust,ignore
//! use halyard_cache::build_store;
//!
//! let settings = halyard_config::load_config(None)?.config.resolve()?;
//! let stack = build_store(&settings).await?;
//! stack.store().set("sess:ABC", b"payload").await?;
//! stack.close().await;
//! ```

mod buffered;
mod error;
mod factory;
mod memory;
mod pool;
mod remote;
mod retry;
mod store;
mod topology;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use buffered::{BufferConfig, BufferedStore, EXPIRY_GRACE};
pub use error::{CacheError, Result};
pub use factory::{CacheStack, build_store};
pub use memory::InMemoryStore;
pub use pool::PooledConnector;
pub use remote::{Connector, RemoteStore};
pub use retry::{RetryPolicy, with_retry};
pub use store::{CacheStore, Claim};
pub use topology::{RedisConnection, RedisManager};
