//! Per-topology connection construction.
//!
//! [`RedisManager`] is the pool manager for every deployment shape. It
//! knows how to open a connection (single node, sentinel-resolved master,
//! or cluster) and how to validate one before it is handed out again.

use std::time::Duration;

use deadpool::managed::{self, Metrics, RecycleError, RecycleResult};
use halyard_config::{HostPort, RedisSettings, Topology};
use redis::aio::MultiplexedConnection;
use redis::cluster::{ClusterClient, ClusterClientBuilder};
use redis::cluster_async::ClusterConnection;
use redis::sentinel::{SentinelClient, SentinelNodeConnectionInfo, SentinelServerType};
use redis::{
    Client, Cmd, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisError, RedisResult,
    Value,
};

use crate::error::{CacheError, Result};

enum Target {
    Standalone(Client),
    Sentinel(tokio::sync::Mutex<SentinelClient>),
    Cluster(ClusterClient),
}

/// A live connection to one deployment.
pub enum RedisConnection {
    /// Standalone node or sentinel-resolved master.
    Single(MultiplexedConnection),
    /// Slot-routing cluster connection.
    Cluster(ClusterConnection),
}

impl RedisConnection {
    pub async fn query(&mut self, cmd: &Cmd) -> RedisResult<Value> {
        match self {
            RedisConnection::Single(conn) => cmd.query_async(conn).await,
            RedisConnection::Cluster(conn) => cmd.query_async(conn).await,
        }
    }

    pub async fn ping(&mut self) -> RedisResult<()> {
        let reply = self.query(&redis::cmd("PING")).await?;
        match reply {
            Value::SimpleString(ref s) if s == "PONG" => Ok(()),
            Value::Okay => Ok(()),
            other => Err(RedisError::from((
                redis::ErrorKind::ResponseError,
                "unexpected PING reply",
                format!("{other:?}"),
            ))),
        }
    }
}

/// Pool manager opening connections for one topology.
pub struct RedisManager {
    target: Target,
    topology: Topology,
    connect_timeout: Duration,
    validate_on_recycle: bool,
}

impl RedisManager {
    /// Build the client for the configured topology. No connection is opened yet.
    pub fn from_settings(settings: &RedisSettings) -> Result<Self> {
        let auth = RedisConnectionInfo {
            db: settings.database,
            password: settings.password.clone(),
            ..Default::default()
        };

        let target = match settings.topology {
            Topology::Standalone => {
                let primary = settings
                    .hosts
                    .first()
                    .ok_or_else(|| CacheError::Config("no redis host configured".to_string()))?;
                let info = ConnectionInfo {
                    addr: tcp(primary),
                    redis: auth,
                };
                Target::Standalone(Client::open(info).map_err(config_error)?)
            }
            Topology::Sentinel => {
                let sentinels: Vec<ConnectionInfo> = settings
                    .hosts
                    .iter()
                    .map(|hp| ConnectionInfo {
                        addr: tcp(hp),
                        redis: RedisConnectionInfo::default(),
                    })
                    .collect();
                let master = SentinelNodeConnectionInfo {
                    redis_connection_info: Some(auth),
                    ..Default::default()
                };
                let client = SentinelClient::build(
                    sentinels,
                    settings.sentinel_master.clone(),
                    Some(master),
                    SentinelServerType::Master,
                )
                .map_err(config_error)?;
                Target::Sentinel(tokio::sync::Mutex::new(client))
            }
            Topology::Cluster => {
                if settings.database != 0 {
                    tracing::warn!(
                        database = settings.database,
                        "cluster topology ignores the database index"
                    );
                }
                let nodes: Vec<ConnectionInfo> = settings
                    .hosts
                    .iter()
                    .map(|hp| ConnectionInfo {
                        addr: tcp(hp),
                        redis: RedisConnectionInfo::default(),
                    })
                    .collect();
                let mut builder = ClusterClientBuilder::new(nodes)
                    .retries(settings.max_redirections)
                    .connection_timeout(settings.timeout)
                    .response_timeout(settings.timeout);
                if let Some(ref password) = settings.password {
                    builder = builder.password(password.clone());
                }
                Target::Cluster(builder.build().map_err(config_error)?)
            }
        };

        Ok(Self {
            target,
            topology: settings.topology,
            connect_timeout: settings.timeout,
            validate_on_recycle: settings.pool.test_on_borrow || settings.pool.test_on_return,
        })
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    async fn open(&self) -> RedisResult<RedisConnection> {
        match &self.target {
            Target::Standalone(client) => client
                .get_multiplexed_async_connection()
                .await
                .map(RedisConnection::Single),
            Target::Sentinel(client) => {
                let mut client = client.lock().await;
                client
                    .get_async_connection()
                    .await
                    .map(RedisConnection::Single)
            }
            Target::Cluster(client) => client
                .get_async_connection()
                .await
                .map(RedisConnection::Cluster),
        }
    }
}

impl managed::Manager for RedisManager {
    type Type = RedisConnection;
    type Error = RedisError;

    async fn create(&self) -> RedisResult<RedisConnection> {
        match tokio::time::timeout(self.connect_timeout, self.open()).await {
            Ok(result) => {
                if result.is_ok() {
                    tracing::trace!(topology = %self.topology, "Opened redis connection");
                }
                result
            }
            Err(_) => Err(RedisError::from(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect timed out after {}ms", self.connect_timeout.as_millis()),
            ))),
        }
    }

    async fn recycle(&self, conn: &mut RedisConnection, _: &Metrics) -> RecycleResult<RedisError> {
        if self.validate_on_recycle {
            conn.ping().await.map_err(RecycleError::Backend)?;
        }
        Ok(())
    }
}

fn tcp(hp: &HostPort) -> ConnectionAddr {
    ConnectionAddr::Tcp(hp.host.clone(), hp.port)
}

fn config_error(err: RedisError) -> CacheError {
    CacheError::Config(err.to_string())
}
