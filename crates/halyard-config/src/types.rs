//! Serde model of `halyard.toml`.
//!
//! Top-level config:
//! ```toml
//! [redis]          # topology, hosts, credentials
//! [redis.pool]     # connection pool sizing
//! [local_cache]    # degraded-mode local buffer
//! [session]        # persistence policies and expiry
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Default redis endpoint when no hosts are configured.
pub const DEFAULT_HOST: &str = "127.0.0.1:6379";

/// Minimum per-call timeout; smaller configured values are raised to this.
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Default sentinel master group name.
pub const DEFAULT_SENTINEL_MASTER: &str = "mymaster";

/// Default cap on cluster MOVED/ASK redirections per command.
pub const DEFAULT_MAX_REDIRECTIONS: u32 = 5;

/// Default container session timeout (30 minutes).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 1800;

/// Default attribute key used to flag a session dirty by hand.
pub const DEFAULT_DIRTY_TRACKING_KEY: &str = "__changed__";

/// One parsed config file.
///
/// Every section is optional; a layer only carries the sections it sets.
/// [`resolve`](Self::resolve) fills in defaults for the rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HalyardConfig {
    /// Remote cache connection settings.
    pub redis: Option<RedisConfig>,

    /// Degraded-mode local buffer settings.
    pub local_cache: Option<LocalCacheConfig>,

    /// Session persistence settings.
    pub session: Option<SessionConfig>,
}

impl HalyardConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml(text: &str) -> crate::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Overlay `upper`: each section it sets replaces this one's.
    pub fn merge(&mut self, upper: HalyardConfig) {
        let HalyardConfig {
            redis,
            local_cache,
            session,
        } = upper;
        self.redis = redis.or(self.redis.take());
        self.local_cache = local_cache.or(self.local_cache.take());
        self.session = session.or(self.session.take());
    }

    /// Apply defaults, interpolation and validation.
    pub fn resolve(&self) -> crate::Result<crate::Settings> {
        crate::Settings::resolve(self)
    }
}

/// Redis deployment shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// A single redis node.
    #[default]
    Standalone,
    /// Sentinel-supervised master/replica set.
    Sentinel,
    /// Hash-slot sharded cluster.
    Cluster,
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::Standalone => write!(f, "standalone"),
            Topology::Sentinel => write!(f, "sentinel"),
            Topology::Cluster => write!(f, "cluster"),
        }
    }
}

/// `[redis]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// `host:port` entries. Standalone uses the first; sentinel lists
    /// sentinels; cluster lists seed nodes. An entry may also hold a
    /// comma-separated list.
    pub hosts: Vec<String>,

    /// Deployment topology.
    pub topology: Topology,

    /// Auth credential. Supports `${VAR}` interpolation.
    pub password: Option<String>,

    /// Logical database index (ignored by cluster).
    pub database: i64,

    /// Connect and per-call timeout in milliseconds.
    pub timeout_ms: u64,

    /// Sentinel master group name.
    pub sentinel_master: String,

    /// Maximum MOVED/ASK redirections followed per cluster command.
    pub max_redirections: u32,

    /// Connection pool sizing.
    pub pool: PoolConfig,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            hosts: vec![DEFAULT_HOST.to_string()],
            topology: Topology::default(),
            password: None,
            database: 0,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            sentinel_master: DEFAULT_SENTINEL_MASTER.to_string(),
            max_redirections: DEFAULT_MAX_REDIRECTIONS,
            pool: PoolConfig::default(),
        }
    }
}

impl RedisConfig {
    /// Whether the password is written literally in the file.
    pub fn has_plaintext_password(&self) -> bool {
        self.password
            .as_deref()
            .is_some_and(|p| !p.is_empty() && !p.contains("${"))
    }
}

/// `[redis.pool]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum connections held by the pool.
    pub max_active: usize,
    /// Idle connections kept by the eviction sweep.
    pub max_idle: usize,
    /// Connections opened eagerly at startup.
    pub min_idle: usize,
    /// Validate a connection with `PING` before handing it out.
    pub test_on_borrow: bool,
    /// Validate a connection when it comes back to the pool.
    pub test_on_return: bool,
    /// Validate idle connections during the eviction sweep.
    pub test_while_idle: bool,
    /// Idle connections validated per sweep.
    pub num_tests_per_eviction: usize,
    /// Interval between eviction sweeps in milliseconds.
    pub time_between_eviction_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: 10,
            max_idle: 5,
            min_idle: 1,
            test_on_borrow: true,
            test_on_return: true,
            test_while_idle: true,
            num_tests_per_eviction: 10,
            time_between_eviction_ms: 60_000,
        }
    }
}

/// `[local_cache]` section.
///
/// Enables the in-process write-through buffer that keeps serving sessions
/// while redis is unreachable. Only safe behind a sticky-session load
/// balancer, since each node buffers its own writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalCacheConfig {
    /// Wrap the remote store with the local buffer.
    pub enabled: bool,
    /// Minimum seconds between local expiry sweeps.
    pub expiry_job_interval_secs: u64,
    /// Minimum seconds between remote resync runs.
    pub resync_job_interval_secs: u64,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            expiry_job_interval_secs: 3600,
            resync_job_interval_secs: 600,
        }
    }
}

/// Session persistence policy names accepted in `persist_policies`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistPolicy {
    /// Baseline behaviour; always implied.
    Default,
    /// Persist immediately whenever an attribute changes.
    SaveOnChange,
    /// Force a write at the end of every request.
    AlwaysSaveAfterRequest,
}

impl FromStr for PersistPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "default" => Ok(PersistPolicy::Default),
            "save_on_change" => Ok(PersistPolicy::SaveOnChange),
            "always_save_after_request" => Ok(PersistPolicy::AlwaysSaveAfterRequest),
            _ => Err(ConfigError::UnknownPolicy(s.to_string())),
        }
    }
}

/// What `find` does when it reads a claimed-but-unsaved session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullSessionPolicy {
    /// Surface a `NullSession` error to the caller.
    #[default]
    Error,
    /// Treat the id as absent.
    Absent,
}

/// `[session]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Prefix prepended to every session id to form its cache key.
    pub key_prefix: String,
    /// Policy names, matched case-insensitively.
    pub persist_policies: Vec<String>,
    /// Container session timeout in seconds.
    pub timeout_secs: u64,
    /// Floor for the remote expiry applied on save.
    pub min_expire_secs: u64,
    /// Handling of the null sentinel on read.
    pub null_session: NullSessionPolicy,
    /// Let applications flag a session dirty via `dirty_tracking_key`.
    pub manual_dirty_tracking: bool,
    /// Attribute key that marks the session dirty when manual tracking is on.
    pub dirty_tracking_key: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            persist_policies: Vec::new(),
            timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            min_expire_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            null_session: NullSessionPolicy::default(),
            manual_dirty_tracking: false,
            dirty_tracking_key: DEFAULT_DIRTY_TRACKING_KEY.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config() {
        let config = HalyardConfig::new();
        assert!(config.redis.is_none());
        assert!(config.local_cache.is_none());
        assert!(config.session.is_none());
    }

    #[test]
    fn test_parse_minimal() {
        let toml = r#"
[redis]
hosts = ["10.0.0.5:6379"]
"#;
        let config = HalyardConfig::from_toml(toml).unwrap();
        let redis = config.redis.as_ref().unwrap();
        assert_eq!(redis.hosts, vec!["10.0.0.5:6379"]);
        assert_eq!(redis.topology, Topology::Standalone);
        assert_eq!(redis.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(redis.pool, PoolConfig::default());
    }

    #[test]
    fn test_parse_full() {
        let toml = r#"
[redis]
hosts = ["s1:26379", "s2:26379"]
topology = "sentinel"
password = "${REDIS_PASSWORD}"
database = 2
sentinel_master = "sessions"

[redis.pool]
max_active = 32
min_idle = 4

[local_cache]
enabled = true
resync_job_interval_secs = 30

[session]
key_prefix = "shop:"
persist_policies = ["SAVE_ON_CHANGE"]
null_session = "absent"
"#;
        let config = HalyardConfig::from_toml(toml).unwrap();
        let redis = config.redis.as_ref().unwrap();
        assert_eq!(redis.topology, Topology::Sentinel);
        assert_eq!(redis.database, 2);
        assert_eq!(redis.sentinel_master, "sessions");
        assert_eq!(redis.pool.max_active, 32);
        assert_eq!(redis.pool.min_idle, 4);
        assert_eq!(redis.pool.max_idle, 5);
        assert!(!redis.has_plaintext_password());

        let local = config.local_cache.as_ref().unwrap();
        assert!(local.enabled);
        assert_eq!(local.resync_job_interval_secs, 30);
        assert_eq!(local.expiry_job_interval_secs, 3600);

        let session = config.session.as_ref().unwrap();
        assert_eq!(session.key_prefix, "shop:");
        assert_eq!(session.null_session, NullSessionPolicy::Absent);
        assert_eq!(session.dirty_tracking_key, DEFAULT_DIRTY_TRACKING_KEY);
    }

    #[test]
    fn test_unknown_topology_rejected() {
        let toml = r#"
[redis]
topology = "mesh"
"#;
        assert!(HalyardConfig::from_toml(toml).is_err());
    }

    #[test]
    fn test_merge_overrides_sections() {
        let mut base = HalyardConfig::from_toml(
            r#"
[redis]
hosts = ["base:6379"]

[session]
key_prefix = "base:"
"#,
        )
        .unwrap();
        let overlay = HalyardConfig::from_toml(
            r#"
[redis]
hosts = ["overlay:6379"]
"#,
        )
        .unwrap();

        base.merge(overlay);
        assert_eq!(base.redis.unwrap().hosts, vec!["overlay:6379"]);
        assert_eq!(base.session.unwrap().key_prefix, "base:");
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = HalyardConfig {
            redis: Some(RedisConfig::default()),
            local_cache: None,
            session: Some(SessionConfig::default()),
        };
        let text = config.to_toml().unwrap();
        let back = HalyardConfig::from_toml(&text).unwrap();
        assert_eq!(back.redis, config.redis);
        assert_eq!(back.session, config.session);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "save_on_change".parse::<PersistPolicy>().unwrap(),
            PersistPolicy::SaveOnChange
        );
        assert_eq!(
            "ALWAYS_SAVE_AFTER_REQUEST".parse::<PersistPolicy>().unwrap(),
            PersistPolicy::AlwaysSaveAfterRequest
        );
        assert_eq!(
            "Default".parse::<PersistPolicy>().unwrap(),
            PersistPolicy::Default
        );
        assert!(matches!(
            "sometimes".parse::<PersistPolicy>(),
            Err(ConfigError::UnknownPolicy(_))
        ));
    }

    #[test]
    fn test_plaintext_password_detection() {
        let mut redis = RedisConfig::default();
        assert!(!redis.has_plaintext_password());
        redis.password = Some("hunter2".to_string());
        assert!(redis.has_plaintext_password());
        redis.password = Some("${REDIS_PASSWORD}".to_string());
        assert!(!redis.has_plaintext_password());
    }
}
