//! Resolved settings consumed by the runtime crates.
//!
//! [`Settings::resolve`] fills in missing sections, expands `${VAR}`
//! placeholders, parses host lists and rejects out-of-range values.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::interpolate::interpolate;
use crate::types::{
    DEFAULT_TIMEOUT_MS, HalyardConfig, LocalCacheConfig, NullSessionPolicy, PersistPolicy,
    PoolConfig, RedisConfig, SessionConfig, Topology,
};
use crate::{ConfigError, Result};

/// A parsed `host:port` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a list of entries, each of which may itself be comma-separated.
    pub fn parse_list<S: AsRef<str>>(entries: &[S]) -> Result<Vec<HostPort>> {
        let mut out = Vec::new();
        for entry in entries {
            for part in entry.as_ref().split(',') {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                out.push(part.parse()?);
            }
        }
        Ok(out)
    }
}

impl FromStr for HostPort {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| ConfigError::InvalidHost {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let (host, port) = s.trim().rsplit_once(':').ok_or_else(|| invalid("expected host:port"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        let port: u16 = port.parse().map_err(|_| invalid("port is not a number in 0-65535"))?;
        if port == 0 {
            return Err(invalid("port must be non-zero"));
        }
        Ok(HostPort::new(host, port))
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Resolved `[redis]` settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RedisSettings {
    pub topology: Topology,
    pub hosts: Vec<HostPort>,
    pub password: Option<String>,
    pub database: i64,
    /// Connect and per-call timeout, never below two seconds.
    pub timeout: Duration,
    pub sentinel_master: String,
    pub max_redirections: u32,
    pub pool: PoolConfig,
}

impl RedisSettings {
    fn resolve(config: &RedisConfig) -> Result<Self> {
        let hosts: Vec<String> = config.hosts.iter().map(|h| interpolate(h)).collect();
        let hosts = HostPort::parse_list(&hosts)?;
        if hosts.is_empty() {
            return Err(ConfigError::MissingHosts {
                topology: config.topology.to_string(),
            });
        }
        if config.topology == Topology::Standalone && hosts.len() > 1 {
            tracing::warn!(
                hosts = hosts.len(),
                first = %hosts[0],
                "standalone topology uses only the first configured host"
            );
        }

        let timeout_ms = if config.timeout_ms < DEFAULT_TIMEOUT_MS {
            tracing::debug!(
                configured = config.timeout_ms,
                applied = DEFAULT_TIMEOUT_MS,
                "raising redis timeout to minimum"
            );
            DEFAULT_TIMEOUT_MS
        } else {
            config.timeout_ms
        };

        let password = config
            .password
            .as_deref()
            .map(interpolate)
            .filter(|p| !p.is_empty());

        let sentinel_master = interpolate(&config.sentinel_master);
        if config.topology == Topology::Sentinel && sentinel_master.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "redis.sentinel_master".to_string(),
                reason: "sentinel topology needs a master group name".to_string(),
            });
        }

        if config.database < 0 {
            return Err(ConfigError::Invalid {
                field: "redis.database".to_string(),
                reason: format!("must be non-negative, got {}", config.database),
            });
        }

        validate_pool(&config.pool)?;

        Ok(Self {
            topology: config.topology,
            hosts,
            password,
            database: config.database,
            timeout: Duration::from_millis(timeout_ms),
            sentinel_master,
            max_redirections: config.max_redirections,
            pool: config.pool.clone(),
        })
    }

    /// Interval between pool eviction sweeps.
    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.pool.time_between_eviction_ms)
    }
}

fn validate_pool(pool: &PoolConfig) -> Result<()> {
    let invalid = |field: &str, reason: String| ConfigError::Invalid {
        field: format!("redis.pool.{field}"),
        reason,
    };

    if pool.max_active == 0 {
        return Err(invalid("max_active", "must be at least 1".to_string()));
    }
    if pool.max_idle > pool.max_active {
        return Err(invalid(
            "max_idle",
            format!("{} exceeds max_active {}", pool.max_idle, pool.max_active),
        ));
    }
    if pool.min_idle > pool.max_idle {
        return Err(invalid(
            "min_idle",
            format!("{} exceeds max_idle {}", pool.min_idle, pool.max_idle),
        ));
    }
    if pool.time_between_eviction_ms == 0 {
        return Err(invalid(
            "time_between_eviction_ms",
            "must be non-zero".to_string(),
        ));
    }
    Ok(())
}

/// Resolved `[local_cache]` settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCacheSettings {
    pub enabled: bool,
    pub expiry_job_interval: Duration,
    pub resync_job_interval: Duration,
}

impl From<&LocalCacheConfig> for LocalCacheSettings {
    fn from(config: &LocalCacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            expiry_job_interval: Duration::from_secs(config.expiry_job_interval_secs),
            resync_job_interval: Duration::from_secs(config.resync_job_interval_secs),
        }
    }
}

/// Parsed set of persistence policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistPolicies {
    pub save_on_change: bool,
    pub always_save_after_request: bool,
}

impl PersistPolicies {
    /// Parse policy names; unknown names are rejected.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut policies = Self::default();
        for name in names {
            match name.as_ref().parse::<PersistPolicy>()? {
                PersistPolicy::Default => {}
                PersistPolicy::SaveOnChange => policies.save_on_change = true,
                PersistPolicy::AlwaysSaveAfterRequest => policies.always_save_after_request = true,
            }
        }
        Ok(policies)
    }
}

/// Resolved `[session]` settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub key_prefix: String,
    pub policies: PersistPolicies,
    pub timeout_secs: u64,
    pub min_expire_secs: u64,
    pub null_session: NullSessionPolicy,
    /// Attribute key that marks a session dirty, when manual tracking is on.
    pub dirty_tracking_key: Option<String>,
}

impl SessionSettings {
    fn resolve(config: &SessionConfig) -> Result<Self> {
        if config.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "session.timeout_secs".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }

        let dirty_tracking_key = if config.manual_dirty_tracking {
            if config.dirty_tracking_key.is_empty() {
                return Err(ConfigError::Invalid {
                    field: "session.dirty_tracking_key".to_string(),
                    reason: "required when manual_dirty_tracking is enabled".to_string(),
                });
            }
            Some(config.dirty_tracking_key.clone())
        } else {
            None
        };

        Ok(Self {
            key_prefix: interpolate(&config.key_prefix),
            policies: PersistPolicies::from_names(&config.persist_policies)?,
            timeout_secs: config.timeout_secs,
            min_expire_secs: config.min_expire_secs,
            null_session: config.null_session,
            dirty_tracking_key,
        })
    }

    /// Remote expiry for a session with the given inactivity interval.
    ///
    /// Sessions shorter than the container timeout are stretched to
    /// `timeout_secs`. The result never drops below `min_expire_secs`.
    pub fn effective_timeout(&self, max_inactive_secs: u64) -> u64 {
        max_inactive_secs
            .max(self.timeout_secs)
            .max(self.min_expire_secs)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            policies: PersistPolicies::default(),
            timeout_secs: crate::types::DEFAULT_SESSION_TIMEOUT_SECS,
            min_expire_secs: crate::types::DEFAULT_SESSION_TIMEOUT_SECS,
            null_session: NullSessionPolicy::default(),
            dirty_tracking_key: None,
        }
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub redis: RedisSettings,
    pub local_cache: LocalCacheSettings,
    pub session: SessionSettings,
}

impl Settings {
    /// Resolve a merged config into settings, applying defaults for absent sections.
    pub fn resolve(config: &HalyardConfig) -> Result<Self> {
        let redis = config.redis.clone().unwrap_or_default();
        let local_cache = config.local_cache.clone().unwrap_or_default();
        let session = config.session.clone().unwrap_or_default();

        Ok(Self {
            redis: RedisSettings::resolve(&redis)?,
            local_cache: LocalCacheSettings::from(&local_cache),
            session: SessionSettings::resolve(&session)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_port_parse() {
        let hp: HostPort = "cache.internal:6380".parse().unwrap();
        assert_eq!(hp, HostPort::new("cache.internal", 6380));
        assert_eq!(hp.to_string(), "cache.internal:6380");

        let v6: HostPort = "[::1]:6379".parse().unwrap();
        assert_eq!(v6.host, "::1");
        assert_eq!(v6.to_string(), "[::1]:6379");
    }

    #[test]
    fn test_host_port_rejects_garbage() {
        assert!(matches!(
            "nohost".parse::<HostPort>(),
            Err(ConfigError::InvalidHost { .. })
        ));
        assert!(":6379".parse::<HostPort>().is_err());
        assert!("host:99999".parse::<HostPort>().is_err());
        assert!("host:0".parse::<HostPort>().is_err());
    }

    #[test]
    fn test_host_list_splits_commas() {
        let hosts = HostPort::parse_list(&["a:1, b:2", "c:3", " "]).unwrap();
        assert_eq!(
            hosts,
            vec![HostPort::new("a", 1), HostPort::new("b", 2), HostPort::new("c", 3)]
        );
    }

    #[test]
    fn test_resolve_defaults() {
        let settings = HalyardConfig::new().resolve().unwrap();
        assert_eq!(settings.redis.topology, Topology::Standalone);
        assert_eq!(settings.redis.hosts, vec![HostPort::new("127.0.0.1", 6379)]);
        assert_eq!(settings.redis.timeout, Duration::from_millis(2000));
        assert_eq!(settings.redis.eviction_interval(), Duration::from_secs(60));
        assert!(!settings.local_cache.enabled);
        assert_eq!(settings.session, SessionSettings::default());
    }

    #[test]
    fn test_timeout_clamped_up() {
        let config = HalyardConfig::from_toml("[redis]\ntimeout_ms = 500\n").unwrap();
        assert_eq!(config.resolve().unwrap().redis.timeout, Duration::from_secs(2));

        let config = HalyardConfig::from_toml("[redis]\ntimeout_ms = 5000\n").unwrap();
        assert_eq!(config.resolve().unwrap().redis.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_empty_hosts_rejected() {
        let config = HalyardConfig::from_toml("[redis]\nhosts = []\ntopology = \"cluster\"\n").unwrap();
        let err = config.resolve().unwrap_err();
        assert!(matches!(err, ConfigError::MissingHosts { ref topology } if topology == "cluster"));
    }

    #[test]
    fn test_pool_bounds_validated() {
        let config = HalyardConfig::from_toml("[redis.pool]\nmax_active = 2\nmax_idle = 4\n").unwrap();
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "redis.pool.max_idle"
        ));
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let config =
            HalyardConfig::from_toml("[session]\npersist_policies = [\"sometimes\"]\n").unwrap();
        assert!(matches!(config.resolve(), Err(ConfigError::UnknownPolicy(_))));
    }

    #[test]
    fn test_policies_parsed() {
        let policies =
            PersistPolicies::from_names(&["DEFAULT", "save_on_change", "Always_Save_After_Request"])
                .unwrap();
        assert!(policies.save_on_change);
        assert!(policies.always_save_after_request);
    }

    #[test]
    fn test_manual_dirty_tracking_key() {
        let config =
            HalyardConfig::from_toml("[session]\nmanual_dirty_tracking = true\n").unwrap();
        let settings = config.resolve().unwrap();
        assert_eq!(settings.session.dirty_tracking_key.as_deref(), Some("__changed__"));
    }

    #[test]
    fn test_effective_timeout() {
        let session = SessionSettings {
            timeout_secs: 1800,
            min_expire_secs: 3600,
            ..SessionSettings::default()
        };
        assert_eq!(session.effective_timeout(600), 3600);
        assert_eq!(session.effective_timeout(1800), 3600);
        assert_eq!(session.effective_timeout(3599), 3600);
        assert_eq!(session.effective_timeout(7200), 7200);

        let session = SessionSettings {
            timeout_secs: 1800,
            min_expire_secs: 60,
            ..SessionSettings::default()
        };
        assert_eq!(session.effective_timeout(600), 1800);
    }
}
