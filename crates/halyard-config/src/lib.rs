//! Configuration system for halyard.
//!
//! Provides TOML-based configuration with:
//! - Redis topology selection (`standalone`, `sentinel`, `cluster`) and pool sizing
//! - Degraded-mode local cache toggles and job intervals
//! - Session persistence policies and expiry floors
//! - Config file layering (XDG user config + project-local overrides)
//! - `${VAR}` environment interpolation for string values
//!
//! File layers deserialize into [`HalyardConfig`], where every section is
//! optional. [`HalyardConfig::resolve`] applies defaults, interpolation and
//! validation and produces the [`Settings`] consumed by the runtime crates.

pub mod discovery;
pub mod error;
pub mod interpolate;
pub mod settings;
pub mod types;

pub use discovery::{
    ConfigSource, LayerKind, LoadedConfig, load_config, load_config_file, load_config_with_options,
    xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use interpolate::{interpolate, interpolate_with};
pub use settings::{
    HostPort, LocalCacheSettings, PersistPolicies, RedisSettings, SessionSettings, Settings,
};
pub use types::*;
