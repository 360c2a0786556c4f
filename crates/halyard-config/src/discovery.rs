//! Locating and layering halyard config files.
//!
//! Two layers are read. A section present in the later layer replaces the
//! same section from the earlier one:
//! 1. user: `$HALYARD_CONFIG_DIR/config.toml`, falling back to
//!    `<platform config dir>/halyard/config.toml`
//! 2. project: `halyard.toml` in the working (or given) directory
//!
//! A layer that exists but cannot be read or parsed is skipped with a
//! warning.

use std::path::{Path, PathBuf};

use crate::{ConfigError, HalyardConfig, Result};

const PROJECT_FILE_NAME: &str = "halyard.toml";
const USER_FILE_NAME: &str = "config.toml";
const USER_DIR_NAME: &str = "halyard";
const USER_DIR_ENV: &str = "HALYARD_CONFIG_DIR";

/// Which layer a config file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    User,
    Project,
}

/// One candidate config file and whether it contributed.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub kind: LayerKind,
    pub path: PathBuf,
    pub loaded: bool,
}

/// Merged configuration plus provenance.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: HalyardConfig,
    /// Every candidate, lowest precedence first.
    pub sources: Vec<ConfigSource>,
    /// Skipped layers and risky settings, already logged.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter_map(|s| s.loaded.then_some(s.path.as_path()))
            .collect()
    }
}

/// Load and merge the user and project layers.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Like [`load_config`], with the user config directory pinned to
/// `config_dir` instead of the environment or platform default.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let mut loaded = LoadedConfig {
        config: HalyardConfig::new(),
        sources: Vec::with_capacity(2),
        warnings: Vec::new(),
    };

    let user_file = config_dir
        .map(|dir| dir.join(USER_FILE_NAME))
        .or_else(xdg_config_path);
    let project_file = project_dir.map_or_else(
        || PathBuf::from(PROJECT_FILE_NAME),
        |dir| dir.join(PROJECT_FILE_NAME),
    );

    let candidates = user_file
        .map(|p| (LayerKind::User, p))
        .into_iter()
        .chain(std::iter::once((LayerKind::Project, project_file)));
    for (kind, path) in candidates {
        let source = apply_layer(&mut loaded, kind, path);
        loaded.sources.push(source);
    }

    if loaded
        .config
        .redis
        .as_ref()
        .is_some_and(|redis| redis.has_plaintext_password())
    {
        loaded.warnings.push(
            "redis.password is stored as plaintext; reference an environment \
             variable such as \"${REDIS_PASSWORD}\" instead"
                .to_string(),
        );
    }

    for warning in &loaded.warnings {
        tracing::warn!(warning = %warning, "config warning");
    }
    Ok(loaded)
}

/// Read and parse one file, without layering.
pub fn load_config_file(path: &Path) -> Result<HalyardConfig> {
    match std::fs::read_to_string(path) {
        Ok(text) => HalyardConfig::from_toml(&text),
        Err(source) => Err(ConfigError::ReadFile {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// The user-layer file inside [`xdg_config_dir`].
pub fn xdg_config_path() -> Option<PathBuf> {
    Some(xdg_config_dir()?.join(USER_FILE_NAME))
}

/// `$HALYARD_CONFIG_DIR` when set and non-empty, otherwise
/// `<platform config dir>/halyard`.
pub fn xdg_config_dir() -> Option<PathBuf> {
    match std::env::var_os(USER_DIR_ENV) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|base| base.join(USER_DIR_NAME)),
    }
}

fn apply_layer(loaded: &mut LoadedConfig, kind: LayerKind, path: PathBuf) -> ConfigSource {
    let mut source = ConfigSource {
        kind,
        path,
        loaded: false,
    };
    if !source.path.is_file() {
        return source;
    }

    match load_config_file(&source.path) {
        Ok(layer) => {
            tracing::debug!(layer = ?kind, path = %source.path.display(), "merged config layer");
            loaded.config.merge(layer);
            source.loaded = true;
        }
        Err(e) => loaded
            .warnings
            .push(format!("skipped {} ({e})", source.path.display())),
    }
    source
}
