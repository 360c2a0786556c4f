//! Errors from loading and resolving configuration.

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Config failure.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    #[error("malformed TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot encode config as TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A `host:port` entry could not be parsed.
    #[error("invalid redis host '{value}': {reason}")]
    InvalidHost { value: String, reason: String },

    /// No hosts were configured for the selected topology.
    #[error("no redis hosts configured for {topology} topology")]
    MissingHosts { topology: String },

    /// Unknown session persistence policy name.
    #[error("invalid session policy '{0}'")]
    UnknownPolicy(String),

    /// A field holds a value outside its accepted range.
    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },
}
