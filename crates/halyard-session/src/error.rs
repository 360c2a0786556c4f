//! Session error types.

use halyard_cache::CacheError;
use halyard_config::ConfigError;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors raised while encoding or decoding session payloads.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The envelope or body could not be parsed.
    #[error("corrupt session payload: {0}")]
    CorruptPayload(String),

    /// An attribute names a type with no registered decoder.
    #[error("attribute '{name}' has unregistered type '{type_name}'")]
    UnknownAttributeType { name: String, type_name: String },

    /// An attribute holds a value that would not decode back.
    #[error("attribute '{name}' cannot be encoded: {reason}")]
    Unencodable { name: String, reason: String },

    /// Serializing the session failed.
    #[error("failed to serialize session: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors surfaced by the session manager.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The id is claimed but its first save never landed.
    #[error("session '{0}' holds no data")]
    NullSession(String),

    /// No free id was found within the attempt bound.
    #[error("could not claim a session id after {attempts} attempts")]
    ClaimExhausted { attempts: u32 },

    #[error(transparent)]
    Store(#[from] CacheError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
