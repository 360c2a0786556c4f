//! Replicated HTTP session persistence over redis.
//!
//! This crate decides when a session is read, written and expired:
//! - [`SessionManager`]: create, find, save and remove sessions, with
//!   collision-free id claims and change detection
//! - [`Session`]: typed attributes with dirty tracking
//! - [`SessionCodec`]: byte payloads prefixed with an attribute hash
//! - [`SessionContext`]: the per-request binding the manager works on
//!
//! # Example
//!
//! ```rust,ignore
//! use halyard_session::{SessionContext, SessionManager};
//!
//! let config = halyard_config::load_config(None)?.config;
//! let manager = SessionManager::from_config(&config).await?;
//!
//! let mut ctx = SessionContext::new();
//! manager.create_session(&mut ctx, None).await?;
//! manager.set_attribute(&mut ctx, "user", "alice".to_string()).await;
//! manager.after_request(&mut ctx).await;
//! ```

mod codec;
mod context;
mod error;
mod ids;
mod manager;
mod session;
mod value;

pub use codec::{SessionCodec, SessionMetadata};
pub use context::SessionContext;
pub use error::{CodecError, Result, SessionError};
pub use ids::{IdGenerator, RandomIdGenerator};
pub use manager::{MAX_CLAIM_ATTEMPTS, NULL_SENTINEL, SaveOutcome, SessionManager};
pub use session::Session;
pub use value::{AttributeValue, SessionValue, TypeRegistry};
