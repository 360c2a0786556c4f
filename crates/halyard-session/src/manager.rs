//! Session persistence coordinator.
//!
//! A session id moves through these states in the store:
//! absent, claimed (holding [`NULL_SENTINEL`]), persisted, removed.
//! New ids are claimed with `set_if_absent` so two nodes can never hand
//! out the same id. Saves skip the write when nothing changed since the
//! last read or write, but always refresh the remote expiry.

use std::sync::Arc;

use halyard_cache::{CacheStack, CacheStore, Claim, build_store};
use halyard_config::{HalyardConfig, NullSessionPolicy, SessionSettings};
use tracing::{debug, error, info, trace};

use crate::codec::{SessionCodec, SessionMetadata};
use crate::context::SessionContext;
use crate::error::{Result, SessionError};
use crate::ids::{IdGenerator, RandomIdGenerator};
use crate::session::Session;
use crate::value::SessionValue;

/// Placeholder stored under a claimed id until its first save.
pub const NULL_SENTINEL: &[u8] = b"null";

/// Random ids tried before giving up on a claim.
pub const MAX_CLAIM_ATTEMPTS: u32 = 16;

/// What a [`SessionManager::save`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The payload was written and the expiry refreshed.
    Written,
    /// Nothing changed; only the expiry was refreshed.
    Unchanged,
    /// The store or codec failed; the failure was logged.
    Failed,
}

/// Creates, loads, saves and removes sessions against a [`CacheStore`].
pub struct SessionManager {
    store: Arc<dyn CacheStore>,
    codec: SessionCodec,
    settings: SessionSettings,
    ids: Arc<dyn IdGenerator>,
    stack: Option<CacheStack>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn CacheStore>, settings: SessionSettings) -> Self {
        Self {
            store,
            codec: SessionCodec::default(),
            settings,
            ids: Arc::new(RandomIdGenerator),
            stack: None,
        }
    }

    /// Use a codec with a custom type registry.
    pub fn with_codec(mut self, codec: SessionCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Resolve `config`, connect to redis and build a manager over it.
    pub async fn from_config(config: &HalyardConfig) -> Result<Self> {
        let settings = config.resolve()?;
        let stack = build_store(&settings).await?;

        let mut manager = Self::new(stack.store(), settings.session);
        manager.stack = Some(stack);

        info!(
            expiry_secs = manager.settings.effective_timeout(0),
            key_prefix = %manager.settings.key_prefix,
            "Sessions will expire after the effective timeout"
        );
        Ok(manager)
    }

    /// Interrupt pending retries and close the connection pool.
    pub async fn shutdown(&self) {
        if let Some(ref stack) = self.stack {
            stack.close().await;
        }
        debug!("Session manager shut down");
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn codec(&self) -> &SessionCodec {
        &self.codec
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Cache key for a session id.
    pub fn key(&self, id: &str) -> String {
        format!("{}{}", self.settings.key_prefix, id)
    }

    /// Remote expiry applied to `session` on save.
    pub fn effective_timeout(&self, session: &Session) -> u64 {
        self.settings.effective_timeout(session.max_inactive_secs())
    }

    /// Claim an id and create a session bound to `ctx`.
    ///
    /// With `requested_id`, returns `None` if that id is already taken.
    /// Without one, random ids are tried until a claim succeeds. The new
    /// session is saved immediately; if that save fails the context is
    /// cleared and `None` is returned.
    pub async fn create_session<'c>(
        &self,
        ctx: &'c mut SessionContext,
        requested_id: Option<&str>,
    ) -> Result<Option<&'c mut Session>> {
        let id = match requested_id {
            Some(id) => match self.store.set_if_absent(&self.key(id), NULL_SENTINEL).await? {
                Claim::Created => id.to_string(),
                Claim::Existed => {
                    debug!(session_id = %id, "Requested session id already taken");
                    return Ok(None);
                }
            },
            None => self.claim_random_id().await?,
        };

        let timeout = self.settings.effective_timeout(0);
        let session = Session::new(id.clone(), timeout);
        ctx.bind(
            Some(id.clone()),
            Some(session),
            false,
            Some(SessionMetadata::default()),
        );

        if self.save(ctx, true).await == SaveOutcome::Failed {
            error!(session_id = %id, "Initial save failed, abandoning new session");
            ctx.clear();
            if let Err(e) = self.store.expire(&self.key(&id), timeout).await {
                debug!(session_id = %id, error = %e, "Could not set expiry on abandoned claim");
            }
            return Ok(None);
        }

        debug!(session_id = %id, "Created session");
        Ok(ctx.session.as_mut())
    }

    async fn claim_random_id(&self) -> Result<String> {
        for attempt in 1..=MAX_CLAIM_ATTEMPTS {
            let id = self.ids.generate();
            if self
                .store
                .set_if_absent(&self.key(&id), NULL_SENTINEL)
                .await?
                .is_created()
            {
                return Ok(id);
            }
            trace!(attempt, "Session id collision, retrying");
        }
        Err(SessionError::ClaimExhausted {
            attempts: MAX_CLAIM_ATTEMPTS,
        })
    }

    /// Look up a session, binding it to `ctx`.
    ///
    /// A session already bound under the same id is returned without a
    /// store round trip. Store and decode failures are logged and treated
    /// as absence. A claimed id whose first save never landed is an error
    /// or absent, per the configured null-session policy.
    pub async fn find_session<'c>(
        &self,
        ctx: &'c mut SessionContext,
        id: &str,
    ) -> Result<Option<&'c mut Session>> {
        if ctx.id.as_deref() == Some(id) {
            return Ok(ctx.session.as_mut());
        }

        let data = match self.store.get(&self.key(id)).await {
            Ok(Some(data)) => data,
            Ok(None) => {
                ctx.bind(None, None, false, None);
                return Ok(None);
            }
            Err(e) => {
                error!(session_id = %id, error = %e, "Failed to load session");
                ctx.bind(None, None, false, None);
                return Ok(None);
            }
        };

        if data == NULL_SENTINEL {
            return match self.settings.null_session {
                NullSessionPolicy::Error => Err(SessionError::NullSession(id.to_string())),
                NullSessionPolicy::Absent => {
                    debug!(session_id = %id, "Session claimed but never saved");
                    ctx.bind(None, None, false, None);
                    Ok(None)
                }
            };
        }

        match self.codec.decode(&data) {
            Ok((mut session, metadata)) => {
                session.set_id(id);
                session.access();
                session.set_new(false);
                session.set_valid(true);
                session.reset_dirty_tracking();
                let timeout = self.effective_timeout(&session);
                session.set_max_inactive_secs(timeout);

                trace!(session_id = %id, "Loaded session");
                ctx.bind(Some(id.to_string()), Some(session), true, Some(metadata));
            }
            Err(e) => {
                error!(session_id = %id, error = %e, "Failed to decode session");
                ctx.bind(Some(id.to_string()), None, false, None);
            }
        }
        Ok(ctx.session.as_mut())
    }

    /// Persist the session bound to `ctx`.
    ///
    /// Writes when `force` is set, the session is dirty, it has not been
    /// persisted yet, or its attribute hash differs from the last known one.
    /// The remote expiry is refreshed either way.
    pub async fn save(&self, ctx: &mut SessionContext, force: bool) -> SaveOutcome {
        let Some(session) = ctx.session.as_ref() else {
            trace!("No session bound, nothing to save");
            return SaveOutcome::Unchanged;
        };
        let key = self.key(session.id());
        let timeout = self.effective_timeout(session);

        let hash = match self.codec.hash(session) {
            Ok(hash) => hash,
            Err(e) => {
                error!(session_id = %session.id(), error = %e, "Failed to hash session");
                return SaveOutcome::Failed;
            }
        };
        let known_hash = ctx.metadata.as_ref().map(|m| m.attributes_hash.as_slice());
        let needs_write = force
            || session.is_dirty()
            || ctx.persisted != Some(true)
            || known_hash != Some(hash.as_slice());

        let mut outcome = SaveOutcome::Unchanged;
        if needs_write {
            let metadata = SessionMetadata::new(hash);
            let bytes = match self.codec.encode(session, &metadata) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!(session_id = %session.id(), error = %e, "Failed to encode session");
                    return SaveOutcome::Failed;
                }
            };
            if let Err(e) = self.store.set(&key, &bytes).await {
                error!(session_id = %session.id(), error = %e, "Failed to save session");
                return SaveOutcome::Failed;
            }

            if let Some(session) = ctx.session.as_mut() {
                session.reset_dirty_tracking();
            }
            ctx.persisted = Some(true);
            ctx.metadata = Some(metadata);
            outcome = SaveOutcome::Written;
        }

        if let Err(e) = self.store.expire(&key, timeout).await {
            error!(key = %key, error = %e, "Failed to refresh session expiry");
            return SaveOutcome::Failed;
        }
        trace!(key = %key, expire_secs = timeout, ?outcome, "Session saved");
        outcome
    }

    /// Delete a session from the store. Returns whether it existed.
    pub async fn remove(&self, session: &Session) -> Result<bool> {
        let removed = self.store.delete(&self.key(session.id())).await?;
        debug!(session_id = %session.id(), removed, "Removed session");
        Ok(removed > 0)
    }

    /// End-of-request hook: save a valid session, remove an invalidated one,
    /// then clear `ctx`.
    pub async fn after_request(&self, ctx: &mut SessionContext) {
        match ctx.session.as_ref().map(Session::is_valid) {
            Some(true) => {
                let force = self.settings.policies.always_save_after_request;
                self.save(ctx, force).await;
            }
            Some(false) => {
                if let Some(session) = ctx.session.as_ref()
                    && let Err(e) = self.remove(session).await
                {
                    error!(session_id = %session.id(), error = %e, "Failed to remove session");
                }
            }
            None => {}
        }
        ctx.clear();
    }

    /// Set an attribute on the bound session. Returns whether it changed.
    ///
    /// With manual dirty tracking, writing the tracking key only marks the
    /// session dirty. With the save-on-change policy a change is persisted
    /// immediately.
    pub async fn set_attribute<V: SessionValue>(
        &self,
        ctx: &mut SessionContext,
        name: &str,
        value: V,
    ) -> bool {
        let tracking_key = self.settings.dirty_tracking_key.as_deref();
        let Some(session) = ctx.session.as_mut() else {
            return false;
        };

        if tracking_key == Some(name) {
            session.mark_dirty();
            return true;
        }

        let changed = session.set_attribute(name, value);
        if changed && self.settings.policies.save_on_change {
            self.save(ctx, true).await;
        }
        changed
    }

    /// Remove an attribute from the bound session. Returns whether it existed.
    pub async fn remove_attribute(&self, ctx: &mut SessionContext, name: &str) -> bool {
        let Some(session) = ctx.session.as_mut() else {
            return false;
        };
        let existed = session.remove_attribute(name);
        if self.settings.policies.save_on_change {
            self.save(ctx, true).await;
        }
        existed
    }
}
