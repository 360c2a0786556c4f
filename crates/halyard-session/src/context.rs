//! Per-request session state.

use crate::codec::SessionMetadata;
use crate::session::Session;

/// What the manager knows about the session bound to one request.
///
/// Create one per request, pass it by `&mut` to every manager call and let
/// [`SessionManager::after_request`](crate::SessionManager::after_request)
/// clear it.
#[derive(Debug, Default)]
pub struct SessionContext {
    pub(crate) id: Option<String>,
    pub(crate) session: Option<Session>,
    /// `None` until the manager has read or written the session.
    pub(crate) persisted: Option<bool>,
    /// Metadata from the last read or write.
    pub(crate) metadata: Option<SessionMetadata>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    pub fn persisted(&self) -> Option<bool> {
        self.persisted
    }

    pub fn metadata(&self) -> Option<&SessionMetadata> {
        self.metadata.as_ref()
    }

    pub(crate) fn bind(
        &mut self,
        id: Option<String>,
        session: Option<Session>,
        persisted: bool,
        metadata: Option<SessionMetadata>,
    ) {
        self.id = id;
        self.session = session;
        self.persisted = Some(persisted);
        self.metadata = metadata;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
