//! Per-call request context.

use uuid::Uuid;

use super::session::Session;
use super::transport::CallGuard;
use crate::auth::Credential;
use crate::error::Result;

/// Everything a handler needs to know about the call it is serving.
///
/// Built when a routed call starts and passed down by reference to every
/// handler and operation. Dropping it marks the call as finished on the
/// session's transport, so it is released on success, error and panic alike.
pub struct RequestContext {
    session_id: String,
    credential: Credential,
    call_id: Uuid,
    _call: CallGuard,
}

impl RequestContext {
    /// Attach a new call to `session`.
    ///
    /// The credential is snapshotted here; a later swap on the session does
    /// not affect a call already in flight.
    pub fn attach(session: &Session) -> Result<Self> {
        let call = session.transport().begin_call()?;
        Ok(Self {
            session_id: session.id().to_string(),
            credential: session.credential(),
            call_id: Uuid::new_v4(),
            _call: call,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn call_id(&self) -> Uuid {
        self.call_id
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("session_id", &self.session_id)
            .field("call_id", &self.call_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::SessionStore;

    #[test]
    fn test_context_released_on_drop() {
        let store = SessionStore::new();
        let session = store.create(Credential::new("tok-A")).unwrap();

        let ctx = RequestContext::attach(&session).unwrap();
        assert_eq!(ctx.credential().expose(), "tok-A");
        assert_eq!(session.transport().in_flight(), 1);

        drop(ctx);
        assert_eq!(session.transport().in_flight(), 0);
    }

    #[test]
    fn test_context_snapshots_credential() {
        let store = SessionStore::new();
        let session = store.create(Credential::new("old")).unwrap();
        let ctx = RequestContext::attach(&session).unwrap();

        store.swap_credential(session.id(), Credential::new("new"));
        assert_eq!(ctx.credential().expose(), "old");
    }

    #[test]
    fn test_call_ids_are_unique() {
        let store = SessionStore::new();
        let session = store.create(Credential::new("tok")).unwrap();
        let a = RequestContext::attach(&session).unwrap();
        let b = RequestContext::attach(&session).unwrap();
        assert_ne!(a.call_id(), b.call_id());
    }

    #[test]
    fn test_attach_refused_after_removal() {
        let store = SessionStore::new();
        let session = store.create(Credential::new("tok")).unwrap();
        store.remove(session.id());
        assert!(RequestContext::attach(&session).is_err());
        assert_eq!(session.transport().in_flight(), 0);
    }
}
