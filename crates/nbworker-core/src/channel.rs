//! Host-bound message channel
//!
//! The [`Messenger`] is a single slot holding the active session's
//! [`SessionContext`]. Starting a session overwrites it wholesale. Guest code
//! never sees the slot itself; it gets a [`ChannelHandle`] bound to its own
//! session id, and a handle only delivers while its session is the active one.
//! Delivery is a direct, synchronous callback invocation with no queue.

use crate::errors::WorkerError;
use crate::message::OperationMessage;
use crate::session::SessionId;
use nbworker_config::{QueryParams, UserConfig};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Host callback receiving serialized guest events.
///
/// It runs on the guest's thread; blocking here stalls event delivery.
pub type MessageCallback = Arc<dyn Fn(OperationMessage) + Send + Sync>;

/// Per-session values the guest reads through its channel
pub struct SessionContext {
    pub id: SessionId,
    pub callback: MessageCallback,
    pub query_params: QueryParams,
    pub user_config: UserConfig,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("id", &self.id)
            .field("query_params", &self.query_params)
            .finish_non_exhaustive()
    }
}

type Slot = Arc<RwLock<Option<Arc<SessionContext>>>>;

#[derive(Clone, Default)]
pub struct Messenger {
    slot: Slot,
}

impl Messenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the slot with `context`, returning the id it replaced
    pub fn install(&self, context: SessionContext) -> Option<SessionId> {
        let mut slot = self.slot.write();
        let previous = slot.as_ref().map(|ctx| ctx.id);
        *slot = Some(Arc::new(context));
        previous
    }

    pub fn active(&self) -> Option<SessionId> {
        self.slot.read().as_ref().map(|ctx| ctx.id)
    }

    /// The context for `id`, if it is still the active session
    pub fn context(&self, id: SessionId) -> Result<Arc<SessionContext>, WorkerError> {
        match self.slot.read().as_ref() {
            Some(ctx) if ctx.id == id => Ok(Arc::clone(ctx)),
            _ => Err(WorkerError::ChannelNotInitialized(id)),
        }
    }

    pub fn handle(&self, id: SessionId) -> ChannelHandle {
        ChannelHandle {
            session: id,
            slot: Arc::clone(&self.slot),
        }
    }

    /// Empty the slot if `id` still owns it
    pub fn clear_if(&self, id: SessionId) -> bool {
        let mut slot = self.slot.write();
        if slot.as_ref().is_some_and(|ctx| ctx.id == id) {
            *slot = None;
            return true;
        }
        false
    }
}

impl fmt::Debug for Messenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Messenger")
            .field("active", &self.active())
            .finish()
    }
}

/// The guest's end of the channel
#[derive(Clone)]
pub struct ChannelHandle {
    session: SessionId,
    slot: Slot,
}

impl ChannelHandle {
    pub fn session(&self) -> SessionId {
        self.session
    }

    fn current(&self) -> Option<Arc<SessionContext>> {
        match self.slot.read().as_ref() {
            Some(ctx) if ctx.id == self.session => Some(Arc::clone(ctx)),
            _ => None,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.current().is_some()
    }

    /// Deliver `message` to the host; returns `false` if this session is no
    /// longer active and the message was dropped.
    pub fn send(&self, message: OperationMessage) -> bool {
        // Lock is released before the callback runs; it may start a new session.
        let Some(ctx) = self.current() else {
            tracing::debug!(session = %self.session, "dropping message from inactive session");
            return false;
        };
        (ctx.callback)(message);
        true
    }

    pub fn query_params(&self) -> Option<QueryParams> {
        self.current().map(|ctx| ctx.query_params.clone())
    }

    pub fn user_config(&self) -> Option<UserConfig> {
        self.current().map(|ctx| ctx.user_config.clone())
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("session", &self.session)
            .field("bound", &self.is_bound())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recording_context(id: u64, sink: Arc<Mutex<Vec<String>>>) -> SessionContext {
        SessionContext {
            id: SessionId::new(id),
            callback: Arc::new(move |msg: OperationMessage| sink.lock().push(msg.into_inner())),
            query_params: QueryParams::new(),
            user_config: UserConfig::default(),
        }
    }

    #[test]
    fn test_handle_delivers_while_active() {
        let messenger = Messenger::new();
        let sink = Arc::new(Mutex::new(Vec::new()));
        assert_eq!(messenger.install(recording_context(1, Arc::clone(&sink))), None);

        let handle = messenger.handle(SessionId::new(1));
        assert!(handle.send(OperationMessage::from_raw("a")));
        assert!(handle.send(OperationMessage::from_raw("b")));
        assert_eq!(*sink.lock(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_overwrite_routes_to_new_session_only() {
        let messenger = Messenger::new();
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));

        messenger.install(recording_context(1, Arc::clone(&first)));
        let old = messenger.handle(SessionId::new(1));
        let replaced = messenger.install(recording_context(2, Arc::clone(&second)));
        assert_eq!(replaced, Some(SessionId::new(1)));

        let new = messenger.handle(SessionId::new(2));
        assert!(!old.send(OperationMessage::from_raw("stale")));
        assert!(new.send(OperationMessage::from_raw("fresh")));

        assert!(first.lock().is_empty());
        assert_eq!(*second.lock(), vec!["fresh".to_string()]);
        assert!(!old.is_bound());
        assert!(old.query_params().is_none());
    }

    #[test]
    fn test_context_requires_matching_session() {
        let messenger = Messenger::new();
        assert!(matches!(
            messenger.context(SessionId::new(1)),
            Err(WorkerError::ChannelNotInitialized(_))
        ));
        messenger.install(recording_context(1, Arc::new(Mutex::new(Vec::new()))));
        assert!(messenger.context(SessionId::new(1)).is_ok());
        assert!(messenger.context(SessionId::new(2)).is_err());
    }

    #[test]
    fn test_clear_if_only_clears_owner() {
        let messenger = Messenger::new();
        messenger.install(recording_context(5, Arc::new(Mutex::new(Vec::new()))));
        assert!(!messenger.clear_if(SessionId::new(4)));
        assert_eq!(messenger.active(), Some(SessionId::new(5)));
        assert!(messenger.clear_if(SessionId::new(5)));
        assert_eq!(messenger.active(), None);
    }
}
