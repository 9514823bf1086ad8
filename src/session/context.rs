//! Explicit session state threaded through the router and dispatcher.

use crate::identity::{Identity, Participant};
use crate::session::ConversationKey;
use crate::transport::{MessageEvent, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The single live session: one conversation, one transport handle, and the
/// message log scoped to it. Dropping it discards the log.
#[derive(Debug)]
pub struct ActiveSession<H> {
    id: SessionId,
    key: ConversationKey,
    peer: Participant,
    handle: H,
    log: Vec<MessageEvent>,
    opened_at: DateTime<Utc>,
}

impl<H> ActiveSession<H> {
    pub(crate) fn new(id: SessionId, key: ConversationKey, peer: Participant, handle: H) -> Self {
        Self {
            id,
            key,
            peer,
            handle,
            log: Vec::new(),
            opened_at: Utc::now(),
        }
    }

    /// Session identifier
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Conversation this session is bound to
    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    /// The remote participant
    pub fn peer(&self) -> &Participant {
        &self.peer
    }

    /// Messages received in this session, in arrival order
    pub fn messages(&self) -> &[MessageEvent] {
        &self.log
    }

    /// When the session became active
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub(crate) fn handle_mut(&mut self) -> &mut H {
        &mut self.handle
    }

    pub(crate) fn append(&mut self, message: MessageEvent) {
        self.log.push(message);
    }

    pub(crate) fn into_handle(self) -> H {
        self.handle
    }

    /// Snapshot of the session for display
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.id.0,
            room_key: self.key.to_string(),
            peer_id: self.peer.id.to_string(),
            messages_received: self.log.len(),
            opened_at: self.opened_at,
        }
    }
}

/// Session statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Session identifier
    pub session_id: u64,
    /// Conversation key
    pub room_key: String,
    /// Remote participant id
    pub peer_id: String,
    /// Number of messages in the log
    pub messages_received: usize,
    /// When the session became active
    pub opened_at: DateTime<Utc>,
}

/// Identity and active session, owned by the session manager
#[derive(Debug)]
pub struct SessionContext<H> {
    identity: Option<Identity>,
    active: Option<ActiveSession<H>>,
}

impl<H> Default for SessionContext<H> {
    fn default() -> Self {
        Self {
            identity: None,
            active: None,
        }
    }
}

impl<H> SessionContext<H> {
    /// The local identity, if authenticated
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// The active session, if any
    pub fn active(&self) -> Option<&ActiveSession<H>> {
        self.active.as_ref()
    }

    /// Whether `session` is the one currently active
    pub fn is_current(&self, session: SessionId) -> bool {
        self.active.as_ref().is_some_and(|active| active.id == session)
    }

    /// The active session, only if it is `session`
    pub(crate) fn current_mut(&mut self, session: SessionId) -> Option<&mut ActiveSession<H>> {
        self.active.as_mut().filter(|active| active.id == session)
    }

    pub(crate) fn active_mut(&mut self) -> Option<&mut ActiveSession<H>> {
        self.active.as_mut()
    }

    pub(crate) fn set_identity(&mut self, identity: Option<Identity>) {
        self.identity = identity;
    }

    pub(crate) fn install(&mut self, session: ActiveSession<H>) {
        debug_assert!(self.active.is_none(), "previous session must be closed first");
        self.active = Some(session);
    }

    pub(crate) fn take_active(&mut self) -> Option<ActiveSession<H>> {
        self.active.take()
    }
}
