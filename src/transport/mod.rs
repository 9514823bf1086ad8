//! Transport layer for real-time messaging.
//!
//! A [`Connector`] opens one transport connection per session; the returned
//! [`TransportHandle`] is the only way to emit events on it and to release it.
//! Inbound events are not pulled from the handle: connectors push them, tagged
//! with the owning [`SessionId`], into the channel they were built with.

pub mod memory;
pub mod protocol;
pub mod websocket;

pub use memory::{MemoryConnector, MemoryHandle, TransportLog, TransportRecord};
pub use protocol::*;
pub use websocket::{WebSocketConnector, WebSocketHandle};

use crate::identity::UserId;
use crate::session::ConversationKey;
use crate::utils::Result;
use async_trait::async_trait;
use std::fmt;

/// Identifier of one opened session; strictly increasing per client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl SessionId {
    /// The id following this one
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Opens transport connections bound to a conversation
#[async_trait]
pub trait Connector: Send + Sync {
    /// Live connection type produced by this connector
    type Handle: TransportHandle;

    /// Open a connection for `session`.
    ///
    /// Returns once the connection is live. Joining the room is the caller's
    /// job; the connector only establishes the channel.
    async fn open(
        &self,
        session: SessionId,
        room_key: &ConversationKey,
        user_id: &UserId,
    ) -> Result<Self::Handle>;
}

/// A live transport connection owned by exactly one session
#[async_trait]
pub trait TransportHandle: Send {
    /// Session this handle belongs to
    fn session_id(&self) -> SessionId;

    /// Emit one event on the connection
    async fn emit(&mut self, event: OutboundEvent) -> Result<()>;

    /// Release the connection. Returns after the connection is terminated;
    /// no deliveries for this session are produced afterwards.
    async fn close(&mut self);
}
