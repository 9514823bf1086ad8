//! Session lifecycle management.
//!
//! The manager owns at most one transport session at a time. Selecting a new
//! conversation closes the previous session completely before the next one is
//! opened, so two connections are never bound to the local identity at once.
//!
//! ```text
//! Idle -> Connecting -> Active -> Closing -> Idle
//! ```
//!
//! Directory lookups that precede a selection are tracked with a monotonically
//! increasing [`LookupToken`]; only the latest token may complete.

use crate::identity::{resolve, Identity, Participant, UserId};
use crate::session::{room_key, ActiveSession, SessionContext, SessionStats};
use crate::transport::{Connector, OutboundEvent, SessionId, TransportHandle};
use crate::utils::{MessengerError, Result, SessionError};
use std::fmt;

/// Lifecycle phase of the session manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No transport session
    Idle,
    /// Session open issued, handle not yet live
    Connecting,
    /// Session accepts inbound events and outbound sends
    Active,
    /// Previous session being released
    Closing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Ticket for one in-flight directory lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LookupToken(u64);

/// Result of a conversation selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// The peer was already active; nothing was reopened
    Unchanged(SessionId),
    /// A new session was opened
    Opened(SessionId),
}

impl Selection {
    /// Session that is active after the selection
    pub fn session_id(self) -> SessionId {
        match self {
            Self::Unchanged(id) | Self::Opened(id) => id,
        }
    }
}

#[derive(Debug, Default)]
struct LookupTracker {
    issued: u64,
    pending: Option<(LookupToken, UserId)>,
}

impl LookupTracker {
    fn begin(&mut self, peer_id: UserId) -> LookupToken {
        self.issued += 1;
        let token = LookupToken(self.issued);
        if let Some((_, superseded)) = self.pending.replace((token, peer_id)) {
            log::debug!("Lookup for {} superseded", superseded);
        }
        token
    }

    fn take_if_current(&mut self, token: LookupToken) -> Option<UserId> {
        match &self.pending {
            Some((pending, _)) if *pending == token => self.pending.take().map(|(_, id)| id),
            _ => None,
        }
    }

    fn cancel(&mut self) {
        self.pending = None;
    }
}

/// Owner of the single transport session
pub struct SessionManager<C: Connector> {
    connector: C,
    context: SessionContext<C::Handle>,
    phase: Phase,
    last_session: SessionId,
    lookups: LookupTracker,
}

impl<C: Connector> SessionManager<C> {
    /// Create an idle manager without an identity
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            context: SessionContext::default(),
            phase: Phase::Idle,
            last_session: SessionId(0),
            lookups: LookupTracker::default(),
        }
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Shared session state
    pub fn context(&self) -> &SessionContext<C::Handle> {
        &self.context
    }

    /// Mutable session state for the router and dispatcher
    pub fn context_mut(&mut self) -> &mut SessionContext<C::Handle> {
        &mut self.context
    }

    /// The connector sessions are opened with
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// The local identity, if any
    pub fn identity(&self) -> Option<&Identity> {
        self.context.identity()
    }

    /// Resolve and install the local identity from a credential.
    ///
    /// On failure the identity is cleared, which also tears down any active
    /// session.
    pub async fn authenticate(&mut self, credential: Option<&str>) -> Result<&Identity> {
        match resolve(credential) {
            Ok(identity) => {
                self.set_identity(Some(identity)).await;
                self.context
                    .identity()
                    .ok_or_else(|| SessionError::Unauthenticated.into())
            }
            Err(e) => {
                log::warn!("Credential rejected: {}", e);
                self.set_identity(None).await;
                Err(e)
            }
        }
    }

    /// Replace the local identity. A different user (or none) invalidates the
    /// active session, which is torn down first.
    pub async fn set_identity(&mut self, identity: Option<Identity>) {
        let same_user = match (self.context.identity(), identity.as_ref()) {
            (Some(current), Some(next)) => current.user_id == next.user_id,
            (None, None) => true,
            _ => false,
        };
        if !same_user {
            self.teardown().await;
        }
        self.context.set_identity(identity);
    }

    /// Register interest in resolving `peer_id`. Any earlier lookup that has
    /// not completed yet is superseded.
    pub fn begin_lookup(&mut self, peer_id: UserId) -> LookupToken {
        self.lookups.begin(peer_id)
    }

    /// Apply the result of a directory lookup.
    ///
    /// A result for a superseded or cancelled token is discarded with a
    /// stale-event error and has no effect.
    pub async fn complete_lookup(
        &mut self,
        token: LookupToken,
        result: Result<Participant>,
    ) -> Result<Selection> {
        let requested = self
            .lookups
            .take_if_current(token)
            .ok_or_else(|| MessengerError::stale("directory lookup"))?;

        let peer = result.map_err(|e| {
            log::debug!("Lookup for {} failed: {}", requested, e);
            SessionError::PeerUnresolved {
                peer_id: requested.to_string(),
            }
        })?;

        if peer.id != requested {
            log::warn!("Directory answered {} for requested {}", peer.id, requested);
        }

        self.select_conversation(peer).await
    }

    /// Make `peer` the active conversation.
    ///
    /// Selecting the already-active peer is a no-op. Otherwise the current
    /// session is closed, then a session for the new conversation key is
    /// opened and joined with an empty message log.
    pub async fn select_conversation(&mut self, peer: Participant) -> Result<Selection> {
        self.lookups.cancel();

        let user_id = match self.context.identity() {
            Some(identity) => identity.user_id.clone(),
            None => {
                log::warn!("Cannot start conversation with {}: not authenticated", peer.id);
                return Err(SessionError::Unauthenticated.into());
            }
        };

        if let Some(active) = self.context.active() {
            if active.peer().id == peer.id {
                log::debug!("{} already active for {}", active.id(), peer.id);
                return Ok(Selection::Unchanged(active.id()));
            }
        }

        let key = room_key(&user_id, &peer.id)?;

        self.close_active().await;

        self.phase = Phase::Connecting;
        let session = self.last_session.next();
        self.last_session = session;

        let mut handle = match self.connector.open(session, &key, &user_id).await {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("Failed to open {} for room {}: {}", session, key, e);
                self.phase = Phase::Idle;
                return Err(e);
            }
        };

        if let Err(e) = handle.emit(OutboundEvent::join(key.clone(), user_id)).await {
            log::error!("Failed to join room {} on {}: {}", key, session, e);
            handle.close().await;
            self.phase = Phase::Idle;
            return Err(e);
        }

        log::info!("{} active in room {} with {}", session, key, peer);
        self.context
            .install(ActiveSession::new(session, key, peer, handle));
        self.phase = Phase::Active;

        Ok(Selection::Opened(session))
    }

    /// Close the active session and cancel pending lookups. Always permitted;
    /// a no-op when already idle.
    pub async fn teardown(&mut self) {
        self.lookups.cancel();
        self.close_active().await;
    }

    /// Statistics for the active session
    pub fn stats(&self) -> Option<SessionStats> {
        self.context.active().map(ActiveSession::stats)
    }

    async fn close_active(&mut self) {
        if let Some(active) = self.context.take_active() {
            self.phase = Phase::Closing;
            let session = active.id();
            let mut handle = active.into_handle();
            handle.close().await;
            log::info!("{} closed", session);
        }
        self.phase = Phase::Idle;
    }
}

impl<C: Connector> fmt::Debug for SessionManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("phase", &self.phase)
            .field("last_session", &self.last_session)
            .field("active", &self.context.active().map(|a| a.id()))
            .finish()
    }
}
