//! In-process transport for testing and local demos.
//!
//! This provides a transport without any networking: every open, emit and
//! close is recorded in a shared [`TransportLog`], and inbound events can be
//! pushed by hand into the delivery channel.

use crate::identity::UserId;
use crate::session::ConversationKey;
use crate::transport::{Connector, Delivery, InboundEvent, OutboundEvent, SessionId, TransportHandle};
use crate::utils::{Result, TransportError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// One observable transport action
#[derive(Debug, Clone, PartialEq)]
pub enum TransportRecord {
    /// A connection was opened
    Opened {
        /// Session that owns the connection
        session: SessionId,
        /// Conversation the connection is bound to
        room_key: ConversationKey,
        /// Local user
        user_id: UserId,
    },
    /// An event was emitted on a connection
    Emitted {
        /// Emitting session
        session: SessionId,
        /// The event
        event: OutboundEvent,
    },
    /// A connection was released
    Closed {
        /// Session that owned the connection
        session: SessionId,
    },
}

/// Ordered record of everything the memory transport did
#[derive(Debug, Clone, Default)]
pub struct TransportLog {
    records: Arc<Mutex<Vec<TransportRecord>>>,
}

impl TransportLog {
    async fn push(&self, record: TransportRecord) {
        self.records.lock().await.push(record);
    }

    /// Snapshot of all records in order
    pub async fn records(&self) -> Vec<TransportRecord> {
        self.records.lock().await.clone()
    }

    /// Events emitted across all sessions, in order
    pub async fn emitted(&self) -> Vec<OutboundEvent> {
        self.records
            .lock()
            .await
            .iter()
            .filter_map(|record| match record {
                TransportRecord::Emitted { event, .. } => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of connections opened so far
    pub async fn opens(&self) -> usize {
        self.count(|r| matches!(r, TransportRecord::Opened { .. })).await
    }

    /// Number of connections closed so far
    pub async fn closes(&self) -> usize {
        self.count(|r| matches!(r, TransportRecord::Closed { .. })).await
    }

    /// Sessions whose connection is currently open
    pub async fn open_sessions(&self) -> Vec<SessionId> {
        let records = self.records.lock().await;
        let mut open = Vec::new();
        for record in records.iter() {
            match record {
                TransportRecord::Opened { session, .. } => open.push(*session),
                TransportRecord::Closed { session } => open.retain(|s| s != session),
                TransportRecord::Emitted { .. } => {}
            }
        }
        open
    }

    async fn count(&self, predicate: impl Fn(&TransportRecord) -> bool) -> usize {
        self.records.lock().await.iter().filter(|r| predicate(r)).count()
    }
}

/// Connector producing [`MemoryHandle`]s
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    log: TransportLog,
    deliveries: mpsc::UnboundedSender<Delivery>,
    fail_opens: Arc<AtomicBool>,
    fail_emits: Arc<AtomicBool>,
}

impl MemoryConnector {
    /// Create a connector that pushes inbound events into `deliveries`
    pub fn new(deliveries: mpsc::UnboundedSender<Delivery>) -> Self {
        Self {
            log: TransportLog::default(),
            deliveries,
            fail_opens: Arc::new(AtomicBool::new(false)),
            fail_emits: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared log of transport activity
    pub fn log(&self) -> TransportLog {
        self.log.clone()
    }

    /// Make subsequent opens fail (or succeed again)
    pub fn set_fail_opens(&self, fail: bool) {
        self.fail_opens.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent emits fail (or succeed again)
    pub fn set_fail_emits(&self, fail: bool) {
        self.fail_emits.store(fail, Ordering::SeqCst);
    }

    /// Push an event as if the server sent it on the given session's
    /// connection. Works for closed sessions too, which models a delivery
    /// that was already in flight when the connection went away.
    pub fn push(&self, session: SessionId, event: InboundEvent) {
        if self.deliveries.send(Delivery { session, event }).is_err() {
            log::debug!("Delivery channel closed, dropping inbound event");
        }
    }

    /// Push an event on the most recently opened connection that is still
    /// open. Returns false when no connection is open.
    pub async fn deliver(&self, event: InboundEvent) -> bool {
        match self.log.open_sessions().await.last() {
            Some(session) => {
                self.push(*session, event);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Handle = MemoryHandle;

    async fn open(
        &self,
        session: SessionId,
        room_key: &ConversationKey,
        user_id: &UserId,
    ) -> Result<MemoryHandle> {
        if self.fail_opens.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed {
                url: "memory://".to_string(),
                reason: "open refused".to_string(),
            }
            .into());
        }

        log::debug!("Opening memory transport for {} in room {}", session, room_key);
        self.log
            .push(TransportRecord::Opened {
                session,
                room_key: room_key.clone(),
                user_id: user_id.clone(),
            })
            .await;

        Ok(MemoryHandle {
            session,
            log: self.log.clone(),
            fail_emits: Arc::clone(&self.fail_emits),
            closed: false,
        })
    }
}

/// Handle for a memory transport connection
#[derive(Debug)]
pub struct MemoryHandle {
    session: SessionId,
    log: TransportLog,
    fail_emits: Arc<AtomicBool>,
    closed: bool,
}

#[async_trait]
impl TransportHandle for MemoryHandle {
    fn session_id(&self) -> SessionId {
        self.session
    }

    async fn emit(&mut self, event: OutboundEvent) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed {
                session: self.session.0,
            }
            .into());
        }
        if self.fail_emits.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed {
                reason: "emit refused".to_string(),
            }
            .into());
        }

        log::debug!("{} emitting {}", self.session, event.name());
        self.log
            .push(TransportRecord::Emitted {
                session: self.session,
                event,
            })
            .await;
        Ok(())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.log
            .push(TransportRecord::Closed {
                session: self.session,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::room_key;

    #[tokio::test]
    async fn test_records_lifecycle_in_order() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connector = MemoryConnector::new(tx);
        let key = room_key(&UserId::numeric(1), &UserId::numeric(2)).unwrap();

        let mut handle = connector
            .open(SessionId(1), &key, &UserId::numeric(1))
            .await
            .unwrap();
        handle
            .emit(OutboundEvent::join(key.clone(), UserId::numeric(1)))
            .await
            .unwrap();
        handle.close().await;
        handle.close().await;

        let log = connector.log();
        assert_eq!(log.opens().await, 1);
        assert_eq!(log.closes().await, 1);
        assert_eq!(log.emitted().await.len(), 1);
        assert!(log.open_sessions().await.is_empty());
        assert!(handle.emit(OutboundEvent::join(key, UserId::numeric(1))).await.is_err());
    }

    #[tokio::test]
    async fn test_deliver_targets_open_session() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connector = MemoryConnector::new(tx);
        let notification = InboundEvent::Notification(crate::transport::NotificationEvent {
            recipient_id: UserId::numeric(1),
            payload: serde_json::Value::Null,
        });

        assert!(!connector.deliver(notification.clone()).await);

        let key = room_key(&UserId::numeric(1), &UserId::numeric(2)).unwrap();
        let _handle = connector
            .open(SessionId(4), &key, &UserId::numeric(1))
            .await
            .unwrap();
        assert!(connector.deliver(notification).await);
        assert_eq!(rx.recv().await.unwrap().session, SessionId(4));
    }

    #[test]
    fn test_open_failure() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connector = MemoryConnector::new(tx);
        connector.set_fail_opens(true);
        let key = room_key(&UserId::numeric(1), &UserId::numeric(2)).unwrap();

        tokio_test::block_on(async {
            tokio_test::assert_err!(connector.open(SessionId(1), &key, &UserId::numeric(1)).await);
            assert_eq!(connector.log().opens().await, 0);
        });
    }
}
