//! Classification of inbound transport events.
//!
//! Messages go to the active session's log, and only when they arrived on
//! that session's connection. Notifications go to a list that outlives
//! conversation switches. Every delivered event is appended at most once,
//! in delivery order; nothing is reordered, merged or deduplicated.

use crate::session::SessionContext;
use crate::transport::{Delivery, InboundEvent, NotificationEvent, SessionId};

/// Why an inbound event was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// No session is active
    NoActiveSession,
    /// The event arrived on a session that is no longer active
    StaleSession(SessionId),
}

/// What the router did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Appended to the active session's message log
    Message,
    /// Appended to the notification list
    Notification,
    /// Dropped without effect
    Discarded(DiscardReason),
}

/// Routes deliveries into the message log or the notification list
#[derive(Debug, Default)]
pub struct Router {
    notifications: Vec<NotificationEvent>,
}

impl Router {
    /// Create a router with no notifications
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications received so far, in arrival order
    pub fn notifications(&self) -> &[NotificationEvent] {
        &self.notifications
    }

    /// Forget all notifications (the identity they belonged to is gone)
    pub fn clear_notifications(&mut self) {
        self.notifications.clear();
    }

    /// Route one delivery
    pub fn on_transport_event<H>(&mut self, context: &mut SessionContext<H>, delivery: Delivery) -> Routed {
        let Delivery { session, event } = delivery;

        match event {
            InboundEvent::Notification(notification) => {
                log::debug!("Notification for {} via {}", notification.recipient_id, session);
                self.notifications.push(notification);
                Routed::Notification
            }
            InboundEvent::Message(message) => {
                let active_id = context.active().map(|active| active.id());
                let Some(active) = context.current_mut(session) else {
                    let reason = match active_id {
                        Some(_) => DiscardReason::StaleSession(session),
                        None => DiscardReason::NoActiveSession,
                    };
                    log::debug!("Discarding message from {} on {}: {:?}", message.sender_id, session, reason);
                    return Routed::Discarded(reason);
                };

                if !message.room_key.is_empty() && message.room_key != active.key().as_str() {
                    log::warn!(
                        "{} received message for room {} while in {}",
                        session,
                        message.room_key,
                        active.key()
                    );
                }

                active.append(message);
                Routed::Message
            }
        }
    }
}
