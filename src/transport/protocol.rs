//! Wire protocol definitions and serialization.
//!
//! Every frame on the real-time channel is a JSON text message of the form
//! `{"event": <name>, "data": {...}}`. Inbound frames are validated at this
//! boundary: an unknown event name or a payload of the wrong shape is
//! rejected rather than guessed at.

use crate::identity::UserId;
use crate::session::ConversationKey;
use crate::transport::SessionId;
use crate::utils::{ProtocolError, Result};
use serde::{Deserialize, Serialize};

/// Maximum frame size accepted or produced (1MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Inbound event names
pub mod names {
    /// Chat message pushed into a room
    pub const MESSAGE: &str = "message";
    /// Out-of-band user notification
    pub const NOTIFICATION: &str = "notification";
    /// Legacy name the backend uses for notifications
    pub const NOTIFY_USER: &str = "notifyUser";
    /// Room join request
    pub const JOIN_ROOM: &str = "joinRoom";
    /// Outbound chat message
    pub const CHAT_MESSAGE: &str = "chatMessage";
}

/// A chat message pushed by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    /// Room the server delivered the message in
    #[serde(default, alias = "roomId")]
    pub room_key: String,
    /// Author of the message
    pub sender_id: UserId,
    /// Addressee of the message
    pub recipient_id: UserId,
    /// Message text
    #[serde(alias = "message")]
    pub body: String,
    /// Author's display name
    #[serde(default, alias = "senderName")]
    pub sender_display_name: String,
    /// Author's avatar reference
    #[serde(default, alias = "senderProfilePic")]
    pub sender_avatar_ref: String,
}

/// An out-of-band notification for the local user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    /// User the notification is for
    pub recipient_id: UserId,
    /// Opaque notification body
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Events the server pushes to the client
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Conversation message
    Message(MessageEvent),
    /// User notification
    Notification(NotificationEvent),
}

/// Events the client sends to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum OutboundEvent {
    /// Join the room for a conversation; sent once per session open
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        /// Conversation to join
        room_key: ConversationKey,
        /// Local user
        user_id: UserId,
    },
    /// Post a message into a conversation
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        /// Conversation the message belongs to
        room_key: ConversationKey,
        /// Message text
        message: String,
        /// Local user
        sender_id: UserId,
        /// Peer the message is for
        recipient_id: UserId,
    },
}

/// An inbound event tagged with the session whose connection delivered it
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Session the event arrived on
    pub session: SessionId,
    /// The decoded event
    pub event: InboundEvent,
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl InboundEvent {
    /// Decode an inbound text frame
    pub fn from_frame(text: &str) -> Result<Self> {
        if text.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: text.len(),
                max: MAX_FRAME_SIZE,
            }
            .into());
        }

        let raw: RawFrame = serde_json::from_str(text).map_err(|e| ProtocolError::InvalidEvent {
            event: "frame".to_string(),
            reason: e.to_string(),
        })?;

        match raw.event.as_str() {
            names::MESSAGE => serde_json::from_value(raw.data)
                .map(Self::Message)
                .map_err(|e| invalid(names::MESSAGE, e)),
            names::NOTIFICATION | names::NOTIFY_USER => serde_json::from_value(raw.data)
                .map(Self::Notification)
                .map_err(|e| invalid(names::NOTIFICATION, e)),
            other => Err(ProtocolError::UnknownEvent {
                name: other.to_string(),
            }
            .into()),
        }
    }

    /// Event name as used on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Self::Message(_) => names::MESSAGE,
            Self::Notification(_) => names::NOTIFICATION,
        }
    }

    /// Encode as a text frame (used by the in-memory transport and tests)
    pub fn to_frame(&self) -> Result<String> {
        let data = match self {
            Self::Message(message) => serde_json::to_value(message)?,
            Self::Notification(notification) => serde_json::to_value(notification)?,
        };
        Ok(serde_json::json!({ "event": self.name(), "data": data }).to_string())
    }
}

impl OutboundEvent {
    /// Build the join event for a session
    pub fn join(room_key: ConversationKey, user_id: UserId) -> Self {
        Self::JoinRoom { room_key, user_id }
    }

    /// Build a chat message event
    pub fn chat(
        room_key: ConversationKey,
        message: impl Into<String>,
        sender_id: UserId,
        recipient_id: UserId,
    ) -> Self {
        Self::ChatMessage {
            room_key,
            message: message.into(),
            sender_id,
            recipient_id,
        }
    }

    /// Event name as used on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => names::JOIN_ROOM,
            Self::ChatMessage { .. } => names::CHAT_MESSAGE,
        }
    }

    /// Conversation this event is addressed to
    pub fn room_key(&self) -> &ConversationKey {
        match self {
            Self::JoinRoom { room_key, .. } | Self::ChatMessage { room_key, .. } => room_key,
        }
    }

    /// Encode as a text frame
    pub fn to_frame(&self) -> Result<String> {
        let frame = serde_json::to_string(self)?;
        if frame.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: frame.len(),
                max: MAX_FRAME_SIZE,
            }
            .into());
        }
        Ok(frame)
    }
}

fn invalid(event: &str, err: serde_json::Error) -> crate::utils::MessengerError {
    ProtocolError::InvalidEvent {
        event: event.to_string(),
        reason: err.to_string(),
    }
    .into()
}
