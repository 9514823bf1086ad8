//! # Direct Messenger
//!
//! Real-time one-to-one messaging session layer for a social network client.
//!
//! A local user, identified by a bearer credential, opens a conversation with
//! one peer at a time. Every conversation is bound to a canonical room key
//! derived from the two user ids, carried over a dedicated WebSocket
//! connection, and owns the ordered log of messages received on it.
//!
//! ## Features
//!
//! - **Identity**: user id resolution from a signed bearer token
//! - **Canonical Addressing**: order-independent conversation keys
//! - **Single Active Session**: close-before-open switching with stale event rejection
//! - **Routing**: messages to the active log, notifications to a separate list
//! - **Pluggable Transport**: WebSocket connector and an in-memory connector for tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use direct_messenger::{
//!     directory::HttpDirectory,
//!     identity::{Credential, UserId},
//!     transport::WebSocketConnector,
//!     ChatClient, ClientEvent, MessengerConfig,
//! };
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MessengerConfig::default();
//!     let token = std::env::var("MESSENGER_TOKEN")?;
//!
//!     let (deliveries_tx, deliveries_rx) = mpsc::unbounded_channel();
//!     let connector = WebSocketConnector::new(
//!         config.server.socket_url.clone(),
//!         deliveries_tx,
//!         config.session.outbound_queue_size,
//!     );
//!     let directory = HttpDirectory::new(
//!         config.server.api_base_url.clone(),
//!         Credential::new(token.clone()),
//!         &config.directory,
//!     )?;
//!
//!     let mut client = ChatClient::new(connector, directory, deliveries_rx, config.session.event_queue_size);
//!     client.authenticate(Some(&token)).await?;
//!
//!     let events = client.sender();
//!     events.send(ClientEvent::SelectPeer(UserId::numeric(2))).await?;
//!     client.run().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`identity`]: credentials, user ids and participant profiles
//! - [`session`]: addressing, lifecycle, inbound routing and outbound dispatch
//! - [`transport`]: wire protocol and connection implementations
//! - [`directory`]: participant lookup over the REST API
//! - [`app`]: the event loop that owns all mutable state
//! - [`utils`]: configuration and error handling

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod app;
pub mod directory;
pub mod identity;
pub mod session;
pub mod transport;
pub mod utils;

// Re-export commonly used types for convenience
pub use app::{ChatClient, ClientEvent, ClientUpdate};
pub use identity::{Identity, Participant, UserId};
pub use session::{room_key, ConversationKey, SessionManager};
pub use transport::{Connector, InboundEvent, OutboundEvent, SessionId, TransportHandle};
pub use utils::{MessengerConfig, MessengerError, Result};

/// Default configuration values
pub mod defaults {
    /// Default REST base for participant lookups
    pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api/posts";

    /// Default WebSocket endpoint
    pub const DEFAULT_SOCKET_URL: &str = "ws://localhost:5000";

    /// Default directory request timeout in seconds
    pub const DEFAULT_REQUEST_TIMEOUT: u64 = 10;

    /// Default transport connect timeout in seconds
    pub const DEFAULT_CONNECT_TIMEOUT: u64 = 10;
}
