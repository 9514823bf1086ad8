//! Conversation sessions.
//!
//! This module provides the session layer for direct messaging: canonical
//! conversation addressing, the single-session lifecycle, routing of inbound
//! events and dispatch of outbound messages.

pub mod addressing;
pub mod context;
pub mod dispatcher;
pub mod manager;
pub mod router;

pub use addressing::*;
pub use context::*;
pub use dispatcher::{send, SendOutcome, SkipReason};
pub use manager::*;
pub use router::*;
