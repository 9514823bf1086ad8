//! Error types and handling for the direct messenger.
//!
//! This module provides a unified error handling system across all components
//! of the messenger. Every error can be classified into the small taxonomy the
//! session boundary reacts to (see [`ErrorKind`]).

use thiserror::Error;

/// Result type alias for the messenger library
pub type Result<T> = std::result::Result<T, MessengerError>;

/// Comprehensive error type for all messenger operations
#[derive(Error, Debug, Clone)]
pub enum MessengerError {
    /// Credential and identity errors
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Conversation addressing errors
    #[error("Addressing error: {0}")]
    Addressing(#[from] AddressingError),

    /// Session management errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Directory lookup errors
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// Transport layer errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration and I/O errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Wire protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// How the session boundary treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid credential; blocks session open
    Unauthenticated,
    /// Directory lookup failed; blocks session open silently
    PeerUnresolved,
    /// Session open or send failed; logged, never retried
    TransportUnavailable,
    /// Event or async response no longer matches the active session
    StaleEventDiscarded,
    /// Anything else (configuration, local misuse)
    Other,
}

/// Credential decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// No credential was supplied
    #[error("No credential present")]
    MissingCredential,

    /// Token does not have the header.payload.signature shape
    #[error("Malformed credential: {reason}")]
    Malformed { reason: String },

    /// Payload decoded but carries no usable identifier claim
    #[error("Credential payload has no user identifier")]
    MissingClaim,
}

/// Conversation key derivation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressingError {
    /// One of the participant ids is empty
    #[error("Participant id must not be empty")]
    EmptyId,

    /// A participant id contains the key separator
    #[error("Participant id {id:?} contains the reserved separator {separator:?}")]
    ReservedSeparator { id: String, separator: char },
}

/// Session management errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No identity is available to open a session with
    #[error("Cannot start conversation: not authenticated")]
    Unauthenticated,

    /// The peer could not be resolved through the directory
    #[error("Peer could not be resolved: {peer_id}")]
    PeerUnresolved { peer_id: String },

    /// An async result arrived for a superseded request or session
    #[error("Stale {what} discarded")]
    Stale { what: String },
}

/// Directory lookup errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// Server answered with a non-success status
    #[error("Participant not found: {id} (status {status})")]
    NotFound { id: String, status: u16 },

    /// Request could not be completed or decoded
    #[error("Directory unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Transport layer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection establishment failure
    #[error("Connection to {url} failed: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// The handle has already been closed
    #[error("Transport handle for session {session} is closed")]
    Closed { session: u64 },

    /// Sending a frame failed
    #[error("Send failed: {reason}")]
    SendFailed { reason: String },
}

/// Configuration and setup errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Configuration parsing error
    #[error("Configuration parse error: {reason}")]
    ParseError { reason: String },

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Event name is not one this client understands
    #[error("Unknown event: {name}")]
    UnknownEvent { name: String },

    /// Event payload does not match the expected shape
    #[error("Invalid {event} event: {reason}")]
    InvalidEvent { event: String, reason: String },

    /// Frame too large
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },
}

impl MessengerError {
    /// Classifies this error for the session boundary
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Identity(_) => ErrorKind::Unauthenticated,
            Self::Session(session) => match session {
                SessionError::Unauthenticated => ErrorKind::Unauthenticated,
                SessionError::PeerUnresolved { .. } => ErrorKind::PeerUnresolved,
                SessionError::Stale { .. } => ErrorKind::StaleEventDiscarded,
            },
            Self::Directory(_) => ErrorKind::PeerUnresolved,
            Self::Transport(_) => ErrorKind::TransportUnavailable,
            _ => ErrorKind::Other,
        }
    }

    /// Returns true if the user should see this failure as error text
    pub fn is_user_visible(&self) -> bool {
        self.kind() == ErrorKind::Unauthenticated
    }

    pub(crate) fn stale<S: Into<String>>(what: S) -> Self {
        Self::Session(SessionError::Stale { what: what.into() })
    }
}

impl From<std::io::Error> for MessengerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for MessengerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for DirectoryError {
    fn from(err: reqwest::Error) -> Self {
        Self::Unavailable {
            reason: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for MessengerError {
    fn from(err: reqwest::Error) -> Self {
        Self::Directory(err.into())
    }
}
