//! Error taxonomy for the room session. None of these end a session on their
//! own; only an exhausted reconnect policy does.

use shared::domain::MessageId;
use thiserror::Error;

/// Connection drops and failed dials. Triggers the reconnect policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid room endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("failed to connect websocket {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("connection closed: {0}")]
    Closed(String),
    #[error("not connected; dropped outbound {kind} event")]
    NotConnected { kind: &'static str },
}

/// Frames that cannot be decoded. Dropped and logged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("failed to encode {kind} event: {reason}")]
    Encode { kind: &'static str, reason: String },
}

/// Mutations or compose actions that reference something the store cannot
/// act on. Always a no-op.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("unknown message {0}")]
    UnknownMessage(MessageId),
    #[error("message {0} has been deleted")]
    MessageDeleted(MessageId),
    #[error("message {0} was not authored by the local user")]
    NotAuthor(MessageId),
}

/// Upload collaborator failures. Surfaced to the UI; nothing is sent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("upload collaborator is unavailable")]
    Unavailable,
    #[error("upload request failed: {0}")]
    Request(String),
    #[error("upload rejected with status '{0}'")]
    Rejected(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
    #[error("room session has ended")]
    Closed,
}
