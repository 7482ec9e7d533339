//! Error types shared across livechat crates.

use thiserror::Error;

/// A message payload that cannot be accepted.
///
/// Raised per message: one malformed message never aborts the batch it
/// arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidMessage {
    /// A required field is absent or has the wrong JSON type.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A required text field is empty or whitespace-only.
    #[error("empty field: {0}")]
    EmptyField(&'static str),

    /// The timestamp is not an ISO-8601 date-time.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// The payload is not a JSON object.
    #[error("not an object")]
    NotAnObject,
}

/// Errors from loading the history snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network failure, timeout, or a non-2xx response.
    #[error("history endpoint unreachable: {0}")]
    Unreachable(String),

    /// A 2xx response whose body is not one of the accepted shapes.
    #[error("unexpected response shape: {0}")]
    UnexpectedShape(String),
}

/// Errors from sending a message through the live channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The channel is not in the `Connected` state.
    #[error("not connected")]
    NotConnected,

    /// The transport or the hub refused the invocation.
    #[error("send rejected: {0}")]
    Rejected(String),

    /// Content is empty or whitespace-only.
    #[error("message content is empty")]
    EmptyContent,
}

/// Hub protocol framing or decoding failure.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON.
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The frame lacks the `type` discriminator or a required field.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The server refused the handshake.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
}

/// Errors constructing a session identity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The username is empty after trimming.
    #[error("username cannot be empty")]
    Empty,
}
