//! Transport abstraction for the live channel.
//!
//! This module provides a pluggable transport layer that abstracts
//! the underlying connection mechanism (WebSocket, mock for testing).
//!
//! # Design
//!
//! The transport trait is async and connection-oriented, and deals in hub
//! protocol records (one JSON frame each, terminator stripped on receive):
//! - `connect()` opens the connection and completes the protocol handshake
//! - `send()` transmits one terminated frame
//! - `recv()` returns the next inbound record
//! - `close()` releases the connection
//!
//! Reconnection is not the transport's concern; the live channel calls
//! `connect()` again according to its reconnect policy.
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport.connect("ws://localhost:5132/chathub").await?;
//! transport.send(&HubMessage::Ping.to_frame()).await?;
//! let record = transport.recv().await?;
//! ```

mod mock;
mod websocket;

pub use mock::MockTransport;
pub use websocket::{websocket_url, WebSocketTransport, WebSocketTransportConfig};

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The hub refused or botched the protocol handshake.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,
}

/// Transport trait for exchanging hub protocol frames.
///
/// Implementations handle the underlying connection mechanism
/// (WebSocket, mock, etc). `send` and `recv` may be called concurrently
/// from different tasks.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connect to the hub at the given address and perform the handshake.
    async fn connect(&self, address: &str) -> Result<(), TransportError>;

    /// Send one terminated frame.
    async fn send(&self, frame: &str) -> Result<(), TransportError>;

    /// Receive the next record (terminator stripped).
    ///
    /// Blocks until a record is available or the connection closes.
    async fn recv(&self) -> Result<String, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection. Safe to call when not connected.
    async fn close(&self) -> Result<(), TransportError>;
}
