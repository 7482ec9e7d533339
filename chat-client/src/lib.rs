//! # chat-client
//!
//! Real-time message synchronization for livechat clients.
//!
//! This is the library that chat front-ends embed. It keeps a local,
//! ordered, deduplicated view of a chat room by merging a one-shot history
//! snapshot with messages pushed over a live hub connection.
//!
//! ## Features
//!
//! - **Snapshot + Live Merge**: History and pushed messages converge on one view
//! - **Automatic Reconnect**: Policy-driven backoff after a dropped connection
//! - **Transport Abstraction**: Pluggable transport layer (WebSocket, mock)
//! - **Pure State Machine**: Uses chat-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use livechat_client::{ChatConfig, HttpHistory, MemoryIdentityStore, Synchronizer, WebSocketTransport};
//! use livechat_types::Identity;
//!
//! let config = ChatConfig::load("livechat.toml")?;
//! let session = Synchronizer::start(
//!     Identity::new("alice")?,
//!     &config,
//!     WebSocketTransport::with_config(config.transport_config()),
//!     HttpHistory::new(config.history_url(), config.request_timeout())?,
//!     Arc::new(MemoryIdentityStore::new()),
//! )
//! .await?;
//!
//! session.dispatcher().dispatch("hello").await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod identity;
pub mod snapshot;
pub mod sync;
pub mod transport;

pub use channel::{ChannelConfig, LiveChannel};
pub use config::{ChatConfig, ConfigError};
pub use dispatcher::OutboundDispatcher;
pub use identity::{IdentityStore, MemoryIdentityStore};
pub use snapshot::{HistorySource, HttpHistory, MockHistory, SnapshotLoader};
pub use sync::{Session, SessionError, SessionEvent, SnapshotState, Synchronizer};
pub use transport::{
    websocket_url, MockTransport, Transport, TransportError, WebSocketTransport,
    WebSocketTransportConfig,
};
