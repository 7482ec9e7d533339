//! # chat-core
//!
//! Pure logic for livechat (no I/O, instant tests).
//!
//! This crate implements the state machine and algorithms for message
//! synchronization without any network I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (WebSocket, HTTP) is performed by `chat-client`, which
//! interprets the actions produced by these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod history;
pub mod state;
pub mod store;

pub use history::{normalize, parse_history, HistoryPage};
pub use state::{Action, Backoff, ConnectionState, ConnectionStatus, Event, ReconnectPolicy};
pub use store::{MergeOutcome, MessageStore};
