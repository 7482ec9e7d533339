//! # chat-types
//!
//! Wire format types for the livechat message synchronization core.
//!
//! This crate provides the foundational types used across all livechat crates:
//! - [`ChatMessage`], [`DedupKey`] - The message value and its identity
//! - [`Identity`] - The local username bound to a session
//! - [`HubMessage`] - Frames of the JSON hub protocol spoken on the push channel
//! - [`FetchError`], [`SendError`], [`InvalidMessage`] - The shared error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
pub mod hub;
mod identity;
mod message;

pub use error::{FetchError, IdentityError, InvalidMessage, ProtocolError, SendError};
pub use hub::{HubMessage, RECORD_SEPARATOR};
pub use identity::{Identity, USERNAME_KEY};
pub use message::{parse_timestamp, ChatMessage, DedupKey, MessageId};
