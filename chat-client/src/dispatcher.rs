//! Outbound message dispatch.

use livechat_types::{Identity, SendError};

use crate::channel::LiveChannel;
use crate::transport::Transport;

/// Sends user-authored messages under the session identity.
///
/// Nothing is added to the local view here: the hub echoes every published
/// message to all clients, the author included, and that echo is what lands
/// in the store.
pub struct OutboundDispatcher<T: Transport> {
    channel: LiveChannel<T>,
    sender: Identity,
}

impl<T: Transport> Clone for OutboundDispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            sender: self.sender.clone(),
        }
    }
}

impl<T: Transport> OutboundDispatcher<T> {
    /// Bind a dispatcher to a channel and identity.
    pub fn new(channel: LiveChannel<T>, sender: Identity) -> Self {
        Self { channel, sender }
    }

    /// The identity messages are sent as.
    pub fn sender(&self) -> &Identity {
        &self.sender
    }

    /// Publish `content`.
    ///
    /// Whitespace-only content is refused without reaching the channel.
    pub async fn dispatch(&self, content: &str) -> Result<(), SendError> {
        if content.trim().is_empty() {
            return Err(SendError::EmptyContent);
        }
        self.channel.send(self.sender.as_str(), content).await
    }
}
