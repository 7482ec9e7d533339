//! Message store for livechat.
//!
//! This module provides the ordered, deduplicated message view with:
//! - Timestamp ordering (ties keep arrival order)
//! - Deduplication by transport id, or by (sender, content, timestamp) for id-less messages
//! - Append-only growth (there is no removal operation)
//!
//! Snapshot batches and live messages both flow through [`MessageStore::merge`],
//! so the order in which the two sources arrive does not matter.

use std::collections::HashSet;
use livechat_types::{ChatMessage, DedupKey, InvalidMessage};

/// Result of a single merge call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Messages that were not present before, in the order they were inserted.
    pub inserted: Vec<ChatMessage>,
    /// Messages refused for failing validation.
    pub rejected: Vec<InvalidMessage>,
    /// Number of messages dropped as duplicates.
    pub duplicates: usize,
}

impl MergeOutcome {
    /// True if the merge changed the view.
    pub fn changed(&self) -> bool {
        !self.inserted.is_empty()
    }
}

/// Ordered message view with dedup tracking.
///
/// Ids and tuples are separate identity spaces: a message carrying an id is
/// a duplicate only of a message with the same id, and a message without
/// one only of an id-less message with the same tuple. The resulting view
/// does not depend on merge order.
#[derive(Debug, Default)]
pub struct MessageStore {
    /// The exposed view, sorted by timestamp ascending.
    messages: Vec<ChatMessage>,
    /// Dedup identities seen, see [`ChatMessage::dedup_key`].
    keys: HashSet<DedupKey>,
}

impl MessageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a batch of messages from either source.
    ///
    /// Invalid messages are rejected individually; duplicates (against the
    /// store and within the batch) are skipped. Only new messages are returned.
    pub fn merge<I>(&mut self, batch: I) -> MergeOutcome
    where
        I: IntoIterator<Item = ChatMessage>,
    {
        let mut outcome = MergeOutcome::default();

        for message in batch {
            if let Err(err) = message.validate() {
                outcome.rejected.push(err);
                continue;
            }
            if !self.keys.insert(message.dedup_key()) {
                outcome.duplicates += 1;
                continue;
            }
            self.insert_ordered(message.clone());
            outcome.inserted.push(message);
        }

        outcome
    }

    fn insert_ordered(&mut self, message: ChatMessage) {
        // Upper bound: equal timestamps land after existing ones.
        let pos = self
            .messages
            .partition_point(|existing| existing.timestamp <= message.timestamp);
        if pos == self.messages.len() {
            self.messages.push(message);
        } else {
            self.messages.insert(pos, message);
        }
    }

    /// Check whether a dedup identity is already present.
    pub fn contains(&self, key: &DedupKey) -> bool {
        self.keys.contains(key)
    }

    /// The ordered view.
    pub fn view(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// The most recent message, if any.
    pub fn latest(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Number of messages in the view.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if the view is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
