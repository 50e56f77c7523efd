use std::collections::{HashSet, VecDeque};

use crate::state::snapshot::ChatMessage;

/// Bounded chat history ordered by emission time.
///
/// Both transports may deliver the same line, so messages are deduplicated on
/// their `(author, body, emitted_at_ms)` triple.
#[derive(Debug, Clone)]
pub struct ChatLog {
    messages: VecDeque<ChatMessage>,
    seen: HashSet<ChatMessage>,
    capacity: usize,
}

impl ChatLog {
    /// Create an empty log keeping at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity.min(256)),
            seen: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Insert a message at its chronological position.
    ///
    /// Returns `false` for duplicates and for messages older than everything
    /// retained once the log is full.
    pub fn insert(&mut self, message: ChatMessage) -> bool {
        if self.seen.contains(&message) {
            return false;
        }
        if self.messages.len() >= self.capacity
            && self
                .messages
                .front()
                .is_some_and(|oldest| message.emitted_at_ms < oldest.emitted_at_ms)
        {
            return false;
        }

        let position = self
            .messages
            .partition_point(|existing| existing.emitted_at_ms <= message.emitted_at_ms);
        self.seen.insert(message.clone());
        self.messages.insert(position, message);

        while self.messages.len() > self.capacity {
            if let Some(evicted) = self.messages.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }

    /// Emission time of the newest retained message.
    pub fn newest_ms(&self) -> Option<i64> {
        self.messages.back().map(|message| message.emitted_at_ms)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Iterate oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }
}
