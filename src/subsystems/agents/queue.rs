//! [`ConversationQueues`]: one ordered message list per correspondent.
//!
//! A key exists once its first message has been pushed; taking or clearing
//! a queue removes the key again, so iteration only ever sees live
//! conversations.  Keys iterate in name order.

use std::collections::BTreeMap;

use crate::message::Message;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationQueues {
    queues: BTreeMap<String, Vec<Message>>,
}

impl ConversationQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the queue for `key`, creating it on first insert.
    pub fn push(&mut self, key: &str, message: Message) {
        self.queues.entry(key.to_string()).or_default().push(message);
    }

    /// Messages queued for `key`, oldest first; empty when there are none.
    pub fn get(&self, key: &str) -> &[Message] {
        self.queues.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Correspondents with at least one queued message, in name order.
    pub fn keys(&self) -> Vec<String> {
        self.queues.keys().cloned().collect()
    }

    pub fn len(&self, key: &str) -> usize {
        self.get(key).len()
    }

    pub fn total(&self) -> usize {
        self.queues.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Remove and return the queue for `key`.
    pub fn take(&mut self, key: &str) -> Vec<Message> {
        self.queues.remove(key).unwrap_or_default()
    }

    /// Remove the oldest message for `key`.
    pub fn pop_oldest(&mut self, key: &str) -> Option<Message> {
        let queue = self.queues.get_mut(key)?;
        let oldest = (!queue.is_empty()).then(|| queue.remove(0));
        if queue.is_empty() {
            self.queues.remove(key);
        }
        oldest
    }

    /// Empty every queue, returning all messages grouped by key.
    pub fn drain_all(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.queues).into_values().flatten().collect()
    }
}
