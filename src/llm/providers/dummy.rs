//! Dummy LLM provider: deterministic, offline.
//!
//! Counts whitespace-separated words as tokens and echoes the last rendered
//! message back prefixed with `[echo]`, cut to `max_tokens` words.  Tests can
//! script replies, inject failures, and inspect every request through
//! [`DummyProvider::calls`].  Clones share the same state.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::llm::{MessageTemplate, ProviderError};
use crate::message::Message;

/// One recorded request.
#[derive(Debug, Clone)]
pub struct DummyCall {
    pub messages: Vec<Message>,
    pub max_tokens: Option<usize>,
}

#[derive(Debug, Default)]
struct DummyState {
    replies: VecDeque<String>,
    failures: u32,
    calls: Vec<DummyCall>,
}

#[derive(Debug, Clone)]
pub struct DummyProvider {
    context_size: usize,
    template: MessageTemplate,
    state: Arc<Mutex<DummyState>>,
}

impl DummyProvider {
    pub fn new(context_size: usize, template: MessageTemplate) -> Self {
        Self { context_size, template, state: Arc::new(Mutex::new(DummyState::default())) }
    }

    /// Queue a reply returned (whole, ignoring `max_tokens`) by the next
    /// successful call.
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.lock().replies.push_back(reply.into());
    }

    /// Make the next `n` calls fail with [`ProviderError::Request`].
    pub fn fail_next(&self, n: u32) {
        self.lock().failures = n;
    }

    /// Every request so far, failed ones included.
    pub fn calls(&self) -> Vec<DummyCall> {
        self.lock().calls.clone()
    }

    pub async fn send(
        &self,
        messages: &[Message],
        max_tokens: Option<usize>,
    ) -> Result<String, ProviderError> {
        let mut state = self.lock();
        state.calls.push(DummyCall { messages: messages.to_vec(), max_tokens });

        if state.failures > 0 {
            state.failures -= 1;
            return Err(ProviderError::Request("dummy: injected failure".into()));
        }
        if let Some(reply) = state.replies.pop_front() {
            return Ok(reply);
        }

        let last = messages.last().map(|m| self.template.render(m)).unwrap_or_default();
        let echo = format!("[echo] {last}");
        Ok(match max_tokens {
            Some(limit) => echo.split_whitespace().take(limit.max(1)).collect::<Vec<_>>().join(" "),
            None => echo,
        })
    }

    pub fn context_size(&self) -> usize {
        self.context_size
    }

    pub fn message_size(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }

    fn lock(&self) -> MutexGuard<'_, DummyState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
