//! LLM provider abstraction.
//!
//! `LlmProvider` is an enum over concrete provider implementations.
//! Add a new variant + module in `providers/` for each additional backend.
//!
//! [`ChatBackend`] wraps the active provider with a bounded [`RetryPolicy`].
//! It is the only handle the agents see: `send`, `context_size` and
//! `message_size`.  Clone it freely; providers are shared immutable
//! capabilities.

pub mod providers;

use std::{future::Future, time::Duration};

use thiserror::Error;
use tracing::warn;

use crate::message::Message;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("provider request failed: {0}")]
    Request(String),
}

// ── Message rendering ─────────────────────────────────────────────────────────

/// Per-message render hook.  `<from>`, `<to>` and `<text>` are replaced.
#[derive(Debug, Clone)]
pub struct MessageTemplate(String);

impl MessageTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn render(&self, message: &Message) -> String {
        self.0
            .replace("<from>", message.from())
            .replace("<to>", message.to())
            .replace("<text>", message.text())
    }
}

impl Default for MessageTemplate {
    fn default() -> Self {
        Self::new("<from>: <text>")
    }
}

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available provider backends.
///
/// Enum dispatch avoids `dyn` trait objects and the `async-trait` dependency.
/// Adding a backend = new module + new variant + new match arms.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    Dummy(providers::dummy::DummyProvider),
    OpenAiCompatible(providers::openai_compatible::OpenAiCompatibleProvider),
    OpenAiCompletion(providers::openai_completion::OpenAiCompletionProvider),
    Tgwui(providers::tgwui::TgwuiProvider),
}

impl LlmProvider {
    /// One request/response round-trip, no retry.
    pub async fn send(
        &self,
        messages: &[Message],
        max_tokens: Option<usize>,
    ) -> Result<String, ProviderError> {
        match self {
            LlmProvider::Dummy(p) => p.send(messages, max_tokens).await,
            LlmProvider::OpenAiCompatible(p) => p.send(messages, max_tokens).await,
            LlmProvider::OpenAiCompletion(p) => p.send(messages, max_tokens).await,
            LlmProvider::Tgwui(p) => p.send(messages, max_tokens).await,
        }
    }

    pub fn context_size(&self) -> usize {
        match self {
            LlmProvider::Dummy(p) => p.context_size(),
            LlmProvider::OpenAiCompatible(p) => p.context_size(),
            LlmProvider::OpenAiCompletion(p) => p.context_size(),
            LlmProvider::Tgwui(p) => p.context_size(),
        }
    }

    pub async fn message_size(&self, text: &str) -> Result<usize, ProviderError> {
        match self {
            LlmProvider::Dummy(p) => Ok(p.message_size(text)),
            LlmProvider::OpenAiCompatible(p) => Ok(p.message_size(text)),
            LlmProvider::OpenAiCompletion(p) => Ok(p.message_size(text)),
            LlmProvider::Tgwui(p) => p.message_size(text).await,
        }
    }
}

// ── Retry ─────────────────────────────────────────────────────────────────────

/// Fixed-count retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first failure.
    pub retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, backoff_ms: u64) -> Self {
        Self { retries, backoff: Duration::from_millis(backoff_ms) }
    }

    pub fn none() -> Self {
        Self { retries: 0, backoff: Duration::ZERO }
    }

    /// Run `op` until it succeeds or the retries are exhausted; the last
    /// error is returned.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        op = what,
                        attempt,
                        retries = self.retries,
                        error = %e,
                        "backend call failed, retrying"
                    );
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ── Backend handle ────────────────────────────────────────────────────────────

/// The active provider plus its retry policy.
#[derive(Debug, Clone)]
pub struct ChatBackend {
    provider: LlmProvider,
    retry: RetryPolicy,
}

impl ChatBackend {
    pub fn new(provider: LlmProvider, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    /// Send `messages` in one call; `max_tokens` caps the reply length.
    pub async fn send(
        &self,
        messages: &[Message],
        max_tokens: Option<usize>,
    ) -> Result<String, ProviderError> {
        self.retry
            .run("send", || self.provider.send(messages, max_tokens))
            .await
    }

    /// Total token budget for one call.
    pub fn context_size(&self) -> usize {
        self.provider.context_size()
    }

    /// Token cost of `text` under the active tokenizer.
    pub async fn message_size(&self, text: &str) -> Result<usize, ProviderError> {
        self.retry
            .run("message_size", || self.provider.message_size(text))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::providers::dummy::DummyProvider;

    fn dummy(context_size: usize) -> DummyProvider {
        DummyProvider::new(context_size, MessageTemplate::default())
    }

    #[test]
    fn template_fills_all_fields() {
        let t = MessageTemplate::new("[<from> to <to>] <text>");
        let m = Message::new("Alice", Some("Bob"), "hi").unwrap();
        assert_eq!(t.render(&m), "[Alice to Bob] hi");
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_after_transient_failures() {
        let p = dummy(100);
        p.fail_next(2);
        p.push_reply("ok");
        let backend = ChatBackend::new(LlmProvider::Dummy(p.clone()), RetryPolicy::new(5, 3000));
        let msgs = [Message::new("Alice", Some("Bob"), "hi").unwrap()];

        let started = tokio::time::Instant::now();
        let reply = backend.send(&msgs, None).await.unwrap();

        assert_eq!(reply, "ok");
        assert_eq!(p.calls().len(), 3);
        assert!(started.elapsed() >= Duration::from_millis(6000));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_budget() {
        let p = dummy(100);
        p.fail_next(10);
        let backend = ChatBackend::new(LlmProvider::Dummy(p.clone()), RetryPolicy::new(2, 10));
        let msgs = [Message::new("Alice", Some("Bob"), "hi").unwrap()];

        let err = backend.send(&msgs, None).await.unwrap_err();
        assert!(matches!(err, ProviderError::Request(_)));
        assert_eq!(p.calls().len(), 3);
    }

    #[tokio::test]
    async fn no_retry_policy_fails_immediately() {
        let p = dummy(100);
        p.fail_next(1);
        let backend = ChatBackend::new(LlmProvider::Dummy(p.clone()), RetryPolicy::none());
        let msgs = [Message::new("Alice", Some("Bob"), "hi").unwrap()];
        assert!(backend.send(&msgs, None).await.is_err());
        assert_eq!(p.calls().len(), 1);
    }

    #[tokio::test]
    async fn context_and_size_delegate() {
        let backend = ChatBackend::new(LlmProvider::Dummy(dummy(64)), RetryPolicy::none());
        assert_eq!(backend.context_size(), 64);
        assert_eq!(backend.message_size("one two three").await.unwrap(), 3);
    }
}
