//! Legacy OpenAI text completion provider (`/v1/completions`).
//!
//! The whole conversation goes out as one prompt string: every message is
//! rendered through the [`MessageTemplate`] and the results are joined with
//! blank lines.  The reply is the first choice's `text`.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::openai_compatible::check_status;
use crate::llm::{MessageTemplate, ProviderError};
use crate::message::Message;

/// Context windows of the completion-era models, matched exactly.
const MODEL_CONTEXT_SIZES: &[(&str, usize)] = &[
    ("gpt-4", 8192),
    ("gpt-4-32k", 32768),
    ("text-davinci-003", 4097),
    ("text-curie-001", 2049),
    ("text-babbage-001", 2049),
    ("text-ada-001", 2049),
];

const FALLBACK_CONTEXT_SIZE: usize = 2049;

#[derive(Debug, Clone)]
pub struct OpenAiCompletionProvider {
    client: Client,
    api_base_url: String,
    model: String,
    temperature: f32,
    context_size: usize,
    template: MessageTemplate,
    api_key: Option<String>,
}

impl OpenAiCompletionProvider {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api_base_url: String,
        model: String,
        temperature: f32,
        timeout_seconds: u64,
        context_size: Option<usize>,
        template: MessageTemplate,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;
        let context_size = context_size.unwrap_or_else(|| model_context_size(&model));
        Ok(Self { client, api_base_url, model, temperature, context_size, template, api_key })
    }

    pub async fn send(
        &self,
        messages: &[Message],
        max_tokens: Option<usize>,
    ) -> Result<String, ProviderError> {
        let payload = CompletionRequest {
            model: &self.model,
            prompt: self.render_prompt(messages),
            temperature: self.temperature,
            max_tokens,
        };
        debug!(model = %self.model, prompt_len = payload.prompt.len(), max_tokens = ?max_tokens, "sending completion request");

        let mut req = self.client.post(&self.api_base_url).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req.send().await.map_err(|e| {
            error!(url = %self.api_base_url, error = %e, "completion request failed (transport)");
            ProviderError::Request(e.to_string())
        })?;
        let response = check_status(response).await?;

        let parsed = response
            .json::<CompletionResponse>()
            .await
            .map_err(|e| ProviderError::Request(format!("failed to parse response body: {e}")))?;
        first_text(parsed)
    }

    pub fn context_size(&self) -> usize {
        self.context_size
    }

    /// Same ~4 characters per token estimate as the chat provider.
    pub fn message_size(&self, text: &str) -> usize {
        text.len().div_ceil(4)
    }

    fn render_prompt(&self, messages: &[Message]) -> String {
        messages.iter().map(|m| self.template.render(m)).collect::<Vec<_>>().join("\n\n")
    }
}

fn model_context_size(model: &str) -> usize {
    MODEL_CONTEXT_SIZES
        .iter()
        .find(|(name, _)| *name == model)
        .map_or(FALLBACK_CONTEXT_SIZE, |(_, size)| *size)
}

fn first_text(response: CompletionResponse) -> Result<String, ProviderError> {
    response
        .choices
        .into_iter()
        .next()
        .map(|c| c.text.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProviderError::Request("empty or missing text in completion".into()))
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: String,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: String,
}
