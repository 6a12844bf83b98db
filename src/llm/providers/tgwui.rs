//! text-generation-webui provider (legacy `/api/v1` blocking API).
//!
//! Messages are rendered through the [`MessageTemplate`] and joined with
//! blank lines into one prompt for `/api/v1/generate`.  Token costs come
//! from the server's own tokenizer via `/api/v1/token-count`.

use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, error};

use crate::llm::{MessageTemplate, ProviderError};
use crate::message::Message;

#[derive(Debug, Clone)]
pub struct TgwuiProvider {
    client: Client,
    api_base_url: String,
    temperature: f32,
    context_size: usize,
    template: MessageTemplate,
}

impl TgwuiProvider {
    pub fn new(
        api_base_url: String,
        temperature: f32,
        timeout_seconds: u64,
        context_size: usize,
        template: MessageTemplate,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        let api_base_url = api_base_url.trim_end_matches('/').to_string();
        Ok(Self { client, api_base_url, temperature, context_size, template })
    }

    pub async fn send(
        &self,
        messages: &[Message],
        max_tokens: Option<usize>,
    ) -> Result<String, ProviderError> {
        let payload = GenerateRequest {
            prompt: self.render_prompt(messages),
            temperature: self.temperature,
            max_new_tokens: max_tokens,
        };
        debug!(prompt_len = payload.prompt.len(), max_tokens = ?max_tokens, "sending tgwui generate");

        let parsed: ApiResponse<GenerateResult> = self.post("generate", &payload).await?;
        let text = parsed
            .results
            .into_iter()
            .next()
            .map(|r| r.text.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProviderError::Request("empty or missing text in response".into()))?;

        debug!(reply_len = text.len(), "received tgwui reply");
        Ok(text)
    }

    pub fn context_size(&self) -> usize {
        self.context_size
    }

    pub async fn message_size(&self, text: &str) -> Result<usize, ProviderError> {
        let payload = TokenCountRequest { prompt: text.to_string() };
        let parsed: ApiResponse<TokenCountResult> = self.post("token-count", &payload).await?;
        parsed
            .results
            .into_iter()
            .next()
            .map(|r| r.tokens)
            .ok_or_else(|| ProviderError::Request("missing token count in response".into()))
    }

    fn render_prompt(&self, messages: &[Message]) -> String {
        messages.iter().map(|m| self.template.render(m)).collect::<Vec<_>>().join("\n\n")
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v1/{path}", self.api_base_url)
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ProviderError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path);
        let response = self.client.post(&url).json(body).send().await.map_err(|e| {
            error!(%url, error = %e, "tgwui HTTP request failed (transport)");
            ProviderError::Request(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            error!(%url, %status, "tgwui request returned HTTP error");
            return Err(ProviderError::Request(format!("HTTP {status}: {body}")));
        }

        response.json::<T>().await.map_err(|e| {
            error!(%url, error = %e, "failed to deserialize tgwui response");
            ProviderError::Request(format!("failed to parse response body: {e}"))
        })
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateRequest {
    prompt: String,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_new_tokens: Option<usize>,
}

#[derive(Debug, Serialize)]
struct TokenCountRequest {
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct GenerateResult {
    text: String,
}

#[derive(Debug, Deserialize)]
struct TokenCountResult {
    tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> TgwuiProvider {
        TgwuiProvider::new("http://127.0.0.1:5000/".into(), 0.5, 1, 2048, MessageTemplate::default())
            .unwrap()
    }

    #[test]
    fn endpoints_join_cleanly() {
        let p = provider();
        assert_eq!(p.endpoint("generate"), "http://127.0.0.1:5000/api/v1/generate");
        assert_eq!(p.endpoint("token-count"), "http://127.0.0.1:5000/api/v1/token-count");
    }

    #[test]
    fn prompt_joins_rendered_messages() {
        let p = provider();
        let msgs = [
            Message::new("System", Some("Alice"), "You are Alice.").unwrap(),
            Message::new("Bob", Some("Alice"), "Hi").unwrap(),
        ];
        assert_eq!(p.render_prompt(&msgs), "System: You are Alice.\n\nBob: Hi");
    }

    #[test]
    fn response_shapes_parse() {
        let generated: ApiResponse<GenerateResult> =
            serde_json::from_str(r#"{"results":[{"text":" hello "}]}"#).unwrap();
        assert_eq!(generated.results[0].text, " hello ");
        let count: ApiResponse<TokenCountResult> =
            serde_json::from_str(r#"{"results":[{"tokens":42}]}"#).unwrap();
        assert_eq!(count.results[0].tokens, 42);
    }

    #[test]
    fn generate_request_omits_unset_cap() {
        let req = GenerateRequest { prompt: "p".into(), temperature: 0.5, max_new_tokens: None };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("max_new_tokens"));
    }
}
