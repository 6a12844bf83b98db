//! LLM provider implementations.
//!
//! `build(config, api_key)` is the factory: called at startup.
//! Adding a new backend = new module + new match arm.

pub mod dummy;
pub mod openai_compatible;
pub mod openai_completion;
pub mod tgwui;

use crate::config::LlmConfig;
use crate::llm::{ChatBackend, LlmProvider, MessageTemplate, ProviderError, RetryPolicy};

/// Construct a `LlmProvider` from config and an optional API key.
///
/// `api_key` is sourced from `LLM_API_KEY` env (never TOML) and is `None`
/// for keyless local models.
pub fn build(config: &LlmConfig, api_key: Option<String>) -> Result<LlmProvider, ProviderError> {
    let template = MessageTemplate::new(config.message_template.clone());
    match config.provider.as_str() {
        "dummy" => Ok(LlmProvider::Dummy(dummy::DummyProvider::new(
            config.dummy.context_size,
            template,
        ))),
        "openai" | "openai-compatible" => {
            let oai = &config.openai;
            let p = openai_compatible::OpenAiCompatibleProvider::new(
                oai.api_base_url.clone(),
                oai.model.clone(),
                oai.temperature,
                oai.timeout_seconds,
                oai.context_size,
                template,
                api_key,
            )?;
            Ok(LlmProvider::OpenAiCompatible(p))
        }
        "openai-completion" => {
            let oai = &config.openai_completion;
            let p = openai_completion::OpenAiCompletionProvider::new(
                oai.api_base_url.clone(),
                oai.model.clone(),
                oai.temperature,
                oai.timeout_seconds,
                oai.context_size,
                template,
                api_key,
            )?;
            Ok(LlmProvider::OpenAiCompletion(p))
        }
        "tgwui" => {
            let t = &config.tgwui;
            let p = tgwui::TgwuiProvider::new(
                t.api_base_url.clone(),
                t.temperature,
                t.timeout_seconds,
                t.context_size,
                template,
            )?;
            Ok(LlmProvider::Tgwui(p))
        }
        _ => Err(ProviderError::UnknownProvider(config.provider.clone())),
    }
}

/// [`build`] plus the configured retry policy.
pub fn build_backend(
    config: &LlmConfig,
    api_key: Option<String>,
) -> Result<ChatBackend, ProviderError> {
    let provider = build(config, api_key)?;
    Ok(ChatBackend::new(provider, RetryPolicy::new(config.retries, config.backoff_ms)))
}
