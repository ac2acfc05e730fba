//! Generation provider abstraction and implementations.
//!
//! - **[`DisabledGenerator`]**: always fails, so callers fall back to canned replies.
//! - **[`OpenAIGenerator`]**: `POST /v1/chat/completions`.
//! - **[`OllamaGenerator`]**: `POST /api/chat` with streaming off.
//!
//! Providers return errors freely. The summarizer and the orchestrator's
//! reply step wrap every call in a timeout and substitute their own
//! fallback text, so a provider error never reaches the caller.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::compose::Prompt;
use crate::config::GenerationConfig;
use crate::http;

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn model_name(&self) -> &str;
    async fn generate(&self, prompt: &Prompt) -> Result<String>;
}

/// Run `provider` under `timeout`, mapping an elapsed timer to an error.
pub async fn generate_with_timeout(
    provider: &dyn GenerationProvider,
    prompt: &Prompt,
    timeout: Duration,
) -> Result<String> {
    match tokio::time::timeout(timeout, provider.generate(prompt)).await {
        Ok(result) => result,
        Err(_) => bail!("generation timed out after {:?}", timeout),
    }
}

pub struct DisabledGenerator;

#[async_trait]
impl GenerationProvider for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn generate(&self, _prompt: &Prompt) -> Result<String> {
        bail!("Generation provider is disabled")
    }
}

fn messages_json(prompt: &Prompt) -> serde_json::Value {
    serde_json::Value::Array(
        prompt
            .messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
            .collect(),
    )
}

/// Chat completions via the OpenAI API. Requires `OPENAI_API_KEY`.
pub struct OpenAIGenerator {
    model: String,
    api_key: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        Ok(Self {
            model,
            api_key,
            url: format!("{}/v1/chat/completions", base.trim_end_matches('/')),
            max_retries: config.max_retries,
            client: http::client(config.timeout())?,
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages_json(prompt),
        });
        let json = http::post_json_with_retry(
            &self.client,
            &self.url,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_reply(&json)
    }
}

fn parse_openai_reply(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

/// Chat via a local Ollama instance (default `http://localhost:11434`).
pub struct OllamaGenerator {
    model: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            url: format!("{}/api/chat", base.trim_end_matches('/')),
            max_retries: config.max_retries,
            client: http::client(config.timeout())?,
        })
    }
}

#[async_trait]
impl GenerationProvider for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages_json(prompt),
            "stream": false,
        });
        let json = http::post_json_with_retry(
            &self.client,
            &self.url,
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        parse_ollama_reply(&json)
    }
}

fn parse_ollama_reply(json: &serde_json::Value) -> Result<String> {
    json.pointer("/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing message.content"))
}

/// Create the configured [`GenerationProvider`].
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledGenerator`] |
/// | `"openai"` | [`OpenAIGenerator`] |
/// | `"ollama"` | [`OllamaGenerator`] |
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn GenerationProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
