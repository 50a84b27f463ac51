//! OpenAI generator

use async_trait::async_trait;
use dispatch_core::UpstreamError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::{classify_status, classify_transport, ProviderConfig};
use crate::{GeneratedText, Generator};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Generator backed by the OpenAI Chat Completions API.
pub struct OpenAiGenerator {
    client: Client,
    config: ProviderConfig,
    base_url: String,
}

impl OpenAiGenerator {
    pub fn new(config: ProviderConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            client: Client::new(),
            config,
            base_url,
        }
    }

    fn build_request(&self, prompt: &str) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            max_completion_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        }
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<GeneratedText, UpstreamError> {
        let started = Instant::now();
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&self.build_request(prompt))
            .send()
            .await
            .map_err(|e| classify_transport("openai", e, started.elapsed().as_millis() as u64))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status("openai", status.as_u16(), &body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| classify_transport("openai", e, started.elapsed().as_millis() as u64))?;

        let content = parsed
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .unwrap_or_default();

        Ok(GeneratedText {
            content,
            tokens_in: parsed.usage.as_ref().map(|u| u.prompt_tokens),
            tokens_out: parsed.usage.as_ref().map(|u| u.completion_tokens),
            latency_ms: Some(started.elapsed().as_millis() as u64),
        })
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

impl std::fmt::Debug for OpenAiGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiGenerator")
            .field("base_url", &self.base_url)
            .field("model", &self.config.model)
            .finish()
    }
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_completion_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
