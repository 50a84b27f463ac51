//! Anthropic (Claude) generator

use async_trait::async_trait;
use dispatch_core::UpstreamError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::{classify_status, classify_transport, ProviderConfig};
use crate::{GeneratedText, Generator};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// Generator backed by the Anthropic Messages API.
pub struct AnthropicGenerator {
    client: Client,
    config: ProviderConfig,
    base_url: String,
}

impl AnthropicGenerator {
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

    fn build_request(&self, prompt: &str) -> MessageRequest {
        MessageRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        }
    }
}

#[async_trait]
impl Generator for AnthropicGenerator {
    async fn generate(&self, prompt: &str) -> Result<GeneratedText, UpstreamError> {
        let started = Instant::now();
        let url = format!("{}/messages", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&self.build_request(prompt))
            .send()
            .await
            .map_err(|e| {
                classify_transport("anthropic", e, started.elapsed().as_millis() as u64)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status("anthropic", status.as_u16(), &body));
        }

        let parsed: MessageResponse = response.json().await.map_err(|e| {
            classify_transport("anthropic", e, started.elapsed().as_millis() as u64)
        })?;

        Ok(GeneratedText {
            content: parsed.text(),
            tokens_in: parsed.usage.as_ref().map(|u| u.input_tokens),
            tokens_out: parsed.usage.as_ref().map(|u| u.output_tokens),
            latency_ms: Some(started.elapsed().as_millis() as u64),
        })
    }

    fn provider_name(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

impl std::fmt::Debug for AnthropicGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicGenerator")
            .field("base_url", &self.base_url)
            .field("model", &self.config.model)
            .finish()
    }
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

impl MessageResponse {
    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let generator = AnthropicGenerator::new(
            ProviderConfig::new("key", "claude-sonnet-4-20250514")
                .with_max_tokens(4096)
                .with_temperature(0.7),
        );
        let request = generator.build_request("hello");
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["model"], "claude-sonnet-4-20250514");
        assert_eq!(value["max_tokens"], 4096);
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"], "hello");
    }

    #[test]
    fn test_response_text_extraction() {
        let raw = r#"{
            "content": [
                {"type": "text", "text": "{\"a\":1}"},
                {"type": "tool_use", "id": "x", "name": "t", "input": {}}
            ],
            "usage": {"input_tokens": 12, "output_tokens": 34}
        }"#;
        let parsed: MessageResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.text(), "{\"a\":1}");
        assert_eq!(parsed.usage.as_ref().unwrap().input_tokens, 12);
        assert_eq!(parsed.usage.as_ref().unwrap().output_tokens, 34);
    }

    #[test]
    fn test_custom_base_url() {
        let generator = AnthropicGenerator::new(
            ProviderConfig::new("key", "model").with_base_url("http://localhost:8080/v1"),
        );
        assert_eq!(generator.base_url, "http://localhost:8080/v1");
    }
}
