//! Google (Gemini) generator

use async_trait::async_trait;
use dispatch_core::UpstreamError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::{classify_status, classify_transport, ProviderConfig};
use crate::{GeneratedText, Generator};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Generator backed by the Gemini generateContent API.
pub struct GoogleGenerator {
    client: Client,
    config: ProviderConfig,
    base_url: String,
}

impl GoogleGenerator {
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

    fn build_request(&self, prompt: &str) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_tokens,
            },
        }
    }
}

#[async_trait]
impl Generator for GoogleGenerator {
    async fn generate(&self, prompt: &str) -> Result<GeneratedText, UpstreamError> {
        let started = Instant::now();
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url, self.config.model
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.config.api_key.as_str())])
            .json(&self.build_request(prompt))
            .send()
            .await
            .map_err(|e| classify_transport("google", e, started.elapsed().as_millis() as u64))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status("google", status.as_u16(), &body));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| classify_transport("google", e, started.elapsed().as_millis() as u64))?;

        Ok(GeneratedText {
            content: parsed.text(),
            tokens_in: parsed
                .usage_metadata
                .as_ref()
                .map(|u| u.prompt_token_count),
            tokens_out: parsed
                .usage_metadata
                .as_ref()
                .map(|u| u.candidates_token_count),
            latency_ms: Some(started.elapsed().as_millis() as u64),
        })
    }

    fn provider_name(&self) -> &str {
        "google"
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

impl std::fmt::Debug for GoogleGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleGenerator")
            .field("base_url", &self.base_url)
            .field("model", &self.config.model)
            .finish()
    }
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

impl GenerateResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .map(|candidate| {
                candidate
                    .content
                    .parts
                    .iter()
                    .map(|part| part.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: u32,
}
