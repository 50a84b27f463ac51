//! Upstream provider implementations
//!
//! Concrete `Generator` implementations for the hosted model providers,
//! plus the factory that selects one from configuration. Providers differ
//! only in wire format; every one of them maps HTTP statuses onto the same
//! transient/fatal split so the retry controller stays provider-agnostic.

use dispatch_core::{ConfigError, UpstreamError};
use std::str::FromStr;
use std::sync::Arc;

use crate::retry::is_transient_status;
use crate::Generator;

pub mod anthropic;
pub mod google;
pub mod openai;

pub use anthropic::AnthropicGenerator;
pub use google::GoogleGenerator;
pub use openai::OpenAiGenerator;

/// Hosted provider selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Google,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Google => "google",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" => Ok(ProviderKind::Anthropic),
            "openai" => Ok(ProviderKind::OpenAi),
            "google" | "gemini" => Ok(ProviderKind::Google),
            other => Err(ConfigError::ProviderNotSupported {
                provider: other.to_string(),
            }),
        }
    }
}

/// Configuration for one provider-backed generator.
#[derive(Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub model: String,
    /// Override the provider's default API root (proxies, test servers).
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            max_tokens: 8192,
            temperature: 0.2,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

/// Build the generator for `kind`.
pub fn make_generator(kind: ProviderKind, config: ProviderConfig) -> Arc<dyn Generator> {
    match kind {
        ProviderKind::Anthropic => Arc::new(AnthropicGenerator::new(config)),
        ProviderKind::OpenAi => Arc::new(OpenAiGenerator::new(config)),
        ProviderKind::Google => Arc::new(GoogleGenerator::new(config)),
    }
}

/// Map an HTTP failure status onto the transient/fatal split.
pub(crate) fn classify_status(provider: &str, status: u16, body: &str) -> UpstreamError {
    let reason = format!("{}: {}", provider, truncate(body, 200));
    if is_transient_status(status) {
        UpstreamError::Transient { status, reason }
    } else {
        UpstreamError::Fatal { status, reason }
    }
}

/// Map a reqwest transport failure onto the retryable error variants.
pub(crate) fn classify_transport(provider: &str, e: reqwest::Error, elapsed_ms: u64) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Timeout { elapsed_ms }
    } else {
        UpstreamError::Network {
            reason: format!("{}: {}", provider, e),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_round_trip() {
        for kind in [
            ProviderKind::Anthropic,
            ProviderKind::OpenAi,
            ProviderKind::Google,
        ] {
            assert_eq!(kind.as_str().parse::<ProviderKind>().unwrap(), kind);
        }
        assert_eq!("gemini".parse::<ProviderKind>().unwrap(), ProviderKind::Google);
        assert!(matches!(
            "cohere".parse::<ProviderKind>(),
            Err(ConfigError::ProviderNotSupported { .. })
        ));
    }

    #[test]
    fn test_classify_status_split() {
        assert!(matches!(
            classify_status("openai", 429, "slow down"),
            UpstreamError::Transient { status: 429, .. }
        ));
        assert!(matches!(
            classify_status("anthropic", 529, "overloaded"),
            UpstreamError::Transient { status: 529, .. }
        ));
        assert!(matches!(
            classify_status("google", 403, "forbidden"),
            UpstreamError::Fatal { status: 403, .. }
        ));
    }

    #[test]
    fn test_config_debug_redacts_api_key() {
        let config = ProviderConfig::new("sk-secret", "claude-sonnet-4-20250514");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn test_factory_selects_provider() {
        let config = ProviderConfig::new("key", "model");
        let generator = make_generator(ProviderKind::Anthropic, config.clone());
        assert_eq!(generator.provider_name(), "anthropic");

        let generator = make_generator(ProviderKind::OpenAi, config.clone());
        assert_eq!(generator.provider_name(), "openai");

        let generator = make_generator(ProviderKind::Google, config);
        assert_eq!(generator.provider_name(), "google");
    }
}
