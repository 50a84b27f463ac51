//! DISPATCH LLM - generation seam and retry budget
//!
//! Provider-agnostic trait for upstream text generation. The coordinator
//! and the receipt validator never see a concrete provider: everything
//! upstream is a `Generator` producing raw text, and the retry controller
//! wraps any generation future under a wall-clock budget.

use async_trait::async_trait;
use dispatch_core::UpstreamError;
use serde::{Deserialize, Serialize};
use std::future::Future;

pub mod providers;
pub mod retry;

pub use providers::{make_generator, ProviderConfig, ProviderKind};
pub use retry::{call_with_budget, is_transient_status, RetryBudget, RetryOutcome};

/// Raw output of one upstream generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedText {
    pub content: String,
    pub tokens_in: Option<u32>,
    pub tokens_out: Option<u32>,
    pub latency_ms: Option<u64>,
}

impl GeneratedText {
    /// Bare content with no accounting metadata.
    pub fn from_content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tokens_in: None,
            tokens_out: None,
            latency_ms: None,
        }
    }

    /// A 200-with-nothing response. Not a transient condition: retrying
    /// under the same parameters would produce the same nothing.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Trait for upstream generators.
/// Implementations must be thread-safe (Send + Sync).
///
/// Prompt construction, model choice, and provider selection are the
/// caller's concern; this seam only turns a prompt into raw text or a
/// classified upstream failure.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate raw text for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<GeneratedText, UpstreamError>;

    /// Provider name for logging (e.g. "anthropic", "openai", "google").
    fn provider_name(&self) -> &str;

    /// Model identifier for logging.
    fn model_name(&self) -> &str;
}

/// Adapter exposing a closure as a `Generator`.
///
/// Used by tests and by local/offline providers that need no HTTP client.
pub struct FnGenerator<F> {
    name: String,
    func: F,
}

impl<F> FnGenerator<F> {
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F, Fut> Generator for FnGenerator<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<GeneratedText, UpstreamError>> + Send,
{
    async fn generate(&self, prompt: &str) -> Result<GeneratedText, UpstreamError> {
        (self.func)(prompt.to_string()).await
    }

    fn provider_name(&self) -> &str {
        "local"
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_text_emptiness() {
        assert!(GeneratedText::from_content("").is_empty());
        assert!(GeneratedText::from_content("  \n\t ").is_empty());
        assert!(!GeneratedText::from_content("{}").is_empty());
    }

    #[tokio::test]
    async fn test_fn_generator_round_trip() {
        let generator = FnGenerator::new("echo", |prompt: String| async move {
            Ok(GeneratedText::from_content(format!("echo: {}", prompt)))
        });

        let text = generator.generate("hello").await.unwrap();
        assert_eq!(text.content, "echo: hello");
        assert_eq!(generator.provider_name(), "local");
        assert_eq!(generator.model_name(), "echo");
    }
}
