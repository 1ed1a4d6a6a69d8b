//! LLM Provider Strategy Pattern
//!
//! Common interface for chat-model backends (Ollama, OpenAI-compatible, ...).
//! [`LlmAgent`](crate::llm_agent::LlmAgent), [`LlmClassifier`](crate::classifier::LlmClassifier)
//! and [`LlmSummarizer`](crate::storage::LlmSummarizer) talk to models only through it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use squad_core::provider::{GenerationOptions, LlmProvider};
//!
//! let provider = OllamaProvider::from_env()?;
//! let completion = provider.complete(&messages, &GenerationOptions::default()).await?;
//! ```

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Message;

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "llama3.2", "gpt-4o-mini")
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Top-p nucleus sampling
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Stop sequences
    #[serde(default)]
    pub stop_sequences: Vec<String>,

    /// System prompt, sent ahead of the conversation
    #[serde(default)]
    pub system_prompt: Option<String>,
}

const fn default_temperature() -> f32 {
    0.0
}
const fn default_max_tokens() -> u32 {
    1000
}
const fn default_top_p() -> f32 {
    0.9
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "llama3.2".into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            stop_sequences: Vec::new(),
            system_prompt: None,
        }
    }
}

impl GenerationOptions {
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Copy of these options carrying a different system prompt
    #[must_use]
    pub fn with_system_prompt(&self, prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(prompt.into()),
            ..self.clone()
        }
    }
}

/// Response from an LLM completion
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Completion {
    /// The generated text
    pub content: String,

    /// Model that generated this response
    pub model: String,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,

    /// Finish reason
    pub finish_reason: Option<FinishReason>,
}

/// Token usage statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Reason for completion finishing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolUse,
    ContentFilter,
    Error,
}

/// A chunk from streaming completion
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// The text delta
    pub delta: String,

    /// Whether this is the final chunk
    pub done: bool,

    /// Token usage (typically only on final chunk)
    pub usage: Option<TokenUsage>,
}

/// Stream type for completion streaming
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Strategy trait for LLM providers
///
/// Implement this trait to add support for new LLM backends. Implementations
/// must report transient overload as [`SquadError::Overloaded`](crate::SquadError::Overloaded)
/// so callers can retry it.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &str;

    /// Check if the provider is available and configured correctly
    async fn health_check(&self) -> Result<bool>;

    /// Generate a completion from messages
    async fn complete(&self, messages: &[Message], options: &GenerationOptions)
    -> Result<Completion>;

    /// Generate a streaming completion
    async fn complete_stream(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<CompletionStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_options_defaults() {
        let opts = GenerationOptions::default();
        assert!(opts.temperature.abs() < f32::EPSILON);
        assert_eq!(opts.max_tokens, 1000);
        assert_eq!(opts.model, "llama3.2");
    }

    #[test]
    fn test_with_system_prompt_keeps_model() {
        let opts = GenerationOptions::with_model("gpt-4o-mini").with_system_prompt("be brief");
        assert_eq!(opts.model, "gpt-4o-mini");
        assert_eq!(opts.system_prompt.as_deref(), Some("be brief"));
    }
}
