//! History summarization
//!
//! Compresses messages dropped by retention into a running summary.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::message::Message;
use crate::provider::{GenerationOptions, LlmProvider};

/// Opaque text-to-text summarization service
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Fold `dropped` into `previous`, returning the new summary
    async fn summarize(&self, previous: Option<&str>, dropped: &[Message]) -> Result<String>;
}

const SUMMARY_PROMPT: &str = "You maintain a running summary of a conversation between a user \
and an assistant. Merge the existing summary with the new transcript lines. Keep facts, \
decisions and open questions. Reply with the summary text only, at most 200 words.";

/// Summarizer backed by a chat model
pub struct LlmSummarizer {
    provider: Arc<dyn LlmProvider>,
    options: GenerationOptions,
}

impl LlmSummarizer {
    pub fn new(provider: Arc<dyn LlmProvider>, options: GenerationOptions) -> Self {
        Self {
            options: options.with_system_prompt(SUMMARY_PROMPT),
            provider,
        }
    }

    fn build_request(previous: Option<&str>, dropped: &[Message]) -> String {
        let mut request = String::new();
        if let Some(previous) = previous {
            let _ = writeln!(request, "Existing summary:\n{previous}\n");
        }
        request.push_str("New transcript lines:\n");
        for message in dropped {
            let _ = writeln!(request, "{}: {}", message.role, message.text());
        }
        request
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, previous: Option<&str>, dropped: &[Message]) -> Result<String> {
        let request = Message::user(Self::build_request(previous, dropped));
        let completion = self
            .provider
            .complete(std::slice::from_ref(&request), &self.options)
            .await?;
        tracing::debug!(dropped = dropped.len(), "conversation summary refreshed");
        Ok(completion.content.trim().to_string())
    }
}
