//! Ollama LLM Provider
//!
//! Implementation of `LlmProvider` for local Ollama inference over its
//! `/api/chat` endpoint. Streaming responses arrive as newline-delimited JSON.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use squad_core::{
    error::{Result, SquadError},
    message::Message,
    provider::{
        Completion, CompletionStream, FinishReason, GenerationOptions, LlmProvider, StreamChunk,
        TokenUsage,
    },
};

use crate::error::RuntimeError;
use crate::http::{WireMessage, check_status, finish_reason, records, wire_messages};

/// Ollama provider configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,

    /// Timeout for non-streaming requests, in seconds
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
            timeout_secs: 120,
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let host = std::env::var("OLLAMA_HOST").unwrap_or(defaults.host);
        let port = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);
        let timeout_secs = std::env::var("OLLAMA_TIMEOUT_SECS")
            .ok()
            .and_then(|t| t.parse().ok())
            .unwrap_or(defaults.timeout_secs);

        Self {
            host,
            port,
            timeout_secs,
        }
    }

    pub fn base_url(&self) -> String {
        format!("{}:{}", self.host.trim_end_matches('/'), self.port)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
    options: ChatOptions<'a>,
}

#[derive(Debug, Serialize)]
struct ChatOptions<'a> {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
    #[serde(skip_serializing_if = "no_stops")]
    stop: &'a [String],
}

fn no_stops(stop: &&[String]) -> bool {
    stop.is_empty()
}

#[derive(Debug, Default, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

impl ChatResponse {
    fn usage(&self) -> Option<TokenUsage> {
        if self.prompt_eval_count.is_none() && self.eval_count.is_none() {
            return None;
        }
        let prompt_tokens = self.prompt_eval_count.unwrap_or(0);
        let completion_tokens = self.eval_count.unwrap_or(0);
        Some(TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        })
    }

    fn content(&self) -> String {
        self.message
            .as_ref()
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

/// Parse one NDJSON line of a chat response
fn parse_line(line: &str) -> std::result::Result<ChatResponse, RuntimeError> {
    let response: ChatResponse =
        serde_json::from_str(line).map_err(|e| RuntimeError::Decode(format!("{e} (line: {line})")))?;
    if let Some(error) = &response.error {
        return Err(RuntimeError::Backend(error.clone()));
    }
    Ok(response)
}

fn stream_chunk(line: &str) -> Result<StreamChunk> {
    let response = parse_line(line)?;
    Ok(StreamChunk {
        delta: response.content(),
        done: response.done,
        usage: response.usage(),
    })
}

/// Ollama LLM provider
pub struct OllamaProvider {
    client: reqwest::Client,
    config: OllamaConfig,
}

impl OllamaProvider {
    /// Create a new Ollama provider with custom host/port
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        Self::from_config(OllamaConfig {
            host: host.into(),
            port,
            ..Default::default()
        })
    }

    /// Create from configuration
    pub fn from_config(config: OllamaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SquadError::Config(format!("building HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(OllamaConfig::from_env())
    }

    /// Create with default localhost settings
    pub fn localhost() -> Result<Self> {
        Self::from_config(OllamaConfig::default())
    }

    pub const fn config(&self) -> &OllamaConfig {
        &self.config
    }

    fn request<'a>(messages: &[Message], options: &'a GenerationOptions, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &options.model,
            messages: wire_messages(messages, options.system_prompt.as_deref()),
            stream,
            options: ChatOptions {
                temperature: options.temperature,
                top_p: options.top_p,
                num_predict: options.max_tokens,
                stop: &options.stop_sequences,
            },
        }
    }

    async fn send(&self, body: &ChatRequest<'_>, timeout: Option<Duration>) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(format!("{}/api/chat", self.config.base_url()))
            .json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await.map_err(RuntimeError::from)?;
        Ok(check_status(response).await?)
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.config.base_url());
        match self.client.get(&url).timeout(Duration::from_secs(5)).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(&self, messages: &[Message], options: &GenerationOptions) -> Result<Completion> {
        let body = Self::request(messages, options, false);
        let response = self
            .send(&body, Some(Duration::from_secs(self.config.timeout_secs)))
            .await?;
        let text = response.text().await.map_err(RuntimeError::from)?;
        let parsed = parse_line(&text)?;

        Ok(Completion {
            content: parsed.content(),
            model: options.model.clone(),
            usage: parsed.usage(),
            finish_reason: parsed
                .done_reason
                .as_deref()
                .and_then(finish_reason)
                .or(Some(FinishReason::Stop)),
        })
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<CompletionStream> {
        let body = Self::request(messages, options, true);
        let response = self.send(&body, None).await?;

        let chunks = records(response, "\n").map(|line| -> Result<StreamChunk> { stream_chunk(&line?) });
        Ok(Box::pin(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = OllamaConfig::default();
        assert_eq!(config.host, "http://localhost");
        assert_eq!(config.port, 11434);
        assert_eq!(config.base_url(), "http://localhost:11434");
    }

    #[test]
    fn test_request_body() {
        let options = GenerationOptions::with_model("llama3.2").with_system_prompt("You are terse.");
        let body = OllamaProvider::request(&[Message::user("Hello")], &options, true);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["model"], "llama3.2");
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "Hello");
        assert_eq!(json["options"]["num_predict"], 1000);
        assert!(json["options"].get("stop").is_none());
    }

    #[test]
    fn test_stream_lines() {
        let chunk = stream_chunk(r#"{"message":{"role":"assistant","content":"Hel"},"done":false}"#).unwrap();
        assert_eq!(chunk.delta, "Hel");
        assert!(!chunk.done);

        let last = stream_chunk(
            r#"{"message":{"role":"assistant","content":""},"done":true,"prompt_eval_count":12,"eval_count":5}"#,
        )
        .unwrap();
        assert!(last.done);
        assert_eq!(last.usage.unwrap().total_tokens, 17);
    }

    #[test]
    fn test_error_line() {
        let error = stream_chunk(r#"{"error":"model 'nope' not found"}"#).unwrap_err();
        assert!(matches!(error, SquadError::Provider(ref m) if m.contains("not found")));
        assert!(matches!(stream_chunk("not json"), Err(SquadError::Parse(_))));
    }
}
