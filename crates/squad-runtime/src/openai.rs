//! OpenAI-compatible LLM Provider
//!
//! Talks to any server exposing `/chat/completions` (OpenAI, vLLM, llama.cpp,
//! LM Studio). Streaming uses server-sent events terminated by `data: [DONE]`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use squad_core::{
    error::{Result, SquadError},
    message::Message,
    provider::{Completion, CompletionStream, GenerationOptions, LlmProvider, StreamChunk, TokenUsage},
};

use crate::error::RuntimeError;
use crate::http::{WireMessage, check_status, finish_reason, records, wire_messages};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible provider configuration
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// API root, e.g. `https://api.openai.com/v1`
    pub base_url: String,

    /// Bearer token; local servers usually need none
    pub api_key: Option<String>,

    /// Timeout for non-streaming requests, in seconds
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: None,
            timeout_secs: 60,
        }
    }
}

impl OpenAiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            timeout_secs: std::env::var("OPENAI_TIMEOUT_SECS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(defaults.timeout_secs),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceContent>,
    #[serde(default)]
    delta: Option<ChoiceContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChoiceContent {
    #[serde(default)]
    content: Option<String>,
}

fn decode(data: &str) -> std::result::Result<ChatCompletionResponse, RuntimeError> {
    serde_json::from_str(data).map_err(|e| RuntimeError::Decode(format!("{e} (data: {data})")))
}

/// Parse one SSE event. Keep-alives and comments yield `None`.
fn parse_event(event: &str) -> Result<Option<StreamChunk>> {
    let data: String = event
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .collect();

    if data.is_empty() {
        return Ok(None);
    }
    if data == "[DONE]" {
        return Ok(Some(StreamChunk {
            done: true,
            ..Default::default()
        }));
    }

    let response = decode(&data)?;
    let choice = response.choices.first();
    Ok(Some(StreamChunk {
        delta: choice
            .and_then(|c| c.delta.as_ref())
            .and_then(|d| d.content.clone())
            .unwrap_or_default(),
        done: false,
        usage: response.usage,
    }))
}

/// OpenAI-compatible LLM provider
pub struct OpenAiProvider {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    pub fn from_config(config: OpenAiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SquadError::Config(format!("building HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(OpenAiConfig::from_env())
    }

    fn request<'a>(messages: &[Message], options: &'a GenerationOptions, stream: bool) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &options.model,
            messages: wire_messages(messages, options.system_prompt.as_deref()),
            temperature: options.temperature,
            top_p: options.top_p,
            max_tokens: options.max_tokens,
            stop: (!options.stop_sequences.is_empty()).then_some(options.stop_sequences.as_slice()),
            stream,
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(
        &self,
        body: &ChatCompletionRequest<'_>,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response> {
        let mut request = self.authorized(self.client.post(self.config.endpoint("chat/completions")).json(body));
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await.map_err(RuntimeError::from)?;
        Ok(check_status(response).await?)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn health_check(&self) -> Result<bool> {
        let request = self
            .authorized(self.client.get(self.config.endpoint("models")))
            .timeout(Duration::from_secs(5));
        match request.send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                tracing::warn!("OpenAI-compatible health check failed: {}", e);
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
        let parsed = decode(&text)?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| SquadError::Parse("response has no choices".into()))?;

        Ok(Completion {
            content: choice.message.and_then(|m| m.content).unwrap_or_default(),
            model: parsed.model.unwrap_or_else(|| options.model.clone()),
            usage: parsed.usage,
            finish_reason: choice.finish_reason.as_deref().and_then(finish_reason),
        })
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<CompletionStream> {
        let body = Self::request(messages, options, true);
        let response = self.send(&body, None).await?;

        let chunks = records(response, "\n\n").filter_map(|event| async move {
            match event {
                Ok(event) => parse_event(&event).transpose(),
                Err(e) => Some(Err(SquadError::from(e))),
            }
        });
        Ok(Box::pin(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_paths() {
        let config = OpenAiConfig {
            base_url: "http://localhost:8080/v1/".into(),
            ..Default::default()
        };
        assert_eq!(config.endpoint("chat/completions"), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn test_request_body() {
        let mut options = GenerationOptions::with_model("gpt-4o-mini").with_system_prompt("Route requests.");
        options.stop_sequences = vec!["\n\n".into()];
        let body = OpenAiProvider::request(&[Message::user("refund please")], &options, false);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["stop"][0], "\n\n");
        assert_eq!(json["max_tokens"], 1000);
    }

    #[test]
    fn test_parse_delta_event() {
        let event = r#"data: {"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        let chunk = parse_event(event).unwrap().unwrap();
        assert_eq!(chunk.delta, "Hel");
        assert!(!chunk.done);
    }

    #[test]
    fn test_parse_done_and_keepalive() {
        assert!(parse_event("data: [DONE]").unwrap().unwrap().done);
        assert!(parse_event(": keep-alive").unwrap().is_none());
        assert!(matches!(parse_event("data: {broken"), Err(SquadError::Parse(_))));
    }

    #[test]
    fn test_decode_completion() {
        let parsed = decode(
            r#"{"model":"gpt-4o-mini","choices":[{"message":{"role":"assistant","content":"Hi"},"finish_reason":"stop"}],"usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}"#,
        )
        .unwrap();
        assert_eq!(parsed.usage.unwrap().total_tokens, 4);
        assert_eq!(
            parsed.choices[0].message.as_ref().unwrap().content.as_deref(),
            Some("Hi")
        );
    }
}
