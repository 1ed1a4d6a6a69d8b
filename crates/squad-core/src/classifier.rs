//! Intent classification
//!
//! A [`Classifier`] picks which registered agent should handle an input. The
//! bundled [`LlmClassifier`] asks a chat model for a JSON verdict and retries
//! when the backend reports overload.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::AgentDescriptor;
use crate::error::{Result, SquadError};
use crate::message::{ConversationHistory, Message};
use crate::provider::{GenerationOptions, LlmProvider, TokenUsage};
use crate::retry::RetryPolicy;

/// Diagnostics from one classification
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifierStats {
    /// Model calls made, including retries
    pub attempts: u32,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// Outcome of classification. `selected_agent = None` means no agent fits.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifierResult {
    pub selected_agent: Option<AgentDescriptor>,
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ClassifierStats>,
}

impl ClassifierResult {
    /// Result naming `agent` with the given confidence
    pub fn selected(agent: AgentDescriptor, confidence: f64) -> Self {
        Self {
            selected_agent: Some(agent),
            confidence: Some(confidence),
            stats: None,
        }
    }

    /// Result selecting nobody
    pub fn none() -> Self {
        Self::default()
    }
}

/// Maps user input to an agent
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify `input` given the classifier-scope history and the agents
    /// currently registered.
    async fn process_request(
        &self,
        input: &str,
        history: &ConversationHistory,
        agents: &[AgentDescriptor],
    ) -> Result<ClassifierResult>;
}

const CLASSIFIER_PROMPT: &str = "You are AgentMatcher, an assistant that routes user requests \
to the most appropriate agent. Analyze the user's input and pick one agent from the list below. \
Follow-up replies such as \"yes\", \"ok\" or a bare number usually continue the previous \
exchange; use the conversation history to resolve them.";

const RESPONSE_FORMAT: &str = "Reply with a single JSON object and nothing else:\n\
{\"userinput\": \"<the user's input>\", \"selected_agent\": \"<agent id or empty>\", \
\"confidence\": <number between 0 and 1>}\n\
Use an empty selected_agent when no agent fits.";

/// The shape the model is asked to produce
#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(default)]
    #[allow(dead_code)]
    userinput: Option<String>,
    selected_agent: Option<String>,
    confidence: f64,
}

/// Build the routing system prompt
fn build_system_prompt(agents: &[AgentDescriptor], history: &ConversationHistory) -> String {
    let mut prompt = String::from(CLASSIFIER_PROMPT);
    prompt.push_str("\n\n<agents>\n");
    for agent in agents {
        let _ = writeln!(prompt, "{}: {}", agent.id, agent.description);
    }
    prompt.push_str("</agents>\n");

    if !history.is_empty() {
        prompt.push_str("\n<history>\n");
        for message in &history.messages {
            let _ = writeln!(prompt, "{}: {}", message.role, message.text());
        }
        prompt.push_str("</history>\n");
    }

    prompt.push('\n');
    prompt.push_str(RESPONSE_FORMAT);
    prompt
}

/// Parse the model's reply and resolve the agent against `agents`.
///
/// The JSON object may be wrapped in prose or code fences.
fn parse_verdict(raw: &str, agents: &[AgentDescriptor]) -> Result<(Option<AgentDescriptor>, f64)> {
    let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) else {
        return Err(SquadError::Parse("classifier reply contains no JSON object".into()));
    };
    if end < start {
        return Err(SquadError::Parse("classifier reply contains no JSON object".into()));
    }

    let verdict: Verdict = serde_json::from_str(&raw[start..=end])
        .map_err(|e| SquadError::Parse(format!("invalid classifier reply: {e}")))?;

    if !verdict.confidence.is_finite() {
        return Err(SquadError::Parse("confidence is not a finite number".into()));
    }
    let confidence = verdict.confidence.clamp(0.0, 1.0);

    let selected = verdict
        .selected_agent
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .and_then(|id| {
            let found = agents.iter().find(|a| a.id.eq_ignore_ascii_case(&id)).cloned();
            if found.is_none() {
                tracing::debug!(agent_id = %id, "classifier named an unknown agent");
            }
            found
        });

    Ok((selected, confidence))
}

/// Classifier backed by a chat model
pub struct LlmClassifier {
    provider: Arc<dyn LlmProvider>,
    options: GenerationOptions,
    retry: RetryPolicy,
    log_raw_output: bool,
}

impl LlmClassifier {
    pub fn new(provider: Arc<dyn LlmProvider>, options: GenerationOptions) -> Self {
        Self {
            provider,
            options,
            retry: RetryPolicy::default(),
            log_raw_output: false,
        }
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Log every raw model reply at debug level
    #[must_use]
    pub const fn with_raw_output_logging(mut self, enabled: bool) -> Self {
        self.log_raw_output = enabled;
        self
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn process_request(
        &self,
        input: &str,
        history: &ConversationHistory,
        agents: &[AgentDescriptor],
    ) -> Result<ClassifierResult> {
        let started = Instant::now();
        let options = self.options.with_system_prompt(build_system_prompt(agents, history));
        let request = [Message::user(input)];

        let (completion, attempts) = self
            .retry
            .run(|| self.provider.complete(&request, &options))
            .await?;

        if self.log_raw_output {
            tracing::debug!(raw = %completion.content, "classifier raw output");
        }

        let (selected_agent, confidence) = parse_verdict(&completion.content, agents)?;

        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = started.elapsed().as_millis() as u64;

        Ok(ClassifierResult {
            selected_agent,
            confidence: Some(confidence),
            stats: Some(ClassifierStats {
                attempts,
                elapsed_ms,
                raw_output: Some(completion.content),
                usage: completion.usage,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::provider::{Completion, CompletionStream};

    /// Replays scripted replies in order
    struct ScriptedProvider {
        replies: Mutex<VecDeque<Result<String>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        async fn complete(&self, _messages: &[Message], options: &GenerationOptions) -> Result<Completion> {
            *self.calls.lock().unwrap() += 1;
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(SquadError::Provider("script exhausted".into())))?;
            Ok(Completion {
                content: reply,
                model: options.model.clone(),
                usage: None,
                finish_reason: None,
            })
        }

        async fn complete_stream(
            &self,
            _messages: &[Message],
            _options: &GenerationOptions,
        ) -> Result<CompletionStream> {
            Err(SquadError::Provider("not scripted".into()))
        }
    }

    fn agents() -> Vec<AgentDescriptor> {
        vec![
            AgentDescriptor::new("Tech Agent", "Hardware and software troubleshooting"),
            AgentDescriptor::new("Billing Agent", "Invoices, refunds and payments"),
        ]
    }

    fn overloaded() -> Result<String> {
        Err(SquadError::Overloaded("529".into()))
    }

    #[test]
    fn test_system_prompt_lists_agents_and_history() {
        let history = ConversationHistory::new(vec![Message::user("my laptop is broken")]);
        let prompt = build_system_prompt(&agents(), &history);
        assert!(prompt.contains("tech-agent: Hardware and software troubleshooting\n"));
        assert!(prompt.contains("billing-agent: Invoices, refunds and payments\n"));
        assert!(prompt.contains("user: my laptop is broken"));
    }

    #[test]
    fn test_parse_fenced_reply() {
        let raw = "```json\n{\"userinput\": \"refund\", \"selected_agent\": \"Billing-Agent\", \"confidence\": 0.8}\n```";
        let (agent, confidence) = parse_verdict(raw, &agents()).unwrap();
        assert_eq!(agent.unwrap().id, "billing-agent");
        assert!((confidence - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_unknown_agent_is_none() {
        let raw = r#"{"selected_agent": "weather", "confidence": 0.7}"#;
        let (agent, _) = parse_verdict(raw, &agents()).unwrap();
        assert!(agent.is_none());

        let raw = r#"{"selected_agent": "", "confidence": 0.1}"#;
        assert!(parse_verdict(raw, &agents()).unwrap().0.is_none());
    }

    #[test]
    fn test_parse_clamps_confidence() {
        let raw = r#"{"selected_agent": "tech-agent", "confidence": 1.7}"#;
        assert!((parse_verdict(raw, &agents()).unwrap().1 - 1.0).abs() < f64::EPSILON);

        let raw = r#"{"selected_agent": "tech-agent", "confidence": -3}"#;
        assert!(parse_verdict(raw, &agents()).unwrap().1.abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(parse_verdict("no idea", &agents()), Err(SquadError::Parse(_))));
        assert!(matches!(
            parse_verdict(r#"{"selected_agent": "tech-agent"}"#, &agents()),
            Err(SquadError::Parse(_))
        ));
        assert!(matches!(
            parse_verdict(r#"{"selected_agent": "tech-agent", "confidence": "high"}"#, &agents()),
            Err(SquadError::Parse(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_twice_then_succeeds() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            overloaded(),
            overloaded(),
            Ok(r#"{"selected_agent": "tech-agent", "confidence": 0.92}"#.into()),
        ]));
        let classifier = LlmClassifier::new(provider.clone(), GenerationOptions::default());

        let started = tokio::time::Instant::now();
        let result = classifier
            .process_request("My laptop won't boot", &ConversationHistory::default(), &agents())
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(provider.calls(), 3);
        assert!(elapsed >= std::time::Duration::from_millis(1500));
        assert!(elapsed < std::time::Duration::from_millis(1600));
        assert_eq!(result.selected_agent.unwrap().id, "tech-agent");
        assert_eq!(result.stats.unwrap().attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_propagate() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            overloaded(),
            overloaded(),
            overloaded(),
            overloaded(),
            overloaded(),
        ]));
        let classifier = LlmClassifier::new(provider.clone(), GenerationOptions::default())
            .with_retry(RetryPolicy::new(3));

        let error = classifier
            .process_request("hello", &ConversationHistory::default(), &agents())
            .await
            .unwrap_err();

        assert!(error.is_overloaded());
        assert_eq!(provider.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(SquadError::Auth("bad key".into())),
            Ok(r#"{"selected_agent": "tech-agent", "confidence": 0.9}"#.into()),
        ]));
        let classifier = LlmClassifier::new(provider.clone(), GenerationOptions::default());

        let error = classifier
            .process_request("hello", &ConversationHistory::default(), &agents())
            .await
            .unwrap_err();

        assert!(matches!(error, SquadError::Auth(_)));
        assert_eq!(provider.calls(), 1);
    }
}
