//! LLM-backed agent
//!
//! General-purpose [`Agent`] that answers through any [`LlmProvider`]. Its
//! system prompt is a template rendered with custom variables, optionally
//! extended with retrieved context and the conversation summary.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;

use crate::agent::{AdditionalParams, Agent, AgentDescriptor, AgentOutput, TextStream};
use crate::error::{Result, SquadError};
use crate::message::{ConversationHistory, Message};
use crate::provider::{GenerationOptions, LlmProvider};
use crate::retriever::Retriever;
use crate::template::{TemplateVariables, render};

/// Default persona prompt; `{{AGENT_NAME}}` and `{{AGENT_DESCRIPTION}}` are bound automatically.
pub const DEFAULT_AGENT_PROMPT: &str = r"You are a {{AGENT_NAME}}.
{{AGENT_DESCRIPTION}} Provide helpful and accurate information based on your expertise.
You will engage in an open-ended conversation. The human may ask follow-up questions
about your previous answer or switch to a new topic at any point; shift focus with them.
Throughout the conversation:
- Understand the context and intent behind each question.
- Give substantive, well-reasoned answers that address the query directly.
- Ask for clarification if any part of the question is ambiguous.
- Keep a consistent, respectful tone.";

/// Agent configuration
#[derive(Clone, Debug)]
pub struct LlmAgentConfig {
    /// System prompt template
    pub prompt_template: String,

    /// Values for template placeholders
    pub variables: TemplateVariables,

    /// Generation options
    pub generation: GenerationOptions,

    /// Answer with a token stream
    pub streaming: bool,

    /// Let the orchestrator persist this agent's turns
    pub save_chat: bool,

    /// Append the history summary to the system prompt
    pub include_summary: bool,
}

impl Default for LlmAgentConfig {
    fn default() -> Self {
        Self {
            prompt_template: DEFAULT_AGENT_PROMPT.into(),
            variables: TemplateVariables::new(),
            generation: GenerationOptions::default(),
            streaming: false,
            save_chat: true,
            include_summary: true,
        }
    }
}

/// Agent answering through an LLM provider
pub struct LlmAgent {
    descriptor: AgentDescriptor,
    provider: Arc<dyn LlmProvider>,
    retriever: Option<Arc<dyn Retriever>>,
    config: LlmAgentConfig,
}

impl LlmAgent {
    pub fn new(
        descriptor: AgentDescriptor,
        provider: Arc<dyn LlmProvider>,
        config: LlmAgentConfig,
    ) -> Self {
        Self {
            descriptor,
            provider,
            retriever: None,
            config,
        }
    }

    pub fn builder() -> LlmAgentBuilder {
        LlmAgentBuilder::new()
    }

    /// Get configuration
    pub const fn config(&self) -> &LlmAgentConfig {
        &self.config
    }

    /// Rendered system prompt without per-request context
    pub fn system_prompt(&self) -> String {
        let mut variables = self.config.variables.clone();
        variables
            .entry("AGENT_NAME".into())
            .or_insert_with(|| self.descriptor.name.clone().into());
        variables
            .entry("AGENT_DESCRIPTION".into())
            .or_insert_with(|| self.descriptor.description.clone().into());
        render(&self.config.prompt_template, &variables)
    }

    async fn build_system_prompt(&self, input_text: &str, history: &ConversationHistory) -> Result<String> {
        let mut prompt = self.system_prompt();

        if let Some(retriever) = &self.retriever {
            let context = retriever.retrieve_and_combine_results(input_text).await?;
            if !context.is_empty() {
                prompt.push_str("\nHere is the context to use to answer the user's question:\n");
                prompt.push_str(&context);
            }
        }

        if self.config.include_summary {
            if let Some(summary) = &history.summary {
                prompt.push_str("\nSummary of the earlier conversation:\n");
                prompt.push_str(summary);
            }
        }

        Ok(prompt)
    }
}

#[async_trait]
impl Agent for LlmAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    fn is_streaming_enabled(&self) -> bool {
        self.config.streaming
    }

    fn save_chat(&self) -> bool {
        self.config.save_chat
    }

    async fn process_request(
        &self,
        input_text: &str,
        user_id: &str,
        session_id: &str,
        history: &ConversationHistory,
        _additional_params: &AdditionalParams,
    ) -> Result<AgentOutput> {
        let system_prompt = self.build_system_prompt(input_text, history).await?;
        let options = self.config.generation.with_system_prompt(system_prompt);

        let mut messages = history.messages.clone();
        messages.push(Message::user(input_text));

        tracing::debug!(
            agent = %self.descriptor.id,
            provider = self.provider.name(),
            user_id,
            session_id,
            history = history.len(),
            streaming = self.config.streaming,
            "calling model"
        );

        if self.config.streaming {
            let stream = self.provider.complete_stream(&messages, &options).await?;
            let text: TextStream = Box::pin(
                stream
                    .map(|chunk| chunk.map(|c| c.delta))
                    .filter(|delta| futures::future::ready(!matches!(delta, Ok(d) if d.is_empty()))),
            );
            return Ok(AgentOutput::Stream(text));
        }

        let completion = self.provider.complete(&messages, &options).await?;
        if completion.content.is_empty() {
            return Err(SquadError::Provider(format!(
                "{} returned no message content",
                self.provider.name()
            )));
        }

        let mut message = Message::assistant(completion.content);
        message
            .metadata
            .get_or_insert_with(Default::default)
            .model = Some(completion.model);
        Ok(AgentOutput::Message(message))
    }
}

/// Builder for [`LlmAgent`]
pub struct LlmAgentBuilder {
    name: Option<String>,
    id: Option<String>,
    description: String,
    provider: Option<Arc<dyn LlmProvider>>,
    retriever: Option<Arc<dyn Retriever>>,
    config: LlmAgentConfig,
}

impl Default for LlmAgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmAgentBuilder {
    pub fn new() -> Self {
        Self {
            name: None,
            id: None,
            description: String::new(),
            provider: None,
            retriever: None,
            config: LlmAgentConfig::default(),
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Override the id derived from the name
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    #[must_use]
    pub fn generation(mut self, generation: GenerationOptions) -> Self {
        self.config.generation = generation;
        self
    }

    #[must_use]
    pub const fn streaming(mut self, streaming: bool) -> Self {
        self.config.streaming = streaming;
        self
    }

    #[must_use]
    pub const fn save_chat(mut self, save_chat: bool) -> Self {
        self.config.save_chat = save_chat;
        self
    }

    /// Replace the prompt template and bind its variables
    #[must_use]
    pub fn system_prompt(mut self, template: impl Into<String>, variables: TemplateVariables) -> Self {
        self.config.prompt_template = template.into();
        self.config.variables = variables;
        self
    }

    pub fn build(self) -> Result<LlmAgent> {
        let provider = self
            .provider
            .ok_or_else(|| SquadError::Config("Provider is required".into()))?;
        let name = self
            .name
            .ok_or_else(|| SquadError::Config("Agent name is required".into()))?;
        if self.description.trim().is_empty() {
            return Err(SquadError::Config(format!(
                "Agent '{name}' needs a description for classification"
            )));
        }

        let mut descriptor = AgentDescriptor::new(name, self.description);
        if let Some(id) = self.id {
            descriptor = descriptor.with_id(id);
        }

        let mut agent = LlmAgent::new(descriptor, provider, self.config);
        agent.retriever = self.retriever;
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::stream;

    use super::*;
    use crate::provider::{Completion, CompletionStream, StreamChunk};
    use crate::retriever::RetrievedDocument;

    /// Records the last request and replies with canned text
    #[derive(Default)]
    struct RecordingProvider {
        seen: Mutex<Option<(Vec<Message>, GenerationOptions)>>,
    }

    #[async_trait]
    impl LlmProvider for RecordingProvider {
        fn name(&self) -> &str {
            "recording"
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        async fn complete(&self, messages: &[Message], options: &GenerationOptions) -> Result<Completion> {
            *self.seen.lock().unwrap() = Some((messages.to_vec(), options.clone()));
            Ok(Completion {
                content: "This is a test response".into(),
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
            let chunks = ["This ", "", "is ", "streamed"].map(|delta| {
                Ok(StreamChunk {
                    delta: delta.to_string(),
                    ..Default::default()
                })
            });
            Ok(Box::pin(stream::iter(chunks)))
        }
    }

    struct ManualRetriever;

    #[async_trait]
    impl Retriever for ManualRetriever {
        async fn retrieve(&self, _text: &str) -> Result<Vec<RetrievedDocument>> {
            Ok(vec![RetrievedDocument::new("Hold power for ten seconds.")])
        }
    }

    fn agent(provider: Arc<RecordingProvider>) -> LlmAgentBuilder {
        LlmAgent::builder()
            .name("Tech Agent")
            .description("Handles hardware questions.")
            .provider(provider)
    }

    #[test]
    fn test_custom_system_prompt_with_variable() {
        let mut vars = TemplateVariables::new();
        vars.insert("variable".into(), "value".into());
        let agent = agent(Arc::default())
            .system_prompt("This is a prompt with {{variable}}", vars)
            .build()
            .unwrap();
        assert_eq!(agent.system_prompt(), "This is a prompt with value");
    }

    #[test]
    fn test_default_prompt_names_agent() {
        let agent = agent(Arc::default()).build().unwrap();
        assert_eq!(agent.id(), "tech-agent");
        assert!(agent.system_prompt().starts_with("You are a Tech Agent.\nHandles hardware questions."));
    }

    #[test]
    fn test_build_requires_description() {
        let result = LlmAgent::builder()
            .name("Blank")
            .provider(Arc::new(RecordingProvider::default()))
            .build();
        assert!(matches!(result, Err(SquadError::Config(_))));
    }

    #[tokio::test]
    async fn test_process_request_success() {
        let provider = Arc::new(RecordingProvider::default());
        let agent = agent(provider.clone()).retriever(Arc::new(ManualRetriever)).build().unwrap();
        let history = ConversationHistory {
            messages: vec![Message::user("hi"), Message::assistant("hello")],
            summary: Some("User has a laptop.".into()),
        };

        let output = agent
            .process_request("Test question", "test_user", "test_session", &history, &AdditionalParams::new())
            .await
            .unwrap();
        let AgentOutput::Message(message) = output else {
            panic!("expected a message");
        };
        assert_eq!(message.text(), "This is a test response");

        let (messages, options) = provider.seen.lock().unwrap().clone().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].text(), "Test question");
        let system = options.system_prompt.unwrap();
        assert!(system.contains("Hold power for ten seconds."));
        assert!(system.contains("User has a laptop."));
    }

    #[tokio::test]
    async fn test_process_request_streaming() {
        let agent = agent(Arc::default()).streaming(true).build().unwrap();
        assert!(agent.is_streaming_enabled());

        let output = agent
            .process_request("q", "u", "s", &ConversationHistory::default(), &AdditionalParams::new())
            .await
            .unwrap();
        let AgentOutput::Stream(stream) = output else {
            panic!("expected a stream");
        };
        let chunks: Vec<String> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks, vec!["This ", "is ", "streamed"]);
    }
}
