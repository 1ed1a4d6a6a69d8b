//! Routing and dispatch
//!
//! The [`Orchestrator`] owns the agent registry. For each request it classifies
//! the input, selects an agent (falling back to the default agent or to a
//! fixed "no agent" reply), dispatches with the agent's own bounded history and
//! records the turn once the answer is complete.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::agent::{AdditionalParams, Agent, AgentDescriptor, AgentInfo, AgentOutput, TextStream};
use crate::classifier::{Classifier, ClassifierResult, ClassifierStats};
use crate::config::SquadConfig;
use crate::error::{Result, SquadError};
use crate::message::{ConversationHistory, Message};
use crate::storage::{ChatStorage, ConversationKey};

/// Storage scope holding the classifier's own context
pub const CLASSIFIER_SCOPE: &str = "classifier";

/// Agent id reported when nothing handled the request
pub const NO_AGENT_ID: &str = "no_agent_selected";
pub const NO_AGENT_NAME: &str = "No Agent";

/// Routing facts returned with every response
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResponseMetadata {
    pub agent_id: String,
    pub agent_name: String,
    pub user_input: String,
    pub user_id: String,
    pub session_id: String,
    pub additional_params: AdditionalParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier_stats: Option<ClassifierStats>,
}

/// Response body: a finished message or a live fragment stream
pub enum ResponseOutput {
    Message(Message),
    Stream(TextStream),
}

impl std::fmt::Debug for ResponseOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message(message) => f.debug_tuple("Message").field(message).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Result of routing one request
#[derive(Debug)]
pub struct AgentResponse {
    pub metadata: ResponseMetadata,
    pub output: ResponseOutput,
    /// True exactly when `output` is a stream
    pub streaming: bool,
}

impl AgentResponse {
    /// Full response text, draining the stream if there is one
    pub async fn into_text(self) -> Result<String> {
        match self.output {
            ResponseOutput::Message(message) => Ok(message.text()),
            ResponseOutput::Stream(mut stream) => {
                let mut text = String::new();
                while let Some(fragment) = stream.next().await {
                    text.push_str(&fragment?);
                }
                Ok(text)
            }
        }
    }
}

/// Per-request identity threaded through dispatch
struct RequestContext<'a> {
    input: &'a str,
    user_id: &'a str,
    session_id: &'a str,
    additional_params: AdditionalParams,
    confidence: Option<f64>,
    classifier_stats: Option<ClassifierStats>,
}

impl RequestContext<'_> {
    fn metadata(&self, agent_id: &str, agent_name: &str) -> ResponseMetadata {
        ResponseMetadata {
            agent_id: agent_id.to_string(),
            agent_name: agent_name.to_string(),
            user_input: self.input.to_string(),
            user_id: self.user_id.to_string(),
            session_id: self.session_id.to_string(),
            additional_params: self.additional_params.clone(),
            confidence: self.confidence,
            classifier_stats: self.classifier_stats.clone(),
        }
    }
}

/// Where a finished turn gets written
struct PersistTarget {
    storage: Arc<dyn ChatStorage>,
    key: ConversationKey,
    user_message: Message,
    max_pairs: Option<usize>,
}

impl PersistTarget {
    async fn persist(self, reply: Message) -> Result<()> {
        let agent_id = self.key.agent_id.clone();
        self.storage
            .save_chat_messages(
                &self.key.user_id,
                &self.key.session_id,
                &agent_id,
                vec![self.user_message, reply.with_agent(agent_id.clone())],
                self.max_pairs,
            )
            .await?;
        Ok(())
    }
}

/// State carried across polls of a persisting stream
struct StreamState {
    inner: TextStream,
    collected: String,
    target: Option<PersistTarget>,
    agent_id: String,
    error_message: String,
    done: bool,
    _guard: Option<OwnedMutexGuard<()>>,
}

/// Forward fragments in order; write the turn only after the last one.
/// A failing stream records nothing.
fn persisting_stream(state: StreamState) -> TextStream {
    Box::pin(stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        match state.inner.next().await {
            Some(Ok(fragment)) => {
                state.collected.push_str(&fragment);
                Some((Ok(fragment), state))
            }
            Some(Err(error)) => {
                state.done = true;
                warn!(agent = %state.agent_id, %error, "agent stream failed");
                let error = SquadError::AgentExecution {
                    agent_id: state.agent_id.clone(),
                    user_message: state.error_message.clone(),
                    reason: error.to_string(),
                };
                Some((Err(error), state))
            }
            None => {
                state.done = true;
                let target = state.target.take()?;
                let reply = Message::assistant(std::mem::take(&mut state.collected));
                match target.persist(reply).await {
                    Ok(()) => None,
                    Err(error) => Some((Err(error), state)),
                }
            }
        }
    }))
}

/// Multi-agent request router
pub struct Orchestrator {
    config: SquadConfig,
    classifier: Arc<dyn Classifier>,
    storage: Arc<dyn ChatStorage>,
    agents: HashMap<String, Arc<dyn Agent>>,
    default_agent: Option<Arc<dyn Agent>>,
    conversation_locks: Mutex<HashMap<ConversationKey, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        config: SquadConfig,
        classifier: Arc<dyn Classifier>,
        storage: Arc<dyn ChatStorage>,
    ) -> Self {
        Self {
            config,
            classifier,
            storage,
            agents: HashMap::new(),
            default_agent: None,
            conversation_locks: Mutex::new(HashMap::new()),
        }
    }

    pub const fn config(&self) -> &SquadConfig {
        &self.config
    }

    /// Register an agent under its id. A later agent with the same id replaces
    /// the earlier one.
    pub fn add_agent(&mut self, agent: Arc<dyn Agent>) {
        let id = agent.id().to_string();
        if let Some(previous) = self.agents.insert(id.clone(), agent) {
            warn!(agent_id = %id, replaced = previous.name(), "agent id already registered, replacing");
        } else {
            debug!(agent_id = %id, "agent registered");
        }
    }

    pub fn get_default_agent(&self) -> Result<Arc<dyn Agent>> {
        self.default_agent
            .clone()
            .ok_or_else(|| SquadError::NotConfigured("no default agent is set".into()))
    }

    pub fn set_default_agent(&mut self, agent: Arc<dyn Agent>) {
        self.default_agent = Some(agent);
    }

    /// Registered agents keyed by id
    pub fn get_all_agents(&self) -> HashMap<String, AgentInfo> {
        self.agents
            .iter()
            .map(|(id, agent)| {
                (
                    id.clone(),
                    AgentInfo {
                        name: agent.name().to_string(),
                        description: agent.description().to_string(),
                    },
                )
            })
            .collect()
    }

    fn max_pairs(&self) -> Option<usize> {
        Some(self.config.max_message_pairs_per_agent)
    }

    /// Classify, dispatch and record one request.
    ///
    /// `stream_response` asks for a live stream when the selected agent
    /// streams; otherwise streams are drained and returned as a message.
    pub async fn route_request(
        &self,
        input: &str,
        user_id: &str,
        session_id: &str,
        additional_params: AdditionalParams,
        stream_response: bool,
    ) -> Result<AgentResponse> {
        let classifier_history = self
            .storage
            .fetch_chat(user_id, session_id, CLASSIFIER_SCOPE, self.max_pairs())
            .await?;
        if self.config.log_classifier_chat {
            info!(
                user_id,
                session_id,
                history = %format_history(&classifier_history),
                "classifier chat"
            );
        }

        let descriptors: Vec<AgentDescriptor> = self
            .agents
            .values()
            .map(|agent| agent.descriptor().clone())
            .collect();

        let started = Instant::now();
        let classification = self
            .classifier
            .process_request(input, &classifier_history, &descriptors)
            .await;
        if self.config.log_execution_times {
            info!(phase = "classification", elapsed_ms = elapsed_ms(started), "execution time");
        }

        let classifier_result = classification.map_err(|error| {
            warn!(%error, "classification failed");
            SquadError::Classification {
                user_message: self.config.classification_error_message.clone(),
                reason: error.to_string(),
            }
        })?;

        if self.config.log_classifier_output {
            info!(
                selected = classifier_result
                    .selected_agent
                    .as_ref()
                    .map_or("none", |agent| agent.id.as_str()),
                confidence = ?classifier_result.confidence,
                "classifier output"
            );
        }

        self.storage
            .save_chat_message(
                user_id,
                session_id,
                CLASSIFIER_SCOPE,
                Message::user(input),
                self.max_pairs(),
            )
            .await?;

        self.agent_process_request(
            input,
            user_id,
            session_id,
            classifier_result,
            additional_params,
            stream_response,
        )
        .await
    }

    /// Dispatch with an already-made classification
    pub async fn agent_process_request(
        &self,
        input: &str,
        user_id: &str,
        session_id: &str,
        classifier_result: ClassifierResult,
        additional_params: AdditionalParams,
        stream_response: bool,
    ) -> Result<AgentResponse> {
        let ClassifierResult {
            selected_agent,
            confidence,
            stats,
        } = classifier_result;
        let context = RequestContext {
            input,
            user_id,
            session_id,
            additional_params,
            confidence,
            classifier_stats: stats,
        };

        let selected = selected_agent.and_then(|descriptor| {
            let agent = self.agents.get(&descriptor.id).cloned();
            if agent.is_none() {
                warn!(agent_id = %descriptor.id, "selected agent is not registered");
            }
            agent
        });

        let agent = match selected {
            Some(agent) => agent,
            None if self.config.use_default_agent_if_none_identified => {
                let agent = self.get_default_agent()?;
                debug!(agent_id = agent.id(), "no agent identified, using default");
                agent
            }
            None => {
                debug!(user_id, session_id, "no agent identified");
                return Ok(AgentResponse {
                    metadata: context.metadata(NO_AGENT_ID, NO_AGENT_NAME),
                    output: ResponseOutput::Message(Message::assistant(
                        self.config.no_selected_agent_message.clone(),
                    )),
                    streaming: false,
                });
            }
        };

        self.dispatch(agent, context, stream_response).await
    }

    async fn dispatch(
        &self,
        agent: Arc<dyn Agent>,
        context: RequestContext<'_>,
        stream_response: bool,
    ) -> Result<AgentResponse> {
        let key = ConversationKey::new(context.user_id, context.session_id, agent.id());
        let guard = if self.config.serialize_conversations {
            Some(self.lock_conversation(key.clone()).await)
        } else {
            None
        };

        let history = self
            .storage
            .fetch_chat(context.user_id, context.session_id, agent.id(), self.max_pairs())
            .await?;
        if self.config.log_agent_chat {
            info!(agent = agent.id(), history = %format_history(&history), "agent chat");
        }

        let started = Instant::now();
        let output = agent
            .process_request(
                context.input,
                context.user_id,
                context.session_id,
                &history,
                &context.additional_params,
            )
            .await
            .map_err(|error| self.execution_error(agent.id(), &error))?;
        if self.config.log_execution_times {
            info!(
                phase = "agent",
                agent = agent.id(),
                elapsed_ms = elapsed_ms(started),
                "execution time"
            );
        }

        let metadata = context.metadata(agent.id(), agent.name());
        let target = agent.save_chat().then(|| PersistTarget {
            storage: Arc::clone(&self.storage),
            user_message: Message::user(context.input).with_agent(agent.id()),
            key,
            max_pairs: self.max_pairs(),
        });

        match output {
            AgentOutput::Message(reply) => {
                if let Some(target) = target {
                    target.persist(reply.clone()).await?;
                }
                Ok(AgentResponse {
                    metadata,
                    output: ResponseOutput::Message(reply),
                    streaming: false,
                })
            }
            AgentOutput::Stream(inner) if stream_response => {
                let stream = persisting_stream(StreamState {
                    inner,
                    collected: String::new(),
                    target,
                    agent_id: agent.id().to_string(),
                    error_message: self.config.general_routing_error_msg_message.clone(),
                    done: false,
                    _guard: guard,
                });
                Ok(AgentResponse {
                    metadata,
                    output: ResponseOutput::Stream(stream),
                    streaming: true,
                })
            }
            AgentOutput::Stream(mut inner) => {
                let mut text = String::new();
                while let Some(fragment) = inner.next().await {
                    let fragment = fragment.map_err(|error| self.execution_error(agent.id(), &error))?;
                    text.push_str(&fragment);
                }
                let reply = Message::assistant(text);
                if let Some(target) = target {
                    target.persist(reply.clone()).await?;
                }
                Ok(AgentResponse {
                    metadata,
                    output: ResponseOutput::Message(reply),
                    streaming: false,
                })
            }
        }
    }

    fn execution_error(&self, agent_id: &str, error: &SquadError) -> SquadError {
        warn!(agent = agent_id, %error, "agent failed");
        SquadError::AgentExecution {
            agent_id: agent_id.to_string(),
            user_message: self.config.general_routing_error_msg_message.clone(),
            reason: error.to_string(),
        }
    }

    async fn lock_conversation(&self, key: ConversationKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.conversation_locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(key).or_default())
        };
        lock.lock_owned().await
    }
}

fn format_history(history: &ConversationHistory) -> String {
    history
        .messages
        .iter()
        .map(|message| format!("{}: {}", message.role, message.text()))
        .collect::<Vec<_>>()
        .join(" | ")
}

#[allow(clippy::cast_possible_truncation)]
fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::storage::InMemoryChatStorage;

    struct EchoAgent {
        descriptor: AgentDescriptor,
        save: bool,
    }

    #[async_trait]
    impl Agent for EchoAgent {
        fn descriptor(&self) -> &AgentDescriptor {
            &self.descriptor
        }

        fn save_chat(&self) -> bool {
            self.save
        }

        async fn process_request(
            &self,
            input_text: &str,
            _user_id: &str,
            _session_id: &str,
            history: &ConversationHistory,
            _additional_params: &AdditionalParams,
        ) -> Result<AgentOutput> {
            Ok(AgentOutput::Message(Message::assistant(format!(
                "{} ({} before)",
                input_text,
                history.len()
            ))))
        }
    }

    struct FailingAgent(AgentDescriptor);

    #[async_trait]
    impl Agent for FailingAgent {
        fn descriptor(&self) -> &AgentDescriptor {
            &self.0
        }

        async fn process_request(
            &self,
            _input_text: &str,
            _user_id: &str,
            _session_id: &str,
            _history: &ConversationHistory,
            _additional_params: &AdditionalParams,
        ) -> Result<AgentOutput> {
            Err(SquadError::Provider("model crashed".into()))
        }
    }

    struct FixedClassifier(Option<&'static str>);

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn process_request(
            &self,
            _input: &str,
            _history: &ConversationHistory,
            agents: &[AgentDescriptor],
        ) -> Result<ClassifierResult> {
            Ok(self
                .0
                .and_then(|id| agents.iter().find(|a| a.id == id).cloned())
                .map_or_else(ClassifierResult::none, |agent| ClassifierResult::selected(agent, 0.5)))
        }
    }

    fn echo(name: &str, save: bool) -> Arc<dyn Agent> {
        Arc::new(EchoAgent {
            descriptor: AgentDescriptor::new(name, format!("{name} things")),
            save,
        })
    }

    fn orchestrator(selected: Option<&'static str>) -> (Orchestrator, Arc<InMemoryChatStorage>) {
        let storage = Arc::new(InMemoryChatStorage::new());
        let orchestrator = Orchestrator::new(
            SquadConfig::default(),
            Arc::new(FixedClassifier(selected)),
            storage.clone(),
        );
        (orchestrator, storage)
    }

    #[test]
    fn test_add_agent_replaces_same_id() {
        let (mut orchestrator, _) = orchestrator(None);
        orchestrator.add_agent(echo("Tech", true));
        orchestrator.add_agent(Arc::new(EchoAgent {
            descriptor: AgentDescriptor::new("TECH", "newer"),
            save: true,
        }));

        let agents = orchestrator.get_all_agents();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents["tech"].description, "newer");
    }

    #[test]
    fn test_default_agent_not_configured() {
        let (orchestrator, _) = orchestrator(None);
        assert!(matches!(
            orchestrator.get_default_agent(),
            Err(SquadError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_default_is_not_configured_at_route_time() {
        let (orchestrator, _) = orchestrator(None);
        let error = orchestrator
            .route_request("hello", "u", "s", AdditionalParams::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(error, SquadError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_save_chat_opt_out() {
        let (mut orchestrator, storage) = orchestrator(Some("quiet"));
        orchestrator.add_agent(echo("Quiet", false));

        let response = orchestrator
            .route_request("hello", "u", "s", AdditionalParams::new(), false)
            .await
            .unwrap();
        assert_eq!(response.metadata.agent_id, "quiet");
        assert!(storage.fetch_chat("u", "s", "quiet", None).await.unwrap().is_empty());
        // classifier scope still records the input
        assert_eq!(storage.fetch_chat("u", "s", CLASSIFIER_SCOPE, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_agent_failure_uses_routing_message() {
        let (mut orchestrator, storage) = orchestrator(Some("broken"));
        orchestrator.add_agent(Arc::new(FailingAgent(AgentDescriptor::new("Broken", "fails"))));

        let error = orchestrator
            .route_request("hello", "u", "s", AdditionalParams::new(), false)
            .await
            .unwrap_err();
        let SquadError::AgentExecution { agent_id, user_message, .. } = &error else {
            panic!("unexpected error: {error}");
        };
        assert_eq!(agent_id, "broken");
        assert_eq!(user_message, &SquadConfig::default().general_routing_error_msg_message);
        assert!(storage.fetch_chat("u", "s", "broken", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_serialized_conversations_complete() {
        let storage = Arc::new(InMemoryChatStorage::new());
        let config = SquadConfig {
            serialize_conversations: true,
            ..SquadConfig::default()
        };
        let mut orchestrator =
            Orchestrator::new(config, Arc::new(FixedClassifier(Some("tech"))), storage.clone());
        orchestrator.add_agent(echo("Tech", true));
        let orchestrator = Arc::new(orchestrator);

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move {
                    orchestrator
                        .route_request(&format!("q{i}"), "u", "s", AdditionalParams::new(), false)
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let history = storage.fetch_chat("u", "s", "tech", None).await.unwrap();
        assert_eq!(history.len(), 8);
        // every reply saw a complete history of earlier turns
        for pair in history.messages.chunks(2) {
            let before: usize = pair[1]
                .text()
                .rsplit('(')
                .next()
                .and_then(|s| s.split(' ').next())
                .and_then(|n| n.parse().ok())
                .unwrap();
            assert_eq!(before % 2, 0);
        }
    }
}
