//! Agent contract
//!
//! An agent turns `(input, user, session, history, params)` into exactly one
//! assistant turn: either a finished [`Message`] or an ordered stream of text
//! fragments. Agents never write conversation storage.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::LazyLock;

use async_trait::async_trait;
use futures::Stream;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::{ConversationHistory, Message};

static NON_KEY_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9\s-]").expect("key filter pattern is valid"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Opaque per-request parameters passed through to the agent
pub type AdditionalParams = HashMap<String, serde_json::Value>;

/// Finite, single-pass sequence of text fragments
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Derive a registry key from a display name: `"Tech Agent"` → `"tech-agent"`.
pub fn agent_id_from_name(name: &str) -> String {
    let cleaned = NON_KEY_CHARS.replace_all(name, "");
    WHITESPACE.replace_all(cleaned.trim(), "-").to_lowercase()
}

/// Identity of an agent as seen by the classifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Registry key, unique per orchestrator
    pub id: String,
    pub name: String,
    /// Classifier-visible description of what the agent handles
    pub description: String,
}

impl AgentDescriptor {
    /// Descriptor whose id derives from `name`
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: agent_id_from_name(&name),
            name,
            description: description.into(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Public view of a registered agent
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    pub description: String,
}

/// What an agent produced for one turn
pub enum AgentOutput {
    Message(Message),
    Stream(TextStream),
}

impl std::fmt::Debug for AgentOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message(message) => f.debug_tuple("Message").field(message).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Agent trait - implement to plug a handler into the router
#[async_trait]
pub trait Agent: Send + Sync {
    fn descriptor(&self) -> &AgentDescriptor;

    fn id(&self) -> &str {
        &self.descriptor().id
    }

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    fn description(&self) -> &str {
        &self.descriptor().description
    }

    /// Whether `process_request` answers with a stream
    fn is_streaming_enabled(&self) -> bool {
        false
    }

    /// Whether the orchestrator records this agent's turns
    fn save_chat(&self) -> bool {
        true
    }

    async fn process_request(
        &self,
        input_text: &str,
        user_id: &str,
        session_id: &str,
        history: &ConversationHistory,
        additional_params: &AdditionalParams,
    ) -> Result<AgentOutput>;
}
