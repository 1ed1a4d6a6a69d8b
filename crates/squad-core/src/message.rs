//! Conversation Messages
//!
//! Standard message format stored per `(user, session, agent)` and handed to agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a message sender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User input
    User,
    /// Agent response
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One part of a message body
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text
    Text { text: String },

    /// A tool invocation requested by the model
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_use(name: impl Into<String>, input: serde_json::Value) -> Self {
        Self::ToolUse {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            input,
        }
    }

    /// Text of this block, if it is a text block
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::ToolUse { .. } => None,
        }
    }
}

/// A single message in a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message role
    pub role: Role,

    /// Ordered content parts
    pub content: Vec<ContentBlock>,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Optional metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

/// Additional message metadata
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Agent that produced or received this message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    /// Model that generated this (for assistant messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Custom key-value pairs
    #[serde(flatten)]
    pub extra: std::collections::HashMap<String, serde_json::Value>,
}

impl Message {
    /// Create a new single-text message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self::with_blocks(role, vec![ContentBlock::text(content)])
    }

    /// Create a message from explicit content blocks
    pub fn with_blocks(role: Role, content: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Tag the message with the agent it belongs to
    #[must_use]
    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(MessageMetadata::default)
            .agent_id = Some(agent_id.into());
        self
    }

    /// Concatenated text of all text blocks
    pub fn text(&self) -> String {
        self.content.iter().filter_map(ContentBlock::as_text).collect()
    }

    /// Estimate token count (rough approximation)
    pub fn estimate_tokens(&self) -> u32 {
        // ~4 characters per token is a rough estimate
        u32::try_from(self.text().len() / 4).unwrap_or(u32::MAX).saturating_add(4)
    }
}

/// Ordered, retention-bounded history of one `(user, session, agent)` scope
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationHistory {
    /// Verbatim messages, oldest first
    pub messages: Vec<Message>,

    /// Running summary of messages trimmed out of `messages`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl ConversationHistory {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            summary: None,
        }
    }

    /// Get the last message
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of complete user/assistant pairs, rounded up
    pub fn pair_count(&self) -> usize {
        self.messages.len().div_ceil(2)
    }

    /// Estimate total tokens in the verbatim messages
    pub fn estimate_tokens(&self) -> u32 {
        self.messages.iter().map(Message::estimate_tokens).sum()
    }
}
