//! In-memory chat storage (for development/testing)

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ChatStorage, ConversationKey, Summarizer, trim_conversation};
use crate::error::{Result, SquadError};
use crate::message::{ConversationHistory, Message};

/// Conversations kept in a process-local map.
///
/// With a [`Summarizer`], messages trimmed by retention are folded into the
/// scope's `summary`. The write lock is held while the summarizer runs so a
/// save either fully commits or leaves the scope untouched.
#[derive(Default)]
pub struct InMemoryChatStorage {
    conversations: RwLock<HashMap<ConversationKey, ConversationHistory>>,
    summarizer: Option<Arc<dyn Summarizer>>,
}

impl InMemoryChatStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Summarize trimmed messages instead of discarding them
    pub fn with_summarizer(summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            summarizer: Some(summarizer),
        }
    }

    /// Number of stored conversations
    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.conversations.read().await.is_empty()
    }

    /// Append `messages` as one unit: trim once, summarize once, then write.
    async fn commit(
        &self,
        key: ConversationKey,
        messages: Vec<Message>,
        max_pairs: Option<usize>,
    ) -> Result<ConversationHistory> {
        let mut conversations = self.conversations.write().await;

        let mut updated = conversations.get(&key).cloned().unwrap_or_default();
        if messages.is_empty() {
            return Ok(bounded(&updated, max_pairs));
        }
        updated.messages.extend(messages);
        let dropped = trim_conversation(&mut updated.messages, max_pairs);

        if let (Some(summarizer), false) = (&self.summarizer, dropped.is_empty()) {
            let summary = summarizer
                .summarize(updated.summary.as_deref(), &dropped)
                .await
                .map_err(|e| SquadError::Storage(format!("summarizing {key}: {e}")))?;
            updated.summary = Some(summary);
        }

        tracing::trace!(%key, messages = updated.len(), "saved chat messages");
        conversations.insert(key, updated.clone());
        Ok(updated)
    }
}

fn bounded(history: &ConversationHistory, max_pairs: Option<usize>) -> ConversationHistory {
    let mut view = history.clone();
    trim_conversation(&mut view.messages, max_pairs);
    view
}

#[async_trait]
impl ChatStorage for InMemoryChatStorage {
    async fn save_chat_message(
        &self,
        user_id: &str,
        session_id: &str,
        agent_id: &str,
        message: Message,
        max_pairs: Option<usize>,
    ) -> Result<ConversationHistory> {
        let key = ConversationKey::new(user_id, session_id, agent_id);
        self.commit(key, vec![message], max_pairs).await
    }

    async fn save_chat_messages(
        &self,
        user_id: &str,
        session_id: &str,
        agent_id: &str,
        messages: Vec<Message>,
        max_pairs: Option<usize>,
    ) -> Result<ConversationHistory> {
        let key = ConversationKey::new(user_id, session_id, agent_id);
        self.commit(key, messages, max_pairs).await
    }

    async fn fetch_chat(
        &self,
        user_id: &str,
        session_id: &str,
        agent_id: &str,
        max_pairs: Option<usize>,
    ) -> Result<ConversationHistory> {
        let key = ConversationKey::new(user_id, session_id, agent_id);
        let conversations = self.conversations.read().await;
        Ok(conversations
            .get(&key)
            .map(|history| bounded(history, max_pairs))
            .unwrap_or_default())
    }

    async fn fetch_all_chats(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<HashMap<String, ConversationHistory>> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .iter()
            .filter(|(key, _)| key.user_id == user_id && key.session_id == session_id)
            .map(|(key, history)| (key.agent_id.clone(), history.clone()))
            .collect())
    }
}
