//! Conversation Storage
//!
//! Turns are stored per `(user, session, agent)`. After every save a scope holds
//! at most `2 × max_pairs` verbatim messages, oldest dropped first; backends
//! with a [`Summarizer`] fold the dropped messages into a running summary.

mod memory;
mod summarizer;

pub use memory::InMemoryChatStorage;
pub use summarizer::{LlmSummarizer, Summarizer};

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::{ConversationHistory, Message};

/// Address of one conversation
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationKey {
    pub user_id: String,
    pub session_id: String,
    pub agent_id: String,
}

impl ConversationKey {
    pub fn new(user_id: &str, session_id: &str, agent_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            agent_id: agent_id.to_string(),
        }
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}#{}", self.user_id, self.session_id, self.agent_id)
    }
}

/// A stored message returned by similarity retrieval
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredMessage {
    pub agent_id: String,
    pub message: Message,
    /// Relevance in `[0, 1]`
    pub score: f64,
}

/// Persistence capability for conversation turns
#[async_trait]
pub trait ChatStorage: Send + Sync {
    /// Append one message and return the retained history.
    /// `max_pairs = None` keeps everything.
    async fn save_chat_message(
        &self,
        user_id: &str,
        session_id: &str,
        agent_id: &str,
        message: Message,
        max_pairs: Option<usize>,
    ) -> Result<ConversationHistory>;

    /// Append several messages in order.
    ///
    /// The default saves them one at a time; backends override it to commit
    /// the whole batch or nothing.
    async fn save_chat_messages(
        &self,
        user_id: &str,
        session_id: &str,
        agent_id: &str,
        messages: Vec<Message>,
        max_pairs: Option<usize>,
    ) -> Result<ConversationHistory> {
        let mut history = ConversationHistory::default();
        for message in messages {
            history = self
                .save_chat_message(user_id, session_id, agent_id, message, max_pairs)
                .await?;
        }
        if history.is_empty() {
            history = self.fetch_chat(user_id, session_id, agent_id, max_pairs).await?;
        }
        Ok(history)
    }

    /// History of one scope; empty when the conversation does not exist
    async fn fetch_chat(
        &self,
        user_id: &str,
        session_id: &str,
        agent_id: &str,
        max_pairs: Option<usize>,
    ) -> Result<ConversationHistory>;

    /// Every agent's history for a user session
    async fn fetch_all_chats(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<HashMap<String, ConversationHistory>>;

    /// Messages of the session most relevant to `query`, best first.
    ///
    /// The default ranks by term overlap; vector-backed stores override this
    /// with embedding similarity.
    async fn fetch_relevant_chats(
        &self,
        user_id: &str,
        session_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredMessage>> {
        let chats = self.fetch_all_chats(user_id, session_id).await?;
        Ok(rank_by_overlap(&chats, query, limit))
    }
}

/// Keep the newest `2 × max_pairs` messages, preserving order.
pub fn trim_conversation(messages: &mut Vec<Message>, max_pairs: Option<usize>) -> Vec<Message> {
    let Some(max_pairs) = max_pairs else {
        return Vec::new();
    };
    let keep = max_pairs.saturating_mul(2);
    if messages.len() <= keep {
        return Vec::new();
    }
    let excess = messages.len() - keep;
    messages.drain(..excess).collect()
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Rank messages by the share of query terms they contain
pub fn rank_by_overlap(
    chats: &HashMap<String, ConversationHistory>,
    query: &str,
    limit: usize,
) -> Vec<ScoredMessage> {
    let query_terms = terms(query);
    if query_terms.is_empty() || limit == 0 {
        return Vec::new();
    }

    #[allow(clippy::cast_precision_loss)]
    let mut scored: Vec<ScoredMessage> = chats
        .iter()
        .flat_map(|(agent_id, history)| {
            history.messages.iter().map(move |message| (agent_id, message))
        })
        .filter_map(|(agent_id, message)| {
            let hits = terms(&message.text()).intersection(&query_terms).count();
            (hits > 0).then(|| ScoredMessage {
                agent_id: agent_id.clone(),
                message: message.clone(),
                score: hits as f64 / query_terms.len() as f64,
            })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.message.timestamp.cmp(&a.message.timestamp))
    });
    scored.truncate(limit);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("q{i}"))
                } else {
                    Message::assistant(format!("a{i}"))
                }
            })
            .collect()
    }

    #[test]
    fn test_trim_keeps_newest_pairs() {
        let mut messages = numbered(10);
        let dropped = trim_conversation(&mut messages, Some(2));

        assert_eq!(dropped.len(), 6);
        assert_eq!(dropped[0].text(), "q0");
        let kept: Vec<String> = messages.iter().map(Message::text).collect();
        assert_eq!(kept, vec!["q6", "a7", "q8", "a9"]);
    }

    #[test]
    fn test_trim_unbounded_and_short() {
        let mut messages = numbered(3);
        assert!(trim_conversation(&mut messages, None).is_empty());
        assert!(trim_conversation(&mut messages, Some(5)).is_empty());
        assert_eq!(messages.len(), 3);
    }

    #[test]
    fn test_rank_by_overlap() {
        let mut chats = HashMap::new();
        chats.insert(
            "tech".to_string(),
            ConversationHistory::new(vec![
                Message::user("my laptop won't boot"),
                Message::assistant("Try holding the power button"),
            ]),
        );
        chats.insert(
            "billing".to_string(),
            ConversationHistory::new(vec![Message::user("refund my laptop order")]),
        );

        let ranked = rank_by_overlap(&chats, "Laptop boot", 5);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].agent_id, "tech");
        assert!((ranked[0].score - 1.0).abs() < f64::EPSILON);
        assert!((ranked[1].score - 0.5).abs() < f64::EPSILON);

        assert!(rank_by_overlap(&chats, "   ", 5).is_empty());
    }
}
