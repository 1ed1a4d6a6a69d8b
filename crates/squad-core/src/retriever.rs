//! Retrieval augmentation
//!
//! Agents may pull supplementary context from a retriever before prompting.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SquadError};

/// One retrieved document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl RetrievedDocument {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// Join document texts, one per line, skipping empty ones
pub fn combine_retrieval_results(documents: &[RetrievedDocument]) -> String {
    documents
        .iter()
        .map(|doc| doc.text.as_str())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Source of supplementary context
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Documents relevant to `text`
    async fn retrieve(&self, text: &str) -> Result<Vec<RetrievedDocument>>;

    /// Retrieve and flatten into a single context string
    async fn retrieve_and_combine_results(&self, text: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Err(SquadError::Other("input text is required for retrieval".into()));
        }
        let documents = self.retrieve(text).await?;
        Ok(combine_retrieval_results(&documents))
    }
}
