//! # squad-core
//!
//! Multi-agent request routing: classify intent, select an agent, dispatch with
//! per-agent bounded history, and record the turn.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                          │
//! │  ┌─────────────┐  ┌─────────────┐  ┌──────────────────────┐  │
//! │  │ Classifier  │──│   Agent     │──│     ChatStorage      │  │
//! │  │ (+ retry)   │  │  Registry   │  │ (user, session, id)  │  │
//! │  └─────────────┘  └─────────────┘  └──────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//!            │                 │
//!            └──── LlmProvider (Strategy) ────┘
//! ```
//!
//! Classifiers, agents and storage are traits; [`LlmClassifier`], [`LlmAgent`]
//! and [`InMemoryChatStorage`] are the bundled implementations. Model backends
//! plug in through [`LlmProvider`].

pub mod agent;
pub mod classifier;
pub mod config;
pub mod error;
pub mod llm_agent;
pub mod message;
pub mod orchestrator;
pub mod provider;
pub mod retriever;
pub mod retry;
pub mod storage;
pub mod template;

pub use agent::{AdditionalParams, Agent, AgentDescriptor, AgentInfo, AgentOutput, TextStream};
pub use classifier::{Classifier, ClassifierResult, ClassifierStats, LlmClassifier};
pub use config::SquadConfig;
pub use error::{Result, SquadError};
pub use llm_agent::{LlmAgent, LlmAgentBuilder, LlmAgentConfig};
pub use message::{ContentBlock, ConversationHistory, Message, Role};
pub use orchestrator::{AgentResponse, Orchestrator, ResponseMetadata, ResponseOutput};
pub use provider::{GenerationOptions, LlmProvider};
pub use retriever::{RetrievedDocument, Retriever};
pub use retry::RetryPolicy;
pub use storage::{ChatStorage, InMemoryChatStorage, LlmSummarizer, Summarizer};
pub use template::{TemplateValue, TemplateVariables};
