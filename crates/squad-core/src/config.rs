//! Squad Configuration
//!
//! Process-wide routing policy. Fixed once the [`Orchestrator`](crate::Orchestrator)
//! is built; any field left unset takes its default.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SquadError};

pub const DEFAULT_CLASSIFICATION_ERROR_MESSAGE: &str =
    "I'm sorry, an error occurred while processing your request. Please try again later.";
pub const DEFAULT_NO_SELECTED_AGENT_MESSAGE: &str =
    "I'm sorry, I couldn't determine how to handle your request. Could you please rephrase it?";
pub const DEFAULT_GENERAL_ROUTING_ERROR_MESSAGE: &str =
    "An error occurred while processing your request. Please try again later.";

/// Routing policy flags and user-facing fallback texts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SquadConfig {
    /// Log each agent's history before dispatch
    pub log_agent_chat: bool,

    /// Log the classifier-scope history before classification
    pub log_classifier_chat: bool,

    /// Log the raw classifier model output
    pub log_classifier_raw_output: bool,

    /// Log the selected agent and confidence
    pub log_classifier_output: bool,

    /// Log per-phase timings of each request
    pub log_execution_times: bool,

    /// Classifier retries on an overloaded backend
    pub max_retries: u32,

    /// Retention bound per conversation, in user/assistant pairs
    pub max_message_pairs_per_agent: usize,

    /// Fall back to the default agent when classification picks nobody
    pub use_default_agent_if_none_identified: bool,

    /// Serialize requests that share a `(user, session, agent)` conversation
    pub serialize_conversations: bool,

    pub classification_error_message: String,
    pub no_selected_agent_message: String,
    pub general_routing_error_msg_message: String,
}

impl Default for SquadConfig {
    fn default() -> Self {
        Self {
            log_agent_chat: false,
            log_classifier_chat: false,
            log_classifier_raw_output: false,
            log_classifier_output: false,
            log_execution_times: false,
            max_retries: 3,
            max_message_pairs_per_agent: 100,
            use_default_agent_if_none_identified: true,
            serialize_conversations: false,
            classification_error_message: DEFAULT_CLASSIFICATION_ERROR_MESSAGE.into(),
            no_selected_agent_message: DEFAULT_NO_SELECTED_AGENT_MESSAGE.into(),
            general_routing_error_msg_message: DEFAULT_GENERAL_ROUTING_ERROR_MESSAGE.into(),
        }
    }
}

impl SquadConfig {
    /// Build from `SQUAD_*` environment variables, defaulting anything unset.
    ///
    /// Booleans accept `true/false/1/0`. A present but unparsable value is an error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        let flag = |key: &str, target: &mut bool| -> Result<()> {
            if let Some(raw) = lookup(key) {
                *target = match raw.trim().to_ascii_lowercase().as_str() {
                    "1" | "true" | "yes" => true,
                    "0" | "false" | "no" => false,
                    other => {
                        return Err(SquadError::Config(format!("{key}: expected a boolean, got '{other}'")));
                    }
                };
            }
            Ok(())
        };

        flag("SQUAD_LOG_AGENT_CHAT", &mut config.log_agent_chat)?;
        flag("SQUAD_LOG_CLASSIFIER_CHAT", &mut config.log_classifier_chat)?;
        flag("SQUAD_LOG_CLASSIFIER_RAW_OUTPUT", &mut config.log_classifier_raw_output)?;
        flag("SQUAD_LOG_CLASSIFIER_OUTPUT", &mut config.log_classifier_output)?;
        flag("SQUAD_LOG_EXECUTION_TIMES", &mut config.log_execution_times)?;
        flag(
            "SQUAD_USE_DEFAULT_AGENT_IF_NONE_IDENTIFIED",
            &mut config.use_default_agent_if_none_identified,
        )?;
        flag("SQUAD_SERIALIZE_CONVERSATIONS", &mut config.serialize_conversations)?;

        if let Some(raw) = lookup("SQUAD_MAX_RETRIES") {
            config.max_retries = raw
                .trim()
                .parse()
                .map_err(|e| SquadError::Config(format!("SQUAD_MAX_RETRIES: {e}")))?;
        }
        if let Some(raw) = lookup("SQUAD_MAX_MESSAGE_PAIRS_PER_AGENT") {
            config.max_message_pairs_per_agent = raw
                .trim()
                .parse()
                .map_err(|e| SquadError::Config(format!("SQUAD_MAX_MESSAGE_PAIRS_PER_AGENT: {e}")))?;
        }

        if let Some(text) = lookup("SQUAD_CLASSIFICATION_ERROR_MESSAGE") {
            config.classification_error_message = text;
        }
        if let Some(text) = lookup("SQUAD_NO_SELECTED_AGENT_MESSAGE") {
            config.no_selected_agent_message = text;
        }
        if let Some(text) = lookup("SQUAD_GENERAL_ROUTING_ERROR_MSG_MESSAGE") {
            config.general_routing_error_msg_message = text;
        }

        Ok(config)
    }
}
